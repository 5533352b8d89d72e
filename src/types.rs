use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// ラベル付き画像レコード（画像パスとクラス名）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledImageRecord {
    pub image_path: PathBuf,
    pub label: String,
}

impl LabeledImageRecord {
    pub fn new(image_path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            label: label.into(),
        }
    }
}

/// 学習／テスト分割の結果
#[derive(Debug, Clone, Default)]
pub struct TrainTestSplit {
    pub train: Vec<LabeledImageRecord>,
    pub test: Vec<LabeledImageRecord>,
}

/// 1画像分の予測結果（CSVの1行に対応）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub image_name: String,
    pub predicted_label: Option<String>,
}

impl PredictionRecord {
    /// 画像パスからファイル名部分を取り出して作成
    pub fn from_path(image_path: &Path, predicted_label: Option<String>) -> Self {
        let image_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            image_name,
            predicted_label,
        }
    }
}

/// 予測ラベルごとの件数（初出順を保持）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCounts {
    entries: Vec<(String, usize)>,
}

impl ClassCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// ラベルの件数を1増やす（初出なら末尾に追加）
    pub fn increment(&mut self, label: &str) {
        match self.entries.iter_mut().find(|(l, _)| l == label) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((label.to_string(), 1)),
        }
    }

    /// 予測結果を反映する。`None` は数えない
    pub fn record(&mut self, predicted_label: Option<&str>) {
        if let Some(label) = predicted_label {
            self.increment(label);
        }
    }

    pub fn get(&self, label: &str) -> usize {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, c)| c).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 初出順に (ラベル, 件数) を返す
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(l, c)| (l.as_str(), *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_counts_keep_first_seen_order() {
        let mut counts = ClassCounts::new();
        for label in ["plastic", "glass", "plastic", "metal", "glass", "plastic"] {
            counts.record(Some(label));
        }
        counts.record(None);

        let order: Vec<_> = counts.iter().collect();
        assert_eq!(order, vec![("plastic", 3), ("glass", 2), ("metal", 1)]);
        assert_eq!(counts.total(), 6);
        assert_eq!(counts.get("paper"), 0);
    }

    #[test]
    fn test_prediction_record_uses_file_name() {
        let record = PredictionRecord::from_path(
            Path::new("TestImages/sub/bottle.jpg"),
            Some("plastic".to_string()),
        );
        assert_eq!(record.image_name, "bottle.jpg");
        assert_eq!(record.predicted_label.as_deref(), Some("plastic"));
    }
}
