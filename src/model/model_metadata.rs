//! モデルメタデータとデータスキーマの定義
//!
//! zip形式のモデルファイルに `metadata.json` / `schema.json` として保存されます。

use serde::{Deserialize, Serialize};

use crate::error::{Result, WasteError};
use crate::ml::Architecture;

/// 現在のメタデータ形式
pub const METADATA_FORMAT_VERSION: u32 = 1;

/// 列の型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
}

/// スキーマの列定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// 学習データの入力スキーマ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSchema {
    pub columns: Vec<SchemaColumn>,
}

impl DataSchema {
    /// 画像パス列とラベル列からなるスキーマ
    pub fn image_classification(feature_column: &str, label_column: &str) -> Self {
        Self {
            columns: vec![
                SchemaColumn {
                    name: feature_column.to_string(),
                    column_type: ColumnType::Text,
                },
                SchemaColumn {
                    name: label_column.to_string(),
                    column_type: ColumnType::Text,
                },
            ],
        }
    }

    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// モデルメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// メタデータ形式のバージョン
    pub format_version: u32,

    /// バックボーンのアーキテクチャ
    pub architecture: Architecture,

    /// バックボーン重みの識別子（ボトルネックキャッシュとの対応付けに使用）
    pub backbone_id: String,

    /// モデル入力サイズ（正方形の一辺）
    pub image_size: usize,

    /// ボトルネック特徴量の次元
    pub feature_size: usize,

    /// ラベルのキー→値対応（キー `i` が `label_keys[i]`）
    pub label_keys: Vec<String>,

    /// 特徴量列名
    pub feature_column: String,

    /// ラベル列名
    pub label_column: String,

    /// 学習エポック数
    pub num_epochs: usize,

    /// バッチサイズ
    pub batch_size: usize,

    /// 学習率
    pub learning_rate: f64,

    /// 学習に使った件数
    pub num_train_samples: usize,

    /// 検証に使った件数
    pub num_validation_samples: usize,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    pub fn num_classes(&self) -> usize {
        self.label_keys.len()
    }

    /// キーからラベル文字列へ変換（範囲外は `None`）
    pub fn key_to_value(&self, key: usize) -> Option<&str> {
        self.label_keys.get(key).map(String::as_str)
    }

    /// ラベル文字列からキーへ変換
    pub fn value_to_key(&self, label: &str) -> Option<usize> {
        self.label_keys.iter().position(|l| l == label)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| WasteError::serialization("metadata.json", e))
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        let metadata: Self = serde_json::from_str(json)
            .map_err(|e| WasteError::serialization("metadata.json", e))?;
        if metadata.format_version != METADATA_FORMAT_VERSION {
            return Err(WasteError::serialization(
                "metadata.json",
                format!("unsupported format version {}", metadata.format_version),
            ));
        }
        Ok(metadata)
    }

    /// メタデータをコンソールに表示
    pub fn print_info(&self) {
        println!("\n=== Model Metadata ===");
        println!("Architecture: {}", self.architecture);
        println!("Input size: {}x{}", self.image_size, self.image_size);
        println!("Feature size: {}", self.feature_size);
        println!("Labels ({}): {}", self.num_classes(), self.label_keys.join(", "));
        println!("Columns: {} -> {}", self.feature_column, self.label_column);
        println!(
            "Training: {} epochs, batch size {}, learning rate {}",
            self.num_epochs, self.batch_size, self.learning_rate
        );
        println!(
            "Samples: {} train / {} validation",
            self.num_train_samples, self.num_validation_samples
        );
        println!("Trained at: {}", self.trained_at);
        println!("======================");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_metadata() -> ModelMetadata {
        ModelMetadata {
            format_version: METADATA_FORMAT_VERSION,
            architecture: Architecture::Compact,
            backbone_id: "compact-test".to_string(),
            image_size: 32,
            feature_size: 64,
            label_keys: vec!["glass".to_string(), "plastic".to_string()],
            feature_column: "ImagePath".to_string(),
            label_column: "Label".to_string(),
            num_epochs: 10,
            batch_size: 10,
            learning_rate: 0.01,
            num_train_samples: 8,
            num_validation_samples: 2,
            trained_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_key_value_mapping() {
        let metadata = sample_metadata();
        assert_eq!(metadata.key_to_value(1), Some("plastic"));
        assert_eq!(metadata.key_to_value(2), None);
        assert_eq!(metadata.value_to_key("glass"), Some(0));
        assert_eq!(metadata.value_to_key("paper"), None);
    }

    #[test]
    fn test_rejects_unknown_format_version() {
        let mut metadata = sample_metadata();
        metadata.format_version = 99;
        let json = metadata.to_json_string().unwrap();
        assert!(ModelMetadata::from_json_string(&json).is_err());
    }

    #[test]
    fn test_schema_columns() {
        let schema = DataSchema::image_classification("ImagePath", "Label");
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.column("Label").unwrap().column_type, ColumnType::Text);
        assert!(schema.column("Score").is_none());
    }
}
