//! 多クラス分類の評価指標

use serde::{Deserialize, Serialize};
use tracing::warn;

/// log(0) を避けるための下限
const PROBABILITY_EPSILON: f64 = 1e-15;

/// 推論済みのレコード
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    /// 正解ラベルのキー（学習時に存在しないラベルは `None`）
    pub truth: Option<usize>,
    /// クラスごとの確率
    pub probabilities: Vec<f32>,
    /// 確率最大のキー
    pub predicted_key: usize,
    /// キーに対応するラベル
    pub predicted_label: Option<String>,
}

impl ScoredRecord {
    /// 確率ベクトルから生成（予測キーは最大確率のもの）
    pub fn from_probabilities(
        truth: Option<usize>,
        probabilities: Vec<f32>,
        label_keys: &[String],
    ) -> Self {
        let predicted_key = argmax(&probabilities);
        Self {
            truth,
            predicted_label: label_keys.get(predicted_key).cloned(),
            probabilities,
            predicted_key,
        }
    }

    fn truth_probability(&self) -> f64 {
        self.truth
            .and_then(|key| self.probabilities.get(key))
            .map_or(0.0, |p| *p as f64)
    }

    fn log_loss(&self) -> f64 {
        -self.truth_probability().max(PROBABILITY_EPSILON).ln()
    }
}

/// 最大値のインデックス（同値なら先頭）
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}

/// 評価結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// 正解数 / 全件
    pub micro_accuracy: f64,
    /// 正解に現れたクラスごとの再現率の平均
    pub macro_accuracy: f64,
    /// 正解クラスの確率の負の対数の平均
    pub log_loss: f64,
    /// 事前分布に対する log loss の改善率
    pub log_loss_reduction: f64,
    /// クラスごとの log loss（該当なしは NaN）
    pub per_class_log_loss: Vec<f64>,
    /// 混同行列（行 = 正解, 列 = 予測）
    pub confusion_matrix: Vec<Vec<usize>>,
    pub num_samples: usize,
}

/// 評価指標を計算
///
/// # 引数
/// - `scored`: 推論済みのレコード
/// - `num_classes`: モデルのクラス数
pub fn evaluate(scored: &[ScoredRecord], num_classes: usize) -> EvaluationMetrics {
    let mut confusion_matrix = vec![vec![0usize; num_classes]; num_classes];
    if scored.is_empty() {
        warn!("Evaluating on an empty set, metrics are undefined");
        return EvaluationMetrics {
            micro_accuracy: f64::NAN,
            macro_accuracy: f64::NAN,
            log_loss: f64::NAN,
            log_loss_reduction: f64::NAN,
            per_class_log_loss: vec![f64::NAN; num_classes],
            confusion_matrix,
            num_samples: 0,
        };
    }

    let total = scored.len() as f64;
    let mut correct = 0usize;
    let mut loss_sum = 0.0;
    let mut class_loss = vec![0.0; num_classes];
    let mut class_total = vec![0usize; num_classes];

    for record in scored {
        let loss = record.log_loss();
        loss_sum += loss;
        if let Some(truth) = record.truth.filter(|&t| t < num_classes) {
            class_total[truth] += 1;
            class_loss[truth] += loss;
            if record.predicted_key < num_classes {
                confusion_matrix[truth][record.predicted_key] += 1;
            }
            if record.predicted_key == truth {
                correct += 1;
            }
        }
    }

    let recalls: Vec<f64> = (0..num_classes)
        .filter(|&c| class_total[c] > 0)
        .map(|c| confusion_matrix[c][c] as f64 / class_total[c] as f64)
        .collect();
    let macro_accuracy = if recalls.is_empty() {
        0.0
    } else {
        recalls.iter().sum::<f64>() / recalls.len() as f64
    };

    let log_loss = loss_sum / total;
    let prior_log_loss: f64 = class_total
        .iter()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.ln()
        })
        .sum();
    let log_loss_reduction = if prior_log_loss > 0.0 {
        1.0 - log_loss / prior_log_loss
    } else {
        0.0
    };

    let per_class_log_loss = class_loss
        .iter()
        .zip(&class_total)
        .map(|(&loss, &n)| if n > 0 { loss / n as f64 } else { f64::NAN })
        .collect();

    EvaluationMetrics {
        micro_accuracy: correct as f64 / total,
        macro_accuracy,
        log_loss,
        log_loss_reduction,
        per_class_log_loss,
        confusion_matrix,
        num_samples: scored.len(),
    }
}
