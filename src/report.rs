//! 結果の出力（予測CSV・クラス分布・評価指標）

use std::path::Path;

use csv::{Terminator, WriterBuilder};
use tracing::info;

use crate::error::{Result, WasteError};
use crate::ml::EvaluationMetrics;
use crate::types::{ClassCounts, PredictionRecord};

/// 予測CSVのヘッダー
pub const CSV_HEADER: [&str; 2] = ["ImageName", "PredictedLabel"];

/// 予測結果をCSVに書き出す（既存ファイルは上書き）
///
/// 予測が `None` の行は2列目が空になります。
pub fn write_predictions_csv(path: &Path, predictions: &[PredictionRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let csv_err = |e: csv::Error| WasteError::serialization(path, e);
    let mut csv_writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_path(path)
        .map_err(csv_err)?;

    csv_writer.write_record(CSV_HEADER).map_err(csv_err)?;
    for prediction in predictions {
        csv_writer
            .write_record([
                prediction.image_name.as_str(),
                prediction.predicted_label.as_deref().unwrap_or(""),
            ])
            .map_err(csv_err)?;
    }
    csv_writer.flush()?;

    info!("Wrote {} predictions to {}", predictions.len(), path.display());
    Ok(())
}

/// 評価指標の表示用テキスト
pub fn format_evaluation(metrics: &EvaluationMetrics) -> String {
    format!(
        "\n=== Model Evaluation ===\nMicroAccuracy: {:.2}\nMacroAccuracy: {:.2}\nLogLoss: {:.2}\n",
        metrics.micro_accuracy, metrics.macro_accuracy, metrics.log_loss
    )
}

/// 評価指標を表示
pub fn print_evaluation(metrics: &EvaluationMetrics) {
    print!("{}", format_evaluation(metrics));
}

/// 詳細な評価指標の表示用テキスト（ラベル名付き）
///
/// # 引数
/// - `metrics`: 評価結果
/// - `label_keys`: キー順のラベル名（混同行列の行・列の見出し）
pub fn format_evaluation_details(metrics: &EvaluationMetrics, label_keys: &[String]) -> String {
    let mut lines = vec![
        format!("LogLossReduction: {:.2}", metrics.log_loss_reduction),
        "Per-class LogLoss:".to_string(),
    ];
    for (label, loss) in label_keys.iter().zip(&metrics.per_class_log_loss) {
        lines.push(format!("  {}: {:.2}", label, loss));
    }
    lines.push("Confusion matrix (rows = truth, columns = prediction):".to_string());
    lines.push(format!("  \t{}", label_keys.join("\t")));
    for (label, row) in label_keys.iter().zip(&metrics.confusion_matrix) {
        let cells: Vec<String> = row.iter().map(usize::to_string).collect();
        lines.push(format!("  {}\t{}", label, cells.join("\t")));
    }
    lines.join("\n") + "\n"
}

/// 詳細な評価指標を表示
pub fn print_evaluation_details(metrics: &EvaluationMetrics, label_keys: &[String]) {
    print!("{}", format_evaluation_details(metrics, label_keys));
}

/// 予測ラベルの分布を初出順で表示
pub fn print_class_distribution(counts: &ClassCounts) {
    println!("\nPredicted class distribution:");
    for (label, count) in counts.iter() {
        println!("{}: {}", label, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_layout_and_blank_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Predictions.csv");
        let predictions = vec![
            PredictionRecord {
                image_name: "a.jpg".to_string(),
                predicted_label: Some("plastic".to_string()),
            },
            PredictionRecord {
                image_name: "b.png".to_string(),
                predicted_label: None,
            },
        ];

        write_predictions_csv(&path, &predictions).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ImageName,PredictedLabel\na.jpg,plastic\nb.png,\n");
    }

    #[test]
    fn test_csv_overwrites_and_quotes_commas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("Predictions.csv");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale content\nmore\nlines\n").unwrap();

        let predictions = vec![PredictionRecord {
            image_name: "can, crushed.jpg".to_string(),
            predicted_label: Some("metal".to_string()),
        }];
        write_predictions_csv(&path, &predictions).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ImageName,PredictedLabel\n\"can, crushed.jpg\",metal\n");
    }

    fn metrics() -> EvaluationMetrics {
        EvaluationMetrics {
            micro_accuracy: 0.75,
            macro_accuracy: 0.5,
            log_loss: 0.6931,
            log_loss_reduction: 0.25,
            per_class_log_loss: vec![0.1, 1.2345],
            confusion_matrix: vec![vec![2, 0], vec![1, 1]],
            num_samples: 4,
        }
    }

    #[test]
    fn test_evaluation_uses_two_decimals() {
        assert_eq!(
            format_evaluation(&metrics()),
            "\n=== Model Evaluation ===\nMicroAccuracy: 0.75\nMacroAccuracy: 0.50\nLogLoss: 0.69\n"
        );
    }

    #[test]
    fn test_evaluation_details_are_labelled() {
        let labels = vec!["glass".to_string(), "metal".to_string()];
        let text = format_evaluation_details(&metrics(), &labels);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines,
            vec![
                "LogLossReduction: 0.25",
                "Per-class LogLoss:",
                "  glass: 0.10",
                "  metal: 1.23",
                "Confusion matrix (rows = truth, columns = prediction):",
                "  \tglass\tmetal",
                "  glass\t2\t0",
                "  metal\t1\t1",
            ]
        );
    }

    #[test]
    fn test_empty_predictions_write_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Predictions.csv");
        write_predictions_csv(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ImageName,PredictedLabel\n");
    }
}
