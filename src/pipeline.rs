//! 学習から一括予測までの処理の流れ
//!
//! 1. データセット走査 → 2. 分割 → 3. 学習 → 4. 評価 → 5. 保存 → 6. 一括予測 → 7. 出力
//!
//! 各段階は `ClassificationEngine` を通して実行されるため、テストでは偽のエンジンに差し替えられます。

use std::path::Path;

use tracing::info;

use crate::dataset::{scan_dataset, scan_images};
use crate::error::Result;
use crate::ml::{ClassificationEngine, EvaluationMetrics, TrainerOptions, TrainingEvent};
use crate::model::{AppConfig, DataSchema};
use crate::report::{
    print_class_distribution, print_evaluation, print_evaluation_details, write_predictions_csv,
};
use crate::types::{ClassCounts, LabeledImageRecord, PredictionRecord, TrainTestSplit};

/// 学習・評価の結果
pub struct TrainOutcome<M> {
    pub model: M,
    pub schema: DataSchema,
    pub split: TrainTestSplit,
    pub metrics: EvaluationMetrics,
}

/// 一括予測の結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionSummary {
    pub predictions: Vec<PredictionRecord>,
    pub counts: ClassCounts,
}

/// 学習の進捗をコンソールへ出力
pub fn console_progress(event: &TrainingEvent) {
    println!("{}", event);
}

/// データセットを走査・分割して学習し、テストデータで評価する
pub fn train_and_evaluate<E: ClassificationEngine>(
    engine: &E,
    config: &AppConfig,
    progress: &mut dyn FnMut(&TrainingEvent),
) -> Result<TrainOutcome<E::Model>> {
    let records = scan_dataset(&config.paths.dataset_dir)?;
    let split = engine.split(&records, config.training.test_fraction, config.training.seed)?;
    info!(
        "Split {} records: {} train / {} test",
        records.len(),
        split.train.len(),
        split.test.len()
    );

    let options = TrainerOptions::from_config(config);
    println!("Training model...");
    let model = engine.fit(&split.train, &split.test, &options, progress)?;

    let metrics = evaluate_model(engine, &model, &split.test, config.detailed_metrics)?;

    Ok(TrainOutcome {
        model,
        schema: options.schema(),
        split,
        metrics,
    })
}

/// レコードを推論して評価指標を表示
///
/// `detailed` なら混同行列などの詳細な指標も表示します。
pub fn evaluate_model<E: ClassificationEngine>(
    engine: &E,
    model: &E::Model,
    records: &[LabeledImageRecord],
    detailed: bool,
) -> Result<EvaluationMetrics> {
    let scored = engine.transform(model, records)?;
    let metrics = engine.evaluate(model, &scored);
    print_evaluation(&metrics);
    if detailed {
        print_evaluation_details(&metrics, engine.label_keys(model));
    }
    Ok(metrics)
}

/// モデルを保存して保存先を表示
pub fn save_model<E: ClassificationEngine>(
    engine: &E,
    model: &E::Model,
    schema: &DataSchema,
    path: &Path,
) -> Result<()> {
    engine.save(model, schema, path)?;
    println!("\nModel saved to {}", path.display());
    Ok(())
}

/// フォルダ内の画像を1枚ずつ予測する
///
/// # 戻り値
/// - 列挙順の予測結果と、`None` 以外のラベルの件数
pub fn predict_folder<E: ClassificationEngine>(
    engine: &E,
    model: &E::Model,
    folder: &Path,
) -> Result<PredictionSummary> {
    let image_files = scan_images(folder)?;
    println!("\nFound {} images for prediction:", image_files.len());

    let mut summary = PredictionSummary::default();
    for image_path in &image_files {
        let predicted_label = engine.predict(model, image_path)?;
        let record = PredictionRecord::from_path(image_path, predicted_label);
        println!(
            "Image: {} -> Prediction: {}",
            record.image_name,
            record.predicted_label.as_deref().unwrap_or("")
        );
        summary.counts.record(record.predicted_label.as_deref());
        summary.predictions.push(record);
    }

    Ok(summary)
}

/// 予測結果をCSVに保存し、クラス分布を表示
pub fn report_predictions(summary: &PredictionSummary, csv_path: &Path) -> Result<()> {
    write_predictions_csv(csv_path, &summary.predictions)?;
    println!("\nPredictions saved to {}", csv_path.display());
    print_class_distribution(&summary.counts);
    Ok(())
}

/// 学習・評価・保存
pub fn train<E: ClassificationEngine>(
    engine: &E,
    config: &AppConfig,
    progress: &mut dyn FnMut(&TrainingEvent),
) -> Result<TrainOutcome<E::Model>> {
    let outcome = train_and_evaluate(engine, config, progress)?;
    save_model(engine, &outcome.model, &outcome.schema, &config.paths.model_path)?;
    Ok(outcome)
}

/// 全工程を実行（学習 → 評価 → 保存 → 一括予測 → CSV → クラス分布）
pub fn run<E: ClassificationEngine>(
    engine: &E,
    config: &AppConfig,
    progress: &mut dyn FnMut(&TrainingEvent),
) -> Result<(TrainOutcome<E::Model>, PredictionSummary)> {
    let outcome = train(engine, config, progress)?;
    let summary = predict_folder(engine, &outcome.model, &config.paths.test_images_dir)?;
    report_predictions(&summary, &config.paths.predictions_csv)?;
    Ok((outcome, summary))
}

/// 保存済みモデルで一括予測
pub fn predict_with_saved_model<E: ClassificationEngine>(
    engine: &E,
    config: &AppConfig,
) -> Result<PredictionSummary> {
    let (model, _schema) = engine.load(&config.paths.model_path)?;
    let summary = predict_folder(engine, &model, &config.paths.test_images_dir)?;
    report_predictions(&summary, &config.paths.predictions_csv)?;
    Ok(summary)
}

/// 保存済みモデルを同じ分割のテストデータで評価（詳細な指標も表示）
pub fn evaluate_saved_model<E: ClassificationEngine>(
    engine: &E,
    config: &AppConfig,
) -> Result<EvaluationMetrics> {
    let (model, _schema) = engine.load(&config.paths.model_path)?;
    let records = scan_dataset(&config.paths.dataset_dir)?;
    let split = engine.split(&records, config.training.test_fraction, config.training.seed)?;
    evaluate_model(engine, &model, &split.test, true)
}
