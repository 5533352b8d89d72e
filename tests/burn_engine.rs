//! burnエンジンの結合テスト（小型アーキテクチャ・CPUバックエンド）

use std::path::{Path, PathBuf};

use waste_classifier::backend::{cpu_device, CpuBackend, CpuTrainingBackend};
use waste_classifier::ml::{
    Architecture, BurnEngine, ClassificationEngine, FeatureExtractor, HeadConfig, ProgressDisplay,
    TrainerOptions, WasteModel,
};
use waste_classifier::model::{AppConfig, DeviceType, ModelMetadata, METADATA_FORMAT_VERSION};
use waste_classifier::{pipeline, LabeledImageRecord};

const LABELS: [&str; 3] = ["cardboard", "glass", "metal"];

fn write_image(path: &Path, color: [u8; 3]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    image::RgbImage::from_fn(16, 16, |x, y| {
        let shade = ((x + y) % 4) as u8 * 8;
        image::Rgb([color[0].saturating_add(shade), color[1], color[2]])
    })
    .save(path)
    .unwrap();
}

fn color(label_index: usize) -> [u8; 3] {
    match label_index {
        0 => [200, 150, 90],
        1 => [40, 180, 60],
        _ => [120, 120, 140],
    }
}

fn dataset(root: &Path, per_class: usize) -> Vec<LabeledImageRecord> {
    let mut records = Vec::new();
    for (i, label) in LABELS.iter().enumerate() {
        for n in 0..per_class {
            let path = root.join(label).join(format!("{}.png", n));
            write_image(&path, color(i));
            records.push(LabeledImageRecord::new(path, *label));
        }
    }
    records
}

/// 学習を経ずに組み立てたモデル
fn untrained_model(workspace: &Path) -> WasteModel<CpuBackend> {
    let device = cpu_device();
    let extractor =
        FeatureExtractor::<CpuBackend>::load_or_init(workspace, Architecture::Compact, &device).unwrap();
    let manifest = extractor.manifest().clone();
    let metadata = ModelMetadata {
        format_version: METADATA_FORMAT_VERSION,
        architecture: manifest.architecture,
        backbone_id: manifest.backbone_id.clone(),
        image_size: manifest.image_size,
        feature_size: manifest.feature_size,
        label_keys: LABELS.iter().map(|l| l.to_string()).collect(),
        feature_column: "ImagePath".to_string(),
        label_column: "Label".to_string(),
        num_epochs: 0,
        batch_size: 4,
        learning_rate: 0.01,
        num_train_samples: 0,
        num_validation_samples: 0,
        trained_at: "2024-01-01T00:00:00+00:00".to_string(),
    };
    let head = HeadConfig::new(manifest.feature_size, LABELS.len()).init::<CpuBackend>(&device);
    WasteModel::new(extractor, head, metadata)
}

#[test]
fn test_save_twice_and_reload_gives_identical_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let records = dataset(&dir.path().join("data"), 2);
    let engine = BurnEngine::<CpuTrainingBackend>::new(cpu_device()).with_batch_size(4);
    let model = untrained_model(&dir.path().join("ws"));
    let schema = TrainerOptions::default().schema();
    let path = dir.path().join("models").join("WasteClassificationModel.zip");

    let before = engine.evaluate(&model, &engine.transform(&model, &records).unwrap());
    engine.save(&model, &schema, &path).unwrap();
    engine.save(&model, &schema, &path).unwrap();

    let (reloaded, reloaded_schema) = engine.load(&path).unwrap();
    let after = engine.evaluate(&reloaded, &engine.transform(&reloaded, &records).unwrap());

    assert_eq!(reloaded_schema, schema);
    assert_eq!(before.micro_accuracy, after.micro_accuracy);
    assert_eq!(before.confusion_matrix, after.confusion_matrix);
    assert!((before.log_loss - after.log_loss).abs() < 1e-6);
}

#[test]
fn test_predictions_are_training_labels() {
    let dir = tempfile::tempdir().unwrap();
    let records = dataset(&dir.path().join("data"), 1);
    let engine = BurnEngine::<CpuTrainingBackend>::new(cpu_device());
    let model = untrained_model(&dir.path().join("ws"));

    for record in &records {
        let label = engine.predict(&model, &record.image_path).unwrap();
        assert!(LABELS.contains(&label.unwrap().as_str()));
    }
}

fn training_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.set_device_type(DeviceType::Cpu);
    config.paths.dataset_dir = root.join("WasteDataset");
    config.paths.test_images_dir = root.join("TestImages");
    config.paths.model_path = root.join("WasteClassificationModel.zip");
    config.paths.predictions_csv = root.join("Predictions.csv");
    config.paths.workspace_dir = root.join("Workspace");
    config.training.architecture = Architecture::Compact;
    config.training.num_epochs = 2;
    config.training.batch_size = 4;
    config.training.progress_display = ProgressDisplay::Log;
    config
}

#[test]
fn test_full_run_on_compact_architecture() {
    let dir = tempfile::tempdir().unwrap();
    let config = training_config(dir.path());
    dataset(&config.paths.dataset_dir, 5);
    let test_images: Vec<PathBuf> = (0..3)
        .map(|i| {
            let path = config.paths.test_images_dir.join(format!("new_{}.jpg", i));
            write_image(&path, color(i));
            path
        })
        .collect();

    let engine = BurnEngine::<CpuTrainingBackend>::new(cpu_device()).with_batch_size(4);
    let mut events = Vec::new();
    let (outcome, summary) = pipeline::run(&engine, &config, &mut |e| events.push(e.clone())).unwrap();

    assert_eq!(summary.predictions.len(), test_images.len());
    for prediction in &summary.predictions {
        let label = prediction.predicted_label.as_deref().unwrap();
        assert!(outcome.model.label_keys().iter().any(|k| k == label));
    }
    assert!(config.paths.workspace_dir.join("TrainSetBottleneckFile.json.gz").exists());
    assert!(config.paths.workspace_dir.join("ValidationSetBottleneckFile.json.gz").exists());

    // 2回目はボトルネック値を再利用する
    let retrained = engine
        .fit(
            &outcome.split.train,
            &outcome.split.test,
            &TrainerOptions::from_config(&config),
            &mut |e| events.push(e.clone()),
        )
        .unwrap();
    assert_eq!(retrained.label_keys(), outcome.model.label_keys());
    assert!(events.iter().any(|e| matches!(
        e,
        waste_classifier::ml::TrainingEvent::FeaturesReady { computed: 0, .. }
    )));

    let reloaded = pipeline::evaluate_saved_model(&engine, &config).unwrap();
    assert!((reloaded.micro_accuracy - outcome.metrics.micro_accuracy).abs() < 1e-9);
}
