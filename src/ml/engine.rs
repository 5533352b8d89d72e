//! 分類エンジンの抽象化
//!
//! パイプラインは `ClassificationEngine` だけを通して分割・学習・評価・保存・予測を行います。
//! 本番の実装は burn を使う `BurnEngine` です。

use std::path::{Path, PathBuf};

use burn::tensor::backend::AutodiffBackend;
use tracing::info;

use crate::dataset::train_test_split;
use crate::error::{Result, WasteError};
use crate::ml::backbone::Architecture;
use crate::ml::bottleneck::{FeatureExtractor, SplitKind};
use crate::ml::inference::WasteModel;
use crate::ml::metrics::{evaluate, EvaluationMetrics, ScoredRecord};
use crate::ml::training::{
    train_head, FeatureDataset, FeatureItem, HeadTrainingOptions, ProgressDisplay, TrainingEvent,
};
use crate::model::{AppConfig, DataSchema, ModelMetadata, METADATA_FORMAT_VERSION};
use crate::types::{LabeledImageRecord, TrainTestSplit};

/// 学習の設定
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerOptions {
    pub feature_column: String,
    pub label_column: String,
    pub architecture: Architecture,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub dropout: f64,
    pub reuse_train_bottleneck: bool,
    pub reuse_validation_bottleneck: bool,
    pub progress_display: ProgressDisplay,
    /// バックボーンへ読み込む学習済み重み
    pub pretrained_weights: Option<PathBuf>,
    /// バックボーンとボトルネックキャッシュの置き場所
    pub workspace_dir: PathBuf,
}

impl TrainerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let training = &config.training;
        Self {
            feature_column: training.feature_column.clone(),
            label_column: training.label_column.clone(),
            architecture: training.architecture,
            num_epochs: training.num_epochs,
            batch_size: training.batch_size,
            learning_rate: training.learning_rate,
            seed: training.seed,
            dropout: training.dropout,
            reuse_train_bottleneck: training.reuse_train_bottleneck,
            reuse_validation_bottleneck: training.reuse_validation_bottleneck,
            progress_display: training.progress_display,
            pretrained_weights: training.pretrained_weights.clone(),
            workspace_dir: config.paths.workspace_dir.clone(),
        }
    }

    /// 保存するスキーマ
    pub fn schema(&self) -> DataSchema {
        DataSchema::image_classification(&self.feature_column, &self.label_column)
    }
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 分類エンジン
pub trait ClassificationEngine {
    /// 学習済みモデル
    type Model;

    /// 学習用とテスト用に分割
    fn split(
        &self,
        records: &[LabeledImageRecord],
        test_fraction: f64,
        seed: u64,
    ) -> Result<TrainTestSplit> {
        train_test_split(records, test_fraction, seed)
    }

    /// モデルを学習
    fn fit(
        &self,
        train: &[LabeledImageRecord],
        validation: &[LabeledImageRecord],
        options: &TrainerOptions,
        progress: &mut dyn FnMut(&TrainingEvent),
    ) -> Result<Self::Model>;

    /// レコードをまとめて推論
    fn transform(&self, model: &Self::Model, records: &[LabeledImageRecord]) -> Result<Vec<ScoredRecord>>;

    /// モデルのラベル（キー順）
    fn label_keys<'a>(&self, model: &'a Self::Model) -> &'a [String];

    /// 推論結果から評価指標を計算
    fn evaluate(&self, model: &Self::Model, scored: &[ScoredRecord]) -> EvaluationMetrics;

    /// モデルとスキーマを保存
    fn save(&self, model: &Self::Model, schema: &DataSchema, path: &Path) -> Result<()>;

    /// 保存したモデルを読み込む
    fn load(&self, path: &Path) -> Result<(Self::Model, DataSchema)>;

    /// 画像1枚のラベルを予測
    fn predict(&self, model: &Self::Model, image_path: &Path) -> Result<Option<String>>;
}

/// ラベルの一覧（初出順、重複なし）
pub fn label_keys(records: &[LabeledImageRecord]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for record in records {
        if !keys.contains(&record.label) {
            keys.push(record.label.clone());
        }
    }
    keys
}

/// burnによるエンジン
pub struct BurnEngine<B: AutodiffBackend> {
    device: B::Device,
    /// 評価・推論時にバックボーンへ一度に渡す枚数
    batch_size: usize,
}

impl<B: AutodiffBackend> BurnEngine<B> {
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            batch_size: 10,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn features(
        &self,
        extractor: &FeatureExtractor<B::InnerBackend>,
        records: &[LabeledImageRecord],
        keys: &[String],
        split: SplitKind,
        options: &TrainerOptions,
        progress: &mut dyn FnMut(&TrainingEvent),
    ) -> Result<FeatureDataset> {
        let reuse = match split {
            SplitKind::Train => options.reuse_train_bottleneck,
            SplitKind::Validation => options.reuse_validation_bottleneck,
        };
        let paths: Vec<PathBuf> = records.iter().map(|r| r.image_path.clone()).collect();
        let values = extractor.cached_features(&paths, split, &options.workspace_dir, reuse, options.batch_size)?;
        progress(&TrainingEvent::FeaturesReady {
            split,
            computed: values.computed,
            reused: values.reused,
        });

        let items = records
            .iter()
            .zip(values.features)
            .map(|(record, features)| {
                let label = keys
                    .iter()
                    .position(|k| *k == record.label)
                    .ok_or_else(|| WasteError::Training(format!("unmapped label '{}'", record.label)))?;
                Ok(FeatureItem { features, label })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FeatureDataset::new(items))
    }
}

impl<B: AutodiffBackend> ClassificationEngine for BurnEngine<B> {
    type Model = WasteModel<B::InnerBackend>;

    fn fit(
        &self,
        train: &[LabeledImageRecord],
        validation: &[LabeledImageRecord],
        options: &TrainerOptions,
        progress: &mut dyn FnMut(&TrainingEvent),
    ) -> Result<Self::Model> {
        if train.is_empty() {
            return Err(WasteError::Training("training set is empty".to_string()));
        }

        let all: Vec<LabeledImageRecord> = train.iter().chain(validation).cloned().collect();
        let keys = label_keys(&all);
        info!("Labels ({}): {}", keys.len(), keys.join(", "));

        let extractor = FeatureExtractor::<B::InnerBackend>::load_or_import(
            &options.workspace_dir,
            options.architecture,
            options.pretrained_weights.as_deref(),
            &self.device,
        )?;

        let train_set = self.features(
            &extractor,
            train,
            &keys,
            SplitKind::Train,
            options,
            progress,
        )?;
        let valid_set = self.features(
            &extractor,
            validation,
            &keys,
            SplitKind::Validation,
            options,
            progress,
        )?;

        let manifest = extractor.manifest().clone();
        let head = train_head::<B>(
            train_set,
            valid_set,
            manifest.feature_size,
            keys.len(),
            &HeadTrainingOptions {
                num_epochs: options.num_epochs,
                batch_size: options.batch_size,
                learning_rate: options.learning_rate,
                dropout: options.dropout,
                seed: options.seed,
                progress_display: options.progress_display,
            },
            &self.device,
            progress,
        )?;

        let metadata = ModelMetadata {
            format_version: METADATA_FORMAT_VERSION,
            architecture: manifest.architecture,
            backbone_id: manifest.backbone_id,
            image_size: manifest.image_size,
            feature_size: manifest.feature_size,
            label_keys: keys,
            feature_column: options.feature_column.clone(),
            label_column: options.label_column.clone(),
            num_epochs: options.num_epochs,
            batch_size: options.batch_size,
            learning_rate: options.learning_rate,
            num_train_samples: train.len(),
            num_validation_samples: validation.len(),
            trained_at: chrono::Local::now().to_rfc3339(),
        };

        Ok(WasteModel::new(extractor, head, metadata))
    }

    fn transform(&self, model: &Self::Model, records: &[LabeledImageRecord]) -> Result<Vec<ScoredRecord>> {
        model.score_records(records, self.batch_size)
    }

    fn label_keys<'a>(&self, model: &'a Self::Model) -> &'a [String] {
        model.label_keys()
    }

    fn evaluate(&self, model: &Self::Model, scored: &[ScoredRecord]) -> EvaluationMetrics {
        evaluate(scored, model.metadata().num_classes())
    }

    fn save(&self, model: &Self::Model, schema: &DataSchema, path: &Path) -> Result<()> {
        model.save(schema, path)
    }

    fn load(&self, path: &Path) -> Result<(Self::Model, DataSchema)> {
        WasteModel::load(path, &self.device)
    }

    fn predict(&self, model: &Self::Model, image_path: &Path) -> Result<Option<String>> {
        model.classify_image(image_path)
    }
}
