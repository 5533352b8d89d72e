//! 分類ヘッドの学習
//!
//! ボトルネック特徴量を入力に、burnの `Learner` で線形ヘッドだけを学習します。
//! エポックごとの指標は burn のダッシュボード、または `LogRenderer` 経由でログへ出力します。

use std::collections::BTreeMap;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    optim::AdamConfig,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{
        metric::{AccuracyMetric, LossMetric, MetricEntry},
        renderer::{
            EvaluationName, EvaluationProgress, MetricState, MetricsRenderer, MetricsRendererEvaluation,
            MetricsRendererTraining, TrainingProgress,
        },
        ClassificationOutput, LearnerBuilder, LearnerSummary, LearningStrategy, TrainOutput, TrainStep,
        ValidStep,
    },
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, WasteError};
use crate::ml::bottleneck::SplitKind;
use crate::ml::ml_model::{ClassifierHead, HeadConfig};

/// 学習の進捗イベント
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    /// ある分割のボトルネック特徴量がそろった
    FeaturesReady {
        split: SplitKind,
        computed: usize,
        reused: usize,
    },
    /// ヘッドの学習を開始
    TrainingStarted {
        num_epochs: usize,
        num_train: usize,
        num_validation: usize,
    },
    /// 全エポック終了
    TrainingFinished { num_epochs: usize },
}

impl std::fmt::Display for TrainingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingEvent::FeaturesReady {
                split,
                computed,
                reused,
            } => write!(
                f,
                "{} bottleneck values ready: {} computed, {} reused",
                split, computed, reused
            ),
            TrainingEvent::TrainingStarted {
                num_epochs,
                num_train,
                num_validation,
            } => write!(
                f,
                "Training for {} epochs on {} images ({} validation)",
                num_epochs, num_train, num_validation
            ),
            TrainingEvent::TrainingFinished { num_epochs } => {
                write!(f, "Training finished after {} epochs", num_epochs)
            }
        }
    }
}

/// 学習中の指標の表示方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProgressDisplay {
    /// burn 標準（端末ならダッシュボード）
    #[default]
    Dashboard,
    /// エポックごとの指標をログへ出力
    Log,
}

/// ヘッド学習のハイパーパラメータ
#[derive(Debug, Clone, PartialEq)]
pub struct HeadTrainingOptions {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub dropout: f64,
    /// 学習データのシャッフルに使うシード
    pub seed: u64,
    pub progress_display: ProgressDisplay,
}

/// 特徴量1件
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureItem {
    pub features: Vec<f32>,
    pub label: usize,
}

/// メモリ上の特徴量データセット
#[derive(Clone, Debug, Default)]
pub struct FeatureDataset {
    items: Vec<FeatureItem>,
}

impl FeatureDataset {
    pub fn new(items: Vec<FeatureItem>) -> Self {
        Self { items }
    }
}

impl Dataset<FeatureItem> for FeatureDataset {
    fn get(&self, index: usize) -> Option<FeatureItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// バッチャー
#[derive(Clone)]
pub struct FeatureBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> FeatureBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct FeatureBatch<B: Backend> {
    pub features: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, FeatureItem, FeatureBatch<B>> for FeatureBatcher<B> {
    fn batch(&self, items: Vec<FeatureItem>, _device: &B::Device) -> FeatureBatch<B> {
        let batch_size = items.len();
        let feature_size = items.first().map_or(0, |item| item.features.len());

        let mut all_features = Vec::with_capacity(batch_size * feature_size);
        let mut targets_vec = Vec::with_capacity(batch_size);
        for item in items {
            all_features.extend_from_slice(&item.features);
            targets_vec.push(item.label as i64);
        }

        let features = Tensor::<B, 1>::from_floats(all_features.as_slice(), &self.device)
            .reshape([batch_size, feature_size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        FeatureBatch { features, targets }
    }
}

impl<B: AutodiffBackend> TrainStep<FeatureBatch<B>, ClassificationOutput<B>> for ClassifierHead<B> {
    fn step(&self, batch: FeatureBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.features, batch.targets);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<FeatureBatch<B>, ClassificationOutput<B>> for ClassifierHead<B> {
    fn step(&self, batch: FeatureBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.features, batch.targets)
    }
}

/// エポックごとの指標を `tracing` で出力するレンダラー
#[derive(Debug, Default)]
pub struct LogRenderer {
    epoch: usize,
    epoch_total: usize,
    train: BTreeMap<String, String>,
    valid: BTreeMap<String, String>,
}

impl LogRenderer {
    fn entry(state: MetricState) -> MetricEntry {
        match state {
            MetricState::Generic(entry) | MetricState::Numeric(entry, _) => entry,
        }
    }

    fn format(metrics: &BTreeMap<String, String>) -> String {
        metrics
            .iter()
            .map(|(name, value)| format!("{} {}", name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// 直前のエポックの指標を出力
    fn flush(&mut self) {
        if self.train.is_empty() && self.valid.is_empty() {
            return;
        }
        info!(
            "Epoch {}/{} - train: [{}] valid: [{}]",
            self.epoch,
            self.epoch_total,
            Self::format(&self.train),
            Self::format(&self.valid)
        );
        self.train.clear();
        self.valid.clear();
    }

    fn advance(&mut self, item: &TrainingProgress) {
        if item.epoch != self.epoch {
            self.flush();
            self.epoch = item.epoch;
            self.epoch_total = item.epoch_total;
        }
    }
}

impl MetricsRendererTraining for LogRenderer {
    fn update_train(&mut self, state: MetricState) {
        let entry = Self::entry(state);
        self.train.insert(entry.name.to_string(), entry.formatted);
    }

    fn update_valid(&mut self, state: MetricState) {
        let entry = Self::entry(state);
        self.valid.insert(entry.name.to_string(), entry.formatted);
    }

    fn render_train(&mut self, item: TrainingProgress) {
        self.advance(&item);
        debug!("Epoch {} iteration {}", item.epoch, item.iteration);
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        self.advance(&item);
    }

    fn on_train_end(
        &mut self,
        summary: Option<LearnerSummary>,
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        self.flush();
        if let Some(summary) = summary {
            info!("{}", summary);
        }
        Ok(())
    }
}

impl MetricsRendererEvaluation for LogRenderer {
    fn update_test(&mut self, _name: EvaluationName, _state: MetricState) {}

    fn render_test(&mut self, _item: EvaluationProgress) {}
}

impl MetricsRenderer for LogRenderer {
    fn manual_close(&mut self) {}
}

/// 分類ヘッドを学習
///
/// # 引数
/// - `train`: 学習用特徴量
/// - `valid`: 検証用特徴量（空なら学習用をそのまま使う）
/// - `feature_size`: 特徴量の次元
/// - `num_classes`: クラス数
///
/// # 戻り値
/// - 学習済みヘッド（推論用バックエンド）
pub fn train_head<B: AutodiffBackend>(
    train: FeatureDataset,
    valid: FeatureDataset,
    feature_size: usize,
    num_classes: usize,
    options: &HeadTrainingOptions,
    device: &B::Device,
    progress: &mut dyn FnMut(&TrainingEvent),
) -> Result<ClassifierHead<B::InnerBackend>> {
    if train.is_empty() {
        return Err(WasteError::Training("training set is empty".to_string()));
    }
    if num_classes == 0 {
        return Err(WasteError::Training("no labels to learn".to_string()));
    }
    let valid = if valid.is_empty() {
        warn!("Validation set is empty, validating on the training set");
        train.clone()
    } else {
        valid
    };

    progress(&TrainingEvent::TrainingStarted {
        num_epochs: options.num_epochs,
        num_train: train.len(),
        num_validation: valid.len(),
    });
    info!(
        "Training head: {} features -> {} classes, {} epochs, batch size {}, learning rate {}",
        feature_size, num_classes, options.num_epochs, options.batch_size, options.learning_rate
    );

    let batcher_train = FeatureBatcher::<B>::new(device.clone());
    let batcher_valid = FeatureBatcher::<B::InnerBackend>::new(device.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(options.batch_size)
        .shuffle(options.seed)
        .num_workers(0)
        .build(train);
    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(options.batch_size)
        .num_workers(0)
        .build(valid);

    let model = HeadConfig::new(feature_size, num_classes)
        .with_dropout(options.dropout)
        .init::<B>(device);

    // 学習ログの一時ディレクトリ（学習ごとに別、終了時に削除）
    let artifact_dir = tempfile::Builder::new()
        .prefix("waste_classifier_training_")
        .tempdir()?;
    debug!("Training artifacts: {}", artifact_dir.path().display());

    let builder = LearnerBuilder::new(artifact_dir.path())
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_application_logger(None)
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(options.num_epochs)
        .summary();
    let builder = match options.progress_display {
        ProgressDisplay::Dashboard => builder,
        ProgressDisplay::Log => builder.renderer(LogRenderer::default()),
    };
    let learner = builder.build(model, AdamConfig::new().init(), options.learning_rate);

    let trained = learner.fit(dataloader_train, dataloader_valid);

    let artifact_path = artifact_dir.path().to_path_buf();
    if let Err(e) = artifact_dir.close() {
        debug!("Could not remove {}: {}", artifact_path.display(), e);
    }

    progress(&TrainingEvent::TrainingFinished {
        num_epochs: options.num_epochs,
    });

    Ok(trained.model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{cpu_device, CpuBackend, CpuTrainingBackend};

    fn items() -> Vec<FeatureItem> {
        vec![
            FeatureItem {
                features: vec![1.0, 0.0, 0.0],
                label: 0,
            },
            FeatureItem {
                features: vec![0.0, 1.0, 0.0],
                label: 1,
            },
            FeatureItem {
                features: vec![0.0, 0.0, 1.0],
                label: 2,
            },
        ]
    }

    #[test]
    fn test_feature_dataset() {
        let dataset = FeatureDataset::new(items());
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.get(1).unwrap().label, 1);
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn test_batcher_shapes() {
        let device = cpu_device();
        let batcher = FeatureBatcher::<CpuBackend>::new(device.clone());
        let batch = batcher.batch(items(), &device);

        assert_eq!(batch.features.dims(), [3, 3]);
        let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![0, 1, 2]);
    }

    #[test]
    fn test_train_step_produces_loss() {
        let device = cpu_device();
        let head = HeadConfig::new(3, 3).init::<CpuTrainingBackend>(&device);
        let batch = FeatureBatcher::<CpuTrainingBackend>::new(device.clone()).batch(items(), &device);

        let output = TrainStep::step(&head, batch);
        let loss: Vec<f32> = output.item.loss.into_data().to_vec().unwrap();
        assert!(loss[0].is_finite());
        assert!(loss[0] > 0.0);
    }

    fn options(num_epochs: usize) -> HeadTrainingOptions {
        HeadTrainingOptions {
            num_epochs,
            batch_size: 2,
            learning_rate: 0.1,
            dropout: 0.0,
            seed: 1,
            progress_display: ProgressDisplay::Log,
        }
    }

    #[test]
    fn test_train_head_fits_separable_features() {
        let device = cpu_device();
        let mut events = Vec::new();
        let head = train_head::<CpuTrainingBackend>(
            FeatureDataset::new(vec![items(); 4].concat()),
            FeatureDataset::new(items()),
            3,
            3,
            &options(10),
            &device,
            &mut |e| events.push(e.clone()),
        )
        .unwrap();

        assert_eq!(head.dims(), [3, 3]);
        assert_eq!(
            events,
            vec![
                TrainingEvent::TrainingStarted {
                    num_epochs: 10,
                    num_train: 12,
                    num_validation: 3,
                },
                TrainingEvent::TrainingFinished { num_epochs: 10 },
            ]
        );

        let features = Tensor::<CpuBackend, 1>::from_floats(
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            &device,
        )
        .reshape([3, 3]);
        let probs: Vec<f32> = head.forward_probabilities(features).into_data().to_vec().unwrap();
        let predicted: Vec<usize> = probs.chunks(3).map(crate::ml::metrics::argmax).collect();
        assert_eq!(predicted, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_validation_set_falls_back_to_training_set() {
        let device = cpu_device();
        let mut events = Vec::new();
        train_head::<CpuTrainingBackend>(
            FeatureDataset::new(items()),
            FeatureDataset::default(),
            3,
            3,
            &options(1),
            &device,
            &mut |e| events.push(e.clone()),
        )
        .unwrap();

        assert_eq!(
            events[0],
            TrainingEvent::TrainingStarted {
                num_epochs: 1,
                num_train: 3,
                num_validation: 3,
            }
        );
    }

    #[test]
    fn test_log_renderer_groups_metrics_by_epoch() {
        let mut renderer = LogRenderer::default();
        renderer.update_train(MetricState::Generic(MetricEntry::new(
            std::sync::Arc::new("Loss".to_string()),
            "0.500".to_string(),
            "0.5".to_string(),
        )));
        assert_eq!(LogRenderer::format(&renderer.train), "Loss 0.500");

        renderer.on_train_end(None).unwrap();
        assert!(renderer.train.is_empty());
    }

    #[test]
    fn test_empty_training_set_is_rejected() {
        let device = cpu_device();
        let options = options(1);
        let mut events = Vec::new();
        let result = train_head::<CpuTrainingBackend>(
            FeatureDataset::default(),
            FeatureDataset::default(),
            3,
            3,
            &options,
            &device,
            &mut |e| events.push(e.clone()),
        );

        assert!(matches!(result, Err(WasteError::Training(_))));
        assert!(events.is_empty());
    }

    #[test]
    fn test_event_display() {
        let event = TrainingEvent::FeaturesReady {
            split: SplitKind::Train,
            computed: 3,
            reused: 5,
        };
        assert_eq!(
            event.to_string(),
            "TrainSet bottleneck values ready: 3 computed, 5 reused"
        );
    }
}
