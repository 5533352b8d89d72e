pub mod backbone;
pub mod bottleneck;
pub mod engine;
pub mod inference;
pub mod metrics;
pub mod ml_model;
pub mod pretrained;
pub mod training;

pub use backbone::{Architecture, BackboneConfig, ResidualBackbone};
pub use bottleneck::{BackboneManifest, BottleneckCache, FeatureExtractor, SplitKind};
pub use engine::{BurnEngine, ClassificationEngine, TrainerOptions};
pub use inference::WasteModel;
pub use metrics::{evaluate, EvaluationMetrics, ScoredRecord};
pub use ml_model::{load_and_normalize_image, ClassifierHead, HeadConfig};
pub use pretrained::{import_backbone, ImportReport, WeightFormat};
pub use training::{
    train_head, FeatureDataset, HeadTrainingOptions, LogRenderer, ProgressDisplay, TrainingEvent,
};
