pub mod config;
pub mod model_metadata;
pub mod model_storage;

pub use config::{AppConfig, DeviceType, PathSettings, TrainingSettings};
pub use model_metadata::{ColumnType, DataSchema, ModelMetadata, SchemaColumn, METADATA_FORMAT_VERSION};
pub use model_storage::{load_metadata, load_model_archive, save_model_archive, ModelArchive};
