//! ゴミ画像分類器
//!
//! クラスごとのフォルダに分けた画像で分類モデルを学習・評価・保存し、
//! 別フォルダの画像を一括予測して CSV とクラス分布を出力します。

pub mod backend;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod ml;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod types;

pub use error::{Result, WasteError};
pub use types::{ClassCounts, LabeledImageRecord, PredictionRecord, TrainTestSplit};
