//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・入出力パス・学習設定をJSON形式で保存・読み込みします。
//! 既定値はそのままバッチ実行できる値（`WasteDataset` → `Predictions.csv`）です。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Result, WasteError};
use crate::ml::{Architecture, ProgressDisplay};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 入出力パス設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathSettings {
    /// 学習データセットのルート（直下のサブディレクトリ = クラス）
    pub dataset_dir: PathBuf,
    /// 一括予測する画像フォルダ
    pub test_images_dir: PathBuf,
    /// 学習済みモデルの保存先
    pub model_path: PathBuf,
    /// 予測結果CSVの保存先
    pub predictions_csv: PathBuf,
    /// バックボーン重みとボトルネックキャッシュの置き場所
    pub workspace_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("WasteDataset"),
            test_images_dir: PathBuf::from("TestImages"),
            model_path: PathBuf::from("WasteClassificationModel.zip"),
            predictions_csv: PathBuf::from("Predictions.csv"),
            workspace_dir: PathBuf::from("Workspace"),
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSettings {
    /// 特徴量列（画像パス）
    pub feature_column: String,
    /// ラベル列
    pub label_column: String,
    /// バックボーンのアーキテクチャ
    pub architecture: Architecture,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード（分割と初期化に使用）
    pub seed: u64,
    /// テストデータの割合
    pub test_fraction: f64,
    /// 分類ヘッドのドロップアウト率
    #[serde(default)]
    pub dropout: f64,
    /// 学習データのボトルネック値キャッシュを再利用するか
    pub reuse_train_bottleneck: bool,
    /// 検証データのボトルネック値キャッシュを再利用するか
    pub reuse_validation_bottleneck: bool,
    /// 学習中の指標の表示方法
    #[serde(default)]
    pub progress_display: ProgressDisplay,
    /// バックボーンへ読み込む学習済み重み（safetensors / PyTorch）
    #[serde(default)]
    pub pretrained_weights: Option<PathBuf>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            feature_column: "ImagePath".to_string(),
            label_column: "Label".to_string(),
            architecture: Architecture::ResnetV2_101,
            num_epochs: 10,
            batch_size: 10,
            learning_rate: 0.01,
            seed: 1,
            test_fraction: 0.2,
            dropout: 0.0,
            reuse_train_bottleneck: true,
            reuse_validation_bottleneck: true,
            progress_display: ProgressDisplay::Dashboard,
            pretrained_weights: None,
        }
    }
}

impl TrainingSettings {
    /// 値の範囲をチェック
    pub fn validate(&self) -> Result<()> {
        if self.num_epochs == 0 {
            return Err(WasteError::Config("num_epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(WasteError::Config("batch_size must be at least 1".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(WasteError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.test_fraction) {
            return Err(WasteError::Config(format!(
                "test_fraction must be within [0, 1], got {}",
                self.test_fraction
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(WasteError::Config(format!(
                "dropout must be within [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// 入出力パス
    #[serde(default)]
    pub paths: PathSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// 学習後の評価で詳細な指標（混同行列など）も表示するか
    #[serde(default)]
    pub detailed_metrics: bool,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| WasteError::MissingInputPath(path.to_path_buf()))?;
        let config: AppConfig =
            serde_json::from_str(&content).map_err(|e| WasteError::serialization(path, e))?;
        config.training.validate()?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない場合はデフォルト設定を返す
    ///
    /// ファイルが存在して読み込めない場合はエラーにします（黙って既定値に戻さない）。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            info!("Loaded configuration: {}", path.display());
            Ok(config)
        } else {
            warn!(
                "Configuration file not found ({}), using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).map_err(|e| WasteError::serialization(path, e))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 計算デバイスを設定
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== Configuration ===");
        println!("Device: {}", self.device_type);
        println!("Dataset: {}", self.paths.dataset_dir.display());
        println!("Test images: {}", self.paths.test_images_dir.display());
        println!("Model: {}", self.paths.model_path.display());
        println!("Predictions CSV: {}", self.paths.predictions_csv.display());
        println!("Workspace: {}", self.paths.workspace_dir.display());
        println!("\n--- Training ---");
        println!("Architecture: {}", self.training.architecture);
        println!("Epochs: {}", self.training.num_epochs);
        println!("Batch size: {}", self.training.batch_size);
        println!("Learning rate: {}", self.training.learning_rate);
        println!("Seed: {}", self.training.seed);
        println!("Test fraction: {}", self.training.test_fraction);
        println!(
            "Reuse bottleneck cache (train/validation): {}/{}",
            self.training.reuse_train_bottleneck, self.training.reuse_validation_bottleneck
        );
        if let Some(weights) = &self.training.pretrained_weights {
            println!("Pretrained weights: {}", weights.display());
        }
        println!("Detailed metrics: {}", self.detailed_metrics);
        println!("=====================\n");
    }
}
