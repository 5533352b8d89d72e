//! ログ初期化
//!
//! `tracing` によるログ出力を設定します。`RUST_LOG` が設定されていればそちらを優先します。

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 既定のログレベル（"info", "debug" など）
    pub level: String,
    /// モジュールパスを表示するか
    pub include_target: bool,
    /// ANSIカラーを使うか
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// デバッグ用の詳細設定
    pub fn verbose() -> Self {
        Self {
            level: "debug".to_string(),
            include_target: true,
            ..Self::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// グローバルサブスクライバを登録する
///
/// 2回目以降の呼び出しはエラーを返します（テストから複数回呼ばれても問題ありません）。
pub fn init_logging(config: &LogConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(config.filter())
        .with(
            fmt::layer()
                .with_target(config.include_target)
                .with_ansi(config.ansi_colors)
                .with_writer(std::io::stderr),
        )
        .try_init()
}
