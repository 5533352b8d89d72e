//! エラー定義
//!
//! 入力パス欠落・非対応ファイル・学習失敗・シリアライズ失敗・推論失敗を区別し、
//! 対象パスやレコードを添えて即座に中断します。

use std::path::PathBuf;

use thiserror::Error;

/// ライブラリ全体のエラー型
#[derive(Error, Debug)]
pub enum WasteError {
    /// 入力フォルダ（またはファイル）が存在しない・読めない
    #[error("input path not found or unreadable: {}", .0.display())]
    MissingInputPath(PathBuf),

    /// 画像として扱えないファイル
    #[error("unsupported file '{}': {reason}", path.display())]
    UnsupportedFile { path: PathBuf, reason: String },

    /// 学習処理の失敗
    #[error("training failed: {0}")]
    Training(String),

    /// モデル・キャッシュの保存／読み込み失敗
    #[error("serialization failed for '{}': {reason}", path.display())]
    Serialization { path: PathBuf, reason: String },

    /// 推論の失敗
    #[error("inference failed for '{}': {reason}", path.display())]
    Inference { path: PathBuf, reason: String },

    /// 設定値が不正
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WasteError {
    pub fn serialization(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Serialization {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn inference(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Inference {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::UnsupportedFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// ライブラリ共通のResult型
pub type Result<T> = std::result::Result<T, WasteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offending_path() {
        let err = WasteError::MissingInputPath(PathBuf::from("WasteDataset"));
        assert_eq!(
            err.to_string(),
            "input path not found or unreadable: WasteDataset"
        );

        let err = WasteError::inference("TestImages/a.jpg", "decode error");
        assert!(err.to_string().contains("TestImages/a.jpg"));
        assert!(err.to_string().contains("decode error"));
    }
}
