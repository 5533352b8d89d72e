//! データセットフォルダの走査
//!
//! ```text
//! WasteDataset/
//! ├── glass/
//! │   ├── b.png
//! │   └── batch2/c.jpg
//! └── plastic/
//!     └── a.jpg
//! ```
//!
//! ルート直下のサブディレクトリ名をクラスラベルとし、その配下を再帰的に走査します。
//! クラス・ファイルともに名前順に並べるため、同じフォルダからは常に同じ順序のレコードが得られます。

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Result, WasteError};
use crate::types::LabeledImageRecord;

/// 対象とする画像拡張子（大文字小文字は区別しない）
pub const IMAGE_EXTENSIONS: [&str; 2] = ["jpg", "png"];

/// 拡張子が `.jpg` / `.png` のファイルか
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// ルート直下のクラスディレクトリを名前順で返す
fn class_directories(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !root.is_dir() {
        return Err(WasteError::MissingInputPath(root.to_path_buf()));
    }

    let mut classes = Vec::new();
    let entries =
        std::fs::read_dir(root).map_err(|_| WasteError::MissingInputPath(root.to_path_buf()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let label = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| WasteError::unsupported(&path, "class directory name is not valid UTF-8"))?
            .to_string();
        classes.push((label, path));
    }

    classes.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(classes)
}

/// フォルダ配下の画像ファイルを再帰的に名前順で列挙
///
/// シンボリックリンクはリンク先をたどります（ループはエラー）。
pub fn scan_images(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(WasteError::MissingInputPath(folder.to_path_buf()));
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(folder).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            WasteError::MissingInputPath(e.path().map(Path::to_path_buf).unwrap_or_else(|| folder.to_path_buf()))
        })?;

        if entry.file_type().is_file() && is_supported_image(entry.path()) {
            images.push(entry.into_path());
        }
    }

    Ok(images)
}

/// データセットを走査してラベル付きレコードを作成
///
/// ラベルはファイルが属するクラスディレクトリ（ルート直下のサブディレクトリ）の名前です。
pub fn scan_dataset(root: &Path) -> Result<Vec<LabeledImageRecord>> {
    info!("Scanning dataset: {}", root.display());

    let mut records = Vec::new();
    for (label, class_dir) in class_directories(root)? {
        let images = scan_images(&class_dir)?;
        debug!("  class '{}': {} images", label, images.len());

        records.extend(
            images
                .into_iter()
                .map(|path| LabeledImageRecord::new(path, label.clone())),
        );
    }

    info!("Found {} labeled images", records.len());
    Ok(records)
}
