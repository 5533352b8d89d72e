//! モデルとメタデータの永続化
//!
//! Zip形式でモデルの重み・メタデータ・スキーマを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（zip内部）:
//! - metadata.json   - メタデータ（ラベル対応、アーキテクチャ、学習設定など）
//! - schema.json     - 学習データの入力スキーマ
//! - backbone.bin    - バックボーンの重み（バイナリ）
//! - head.bin        - 分類ヘッドの重み（バイナリ）

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::info;

use crate::error::{Result, WasteError};
use crate::model::model_metadata::{DataSchema, ModelMetadata};

const METADATA_ENTRY: &str = "metadata.json";
const SCHEMA_ENTRY: &str = "schema.json";
const BACKBONE_ENTRY: &str = "backbone.bin";
const HEAD_ENTRY: &str = "head.bin";

/// zipに格納する内容
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArchive {
    pub metadata: ModelMetadata,
    pub schema: DataSchema,
    pub backbone: Vec<u8>,
    pub head: Vec<u8>,
}

/// モデルをZip形式で保存（既存ファイルは上書き）
pub fn save_model_archive(output_path: &Path, archive: &ModelArchive) -> Result<()> {
    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let zip_err = |e: zip::result::ZipError| WasteError::serialization(output_path, e);

    let file = File::create(output_path).map_err(|e| WasteError::serialization(output_path, e))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let metadata_json = archive.metadata.to_json_string()?;
    let schema_json = serde_json::to_string_pretty(&archive.schema)
        .map_err(|e| WasteError::serialization(output_path, e))?;
    let entries: [(&str, &[u8]); 4] = [
        (METADATA_ENTRY, metadata_json.as_bytes()),
        (SCHEMA_ENTRY, schema_json.as_bytes()),
        (BACKBONE_ENTRY, &archive.backbone),
        (HEAD_ENTRY, &archive.head),
    ];
    for (name, data) in entries {
        zip.start_file(name, options).map_err(zip_err)?;
        zip.write_all(data)?;
    }
    zip.finish().map_err(zip_err)?;

    info!("Saved model to {}", output_path.display());
    Ok(())
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    path: &Path,
) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| WasteError::serialization(path, format!("{}: {}", name, e)))?;
    let mut buffer = Vec::new();
    entry.read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<File>> {
    let file = File::open(path).map_err(|_| WasteError::MissingInputPath(path.to_path_buf()))?;
    zip::ZipArchive::new(file).map_err(|e| WasteError::serialization(path, e))
}

fn parse_metadata(bytes: Vec<u8>, path: &Path) -> Result<ModelMetadata> {
    let json = String::from_utf8(bytes).map_err(|e| WasteError::serialization(path, e))?;
    ModelMetadata::from_json_string(&json)
}

/// Zipからモデル全体を読み込む
pub fn load_model_archive(path: &Path) -> Result<ModelArchive> {
    let mut archive = open_archive(path)?;

    let metadata = parse_metadata(read_entry(&mut archive, METADATA_ENTRY, path)?, path)?;
    let schema: DataSchema = serde_json::from_slice(&read_entry(&mut archive, SCHEMA_ENTRY, path)?)
        .map_err(|e| WasteError::serialization(path, e))?;
    let backbone = read_entry(&mut archive, BACKBONE_ENTRY, path)?;
    let head = read_entry(&mut archive, HEAD_ENTRY, path)?;

    Ok(ModelArchive {
        metadata,
        schema,
        backbone,
        head,
    })
}

/// Zipからメタデータとスキーマだけを読み込む
pub fn load_metadata(path: &Path) -> Result<(ModelMetadata, DataSchema)> {
    let mut archive = open_archive(path)?;
    let metadata = parse_metadata(read_entry(&mut archive, METADATA_ENTRY, path)?, path)?;
    let schema: DataSchema = serde_json::from_slice(&read_entry(&mut archive, SCHEMA_ENTRY, path)?)
        .map_err(|e| WasteError::serialization(path, e))?;
    Ok((metadata, schema))
}
