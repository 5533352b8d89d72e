//! 学習済みバックボーン重みの取り込み
//!
//! timm の ResNetV2 形式（safetensors または PyTorch の `.pt` / `.pth`）のキーを
//! `ResidualBackbone` のフィールド名へ付け替えて読み込みます。
//! BatchNorm の `weight` / `bias` は `gamma` / `beta` に変換されます。

use std::path::Path;

use burn::tensor::backend::Backend;
use burn_store::{
    ApplyResult, KeyRemapper, ModuleSnapshot, PyTorchToBurnAdapter, PytorchStore, SafetensorsStore,
};
use tracing::{debug, info, warn};

use crate::error::{Result, WasteError};
use crate::ml::backbone::{BackboneConfig, ResidualBackbone};

/// 重みファイルの形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    Safetensors,
    Pytorch,
}

impl WeightFormat {
    /// 拡張子から形式を判定
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("safetensors") => Ok(Self::Safetensors),
            Some("pt") | Some("pth") => Ok(Self::Pytorch),
            _ => Err(WasteError::unsupported(
                path,
                "expected a .safetensors, .pt or .pth weight file",
            )),
        }
    }
}

/// 取り込み結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// 読み込んだテンソル数
    pub applied: usize,
    /// ファイルに無かったバックボーンのテンソル
    pub missing: Vec<String>,
    /// バックボーンに対応しなかったファイルのテンソル
    pub unused: Vec<String>,
}

impl From<ApplyResult> for ImportReport {
    fn from(result: ApplyResult) -> Self {
        Self {
            applied: result.applied.len(),
            missing: result.missing,
            unused: result.unused,
        }
    }
}

/// timm のブロック接頭辞と `blocks` の通し番号の対応
///
/// `stages.{s}.blocks.{b}` → `{s}` 段目までのブロック数 + `{b}`
pub fn block_prefixes(config: &BackboneConfig) -> Vec<(String, usize)> {
    let mut prefixes = Vec::new();
    let mut flat = 0;
    for (stage, &num_blocks) in config.stage_blocks.iter().enumerate() {
        for block in 0..num_blocks {
            prefixes.push((format!("stages.{}.blocks.{}", stage, block), flat));
            flat += 1;
        }
    }
    prefixes
}

/// timm のキーをバックボーンのフィールド名へ変換する規則
fn timm_remapper(config: &BackboneConfig) -> Result<KeyRemapper> {
    let mut patterns: Vec<(String, String)> = block_prefixes(config)
        .into_iter()
        .map(|(prefix, flat)| {
            (
                format!(r"^{}\.", prefix.replace('.', r"\.")),
                format!("blocks.{}.", flat),
            )
        })
        .collect();
    patterns.push((r"\.downsample\.conv\.".to_string(), ".shortcut.".to_string()));
    patterns.push((r"^stem\.conv\.".to_string(), "stem.".to_string()));
    patterns.push((r"^norm\.".to_string(), "post_norm.".to_string()));

    KeyRemapper::from_patterns(patterns)
        .map_err(|e| WasteError::Config(format!("invalid key pattern: {}", e)))
}

/// 重みファイルをバックボーンへ読み込む
///
/// # 引数
/// - `backbone`: 読み込み先（`config` で初期化したもの）
/// - `config`: バックボーン設定（キーの対応付けに使用）
/// - `path`: 重みファイル
///
/// # 戻り値
/// - 取り込み結果。対応するテンソルが1つも無い場合はエラー
pub fn import_backbone<B: Backend>(
    backbone: &mut ResidualBackbone<B>,
    config: &BackboneConfig,
    path: &Path,
) -> Result<ImportReport> {
    if !path.is_file() {
        return Err(WasteError::MissingInputPath(path.to_path_buf()));
    }
    let format = WeightFormat::from_path(path)?;
    let remapper = timm_remapper(config)?;

    let result = match format {
        WeightFormat::Safetensors => {
            let mut store = SafetensorsStore::from_file(path)
                .with_from_adapter(PyTorchToBurnAdapter)
                .remap(remapper)
                .allow_partial(true);
            backbone
                .load_from(&mut store)
                .map_err(|e| WasteError::serialization(path, e))?
        }
        WeightFormat::Pytorch => {
            let mut store = PytorchStore::from_file(path)
                .remap(remapper)
                .allow_partial(true);
            backbone
                .load_from(&mut store)
                .map_err(|e| WasteError::serialization(path, e))?
        }
    };

    let report = ImportReport::from(result);
    if report.applied == 0 {
        return Err(WasteError::serialization(
            path,
            "no tensor in the file matches the backbone layout",
        ));
    }
    if !report.missing.is_empty() {
        warn!(
            "{} backbone tensors not found in {}, keeping initial values (e.g. {})",
            report.missing.len(),
            path.display(),
            report.missing[0]
        );
    }
    debug!("Unused tensors in {}: {:?}", path.display(), report.unused);
    info!(
        "Imported {} tensors from {} ({:?})",
        report.applied,
        path.display(),
        format
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{cpu_device, CpuBackend};
    use crate::ml::backbone::Architecture;
    use crate::ml::ml_model::HeadConfig;
    use burn::tensor::Tensor;
    use burn_store::BurnToPyTorchAdapter;

    /// バックボーンを timm のキー名で書き出す
    fn export_timm(backbone: &ResidualBackbone<CpuBackend>, config: &BackboneConfig, path: &Path) {
        let mut patterns: Vec<(String, String)> = block_prefixes(config)
            .into_iter()
            .map(|(prefix, flat)| (format!(r"^blocks\.{}\.", flat), format!("{}.", prefix)))
            .collect();
        patterns.push((r"\.shortcut\.".to_string(), ".downsample.conv.".to_string()));
        patterns.push((r"^stem\.".to_string(), "stem.conv.".to_string()));
        patterns.push((r"^post_norm\.".to_string(), "norm.".to_string()));

        let mut store = SafetensorsStore::from_file(path)
            .with_to_adapter(BurnToPyTorchAdapter)
            .remap(KeyRemapper::from_patterns(patterns).unwrap());
        backbone.save_into(&mut store).unwrap();
    }

    fn features(backbone: &ResidualBackbone<CpuBackend>) -> Vec<f32> {
        let device = cpu_device();
        let input = Tensor::<CpuBackend, 1>::from_floats(
            (0..3 * 32 * 32)
                .map(|i| (i % 17) as f32 / 17.0 - 0.5)
                .collect::<Vec<_>>()
                .as_slice(),
            &device,
        )
        .reshape([1, 3, 32, 32]);
        backbone.forward(input).into_data().to_vec().unwrap()
    }

    #[test]
    fn test_weight_format_from_extension() {
        assert_eq!(
            WeightFormat::from_path(Path::new("resnetv2.safetensors")).unwrap(),
            WeightFormat::Safetensors
        );
        assert_eq!(
            WeightFormat::from_path(Path::new("resnetv2.PTH")).unwrap(),
            WeightFormat::Pytorch
        );
        assert!(matches!(
            WeightFormat::from_path(Path::new("resnetv2.onnx")),
            Err(WasteError::UnsupportedFile { .. })
        ));
    }

    #[test]
    fn test_block_prefixes_follow_stage_layout() {
        let prefixes = block_prefixes(&BackboneConfig::new(vec![2, 1]));
        assert_eq!(
            prefixes,
            vec![
                ("stages.0.blocks.0".to_string(), 0),
                ("stages.0.blocks.1".to_string(), 1),
                ("stages.1.blocks.0".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_timm_checkpoint_restores_backbone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resnetv2.safetensors");
        let device = cpu_device();
        let config = Architecture::Compact.backbone_config();

        let source = config.init::<CpuBackend>(&device);
        export_timm(&source, &config, &path);

        let mut target = config.init::<CpuBackend>(&device);
        let before = features(&target);
        let report = import_backbone(&mut target, &config, &path).unwrap();

        assert!(report.applied > 0);
        assert!(report.missing.is_empty(), "missing: {:?}", report.missing);
        assert!(report.unused.is_empty(), "unused: {:?}", report.unused);

        let expected = features(&source);
        let actual = features(&target);
        assert_ne!(before, expected);
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-5);
        }
    }

    #[test]
    fn test_unrelated_weights_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.safetensors");
        let device = cpu_device();
        let head = HeadConfig::new(64, 3).init::<CpuBackend>(&device);
        let mut store = SafetensorsStore::from_file(&path);
        head.save_into(&mut store).unwrap();

        let config = Architecture::Compact.backbone_config();
        let mut backbone = config.init::<CpuBackend>(&device);
        assert!(matches!(
            import_backbone(&mut backbone, &config, &path),
            Err(WasteError::Serialization { .. })
        ));
    }

    #[test]
    fn test_missing_weight_file() {
        let device = cpu_device();
        let config = Architecture::Compact.backbone_config();
        let mut backbone = config.init::<CpuBackend>(&device);
        assert!(matches!(
            import_backbone(&mut backbone, &config, Path::new("no/such/resnetv2.safetensors")),
            Err(WasteError::MissingInputPath(_))
        ));
    }
}
