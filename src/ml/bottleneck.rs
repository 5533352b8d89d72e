//! ボトルネック特徴量の抽出とキャッシュ
//!
//! ワークスペースに置いた固定バックボーンで画像を特徴ベクトルに変換し、
//! 分割ごとに gzip 圧縮した JSON ファイルへキャッシュします。
//!
//! ワークスペース構成:
//! - backbone-<arch>.bin                 - バックボーンの重み
//! - backbone-<arch>.json                - バックボーンのマニフェスト
//! - TrainSetBottleneckFile.json.gz      - 学習データの特徴量
//! - ValidationSetBottleneckFile.json.gz - 検証データの特徴量

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, WasteError};
use crate::ml::backbone::{Architecture, ResidualBackbone};
use crate::ml::ml_model::load_and_normalize_image;
use crate::ml::pretrained::import_backbone;

/// キャッシュ対象の分割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitKind {
    Train,
    Validation,
}

impl SplitKind {
    pub fn cache_file_name(&self) -> &'static str {
        match self {
            SplitKind::Train => "TrainSetBottleneckFile.json.gz",
            SplitKind::Validation => "ValidationSetBottleneckFile.json.gz",
        }
    }
}

impl std::fmt::Display for SplitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitKind::Train => write!(f, "TrainSet"),
            SplitKind::Validation => write!(f, "ValidationSet"),
        }
    }
}

/// バックボーンのマニフェスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackboneManifest {
    pub architecture: Architecture,
    pub image_size: usize,
    pub feature_size: usize,
    /// 重みを識別するID（キャッシュとの対応付けに使用）
    pub backbone_id: String,
    /// 取り込んだ学習済み重みファイル（ランダム初期化なら `None`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl BackboneManifest {
    pub fn new(architecture: Architecture) -> Self {
        let backbone_id = format!(
            "{}-{}",
            architecture.file_stem(),
            chrono::Local::now().format("%Y%m%dT%H%M%S%.3f")
        );
        Self {
            architecture,
            image_size: architecture.input_size(),
            feature_size: architecture.backbone_config().feature_size(),
            backbone_id,
            source: None,
        }
    }
}

fn backbone_paths(workspace: &Path, architecture: Architecture) -> (PathBuf, PathBuf) {
    let stem = format!("backbone-{}", architecture.file_stem());
    (
        workspace.join(format!("{}.bin", stem)),
        workspace.join(format!("{}.json", stem)),
    )
}

/// モジュールの重みをバイト列に変換
pub(crate) fn module_to_bytes<B: Backend, M: Module<B>>(module: M, name: &str) -> Result<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(module.into_record(), ())
        .map_err(|e| WasteError::serialization(name, format!("{:?}", e)))
}

/// バイト列から重みを復元
pub(crate) fn module_from_bytes<B: Backend, M: Module<B>>(
    module: M,
    bytes: Vec<u8>,
    name: &str,
    device: &B::Device,
) -> Result<M> {
    let record = BinBytesRecorder::<FullPrecisionSettings>::default()
        .load(bytes, device)
        .map_err(|e| WasteError::serialization(name, format!("{:?}", e)))?;
    Ok(module.load_record(record))
}

/// 1件分のキャッシュ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFeature {
    pub image_path: PathBuf,
    pub features: Vec<f32>,
}

/// 分割ごとのボトルネック値キャッシュ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckCache {
    pub backbone_id: String,
    pub image_size: usize,
    pub entries: Vec<CachedFeature>,
}

impl BottleneckCache {
    /// キャッシュを読み込む（存在しない・壊れている場合は `None`）
    pub fn load(path: &Path) -> Option<Self> {
        let file = File::open(path).ok()?;
        match serde_json::from_reader(GzDecoder::new(BufReader::new(file))) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Ignoring unreadable bottleneck cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// キャッシュを書き出す（既存ファイルは上書き）
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| WasteError::serialization(path, e))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, self).map_err(|e| WasteError::serialization(path, e))?;
        encoder.finish().map_err(|e| WasteError::serialization(path, e))?;
        Ok(())
    }

    fn matches(&self, manifest: &BackboneManifest) -> bool {
        self.backbone_id == manifest.backbone_id && self.image_size == manifest.image_size
    }
}

/// 分割1つ分の特徴量
#[derive(Debug, Clone, PartialEq)]
pub struct BottleneckValues {
    /// 入力順の特徴ベクトル
    pub features: Vec<Vec<f32>>,
    pub computed: usize,
    pub reused: usize,
}

/// 固定バックボーンによる特徴抽出器
#[derive(Debug, Clone)]
pub struct FeatureExtractor<B: Backend> {
    backbone: ResidualBackbone<B>,
    manifest: BackboneManifest,
    device: B::Device,
}

impl<B: Backend> FeatureExtractor<B> {
    pub fn new(backbone: ResidualBackbone<B>, manifest: BackboneManifest, device: B::Device) -> Self {
        Self {
            backbone,
            manifest,
            device,
        }
    }

    /// ワークスペースのバックボーンを読み込む。無ければ初期化して保存する
    pub fn load_or_init(workspace: &Path, architecture: Architecture, device: &B::Device) -> Result<Self> {
        Self::load_or_import(workspace, architecture, None, device)
    }

    /// ワークスペースのバックボーンを読み込む
    ///
    /// `pretrained` が指定され、ワークスペースのバックボーンがそのファイル由来でなければ
    /// 初期化した上で重みを取り込み、新しいIDで保存します（既存キャッシュは無効になる）。
    ///
    /// # 引数
    /// - `workspace`: バックボーンの置き場所
    /// - `architecture`: アーキテクチャ
    /// - `pretrained`: 学習済み重みファイル
    /// - `device`: 計算デバイス
    pub fn load_or_import(
        workspace: &Path,
        architecture: Architecture,
        pretrained: Option<&Path>,
        device: &B::Device,
    ) -> Result<Self> {
        let (weights_path, manifest_path) = backbone_paths(workspace, architecture);
        let config = architecture.backbone_config();
        let mut backbone = config.init::<B>(device);

        if weights_path.exists() && manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: BackboneManifest = serde_json::from_str(&content)
                .map_err(|e| WasteError::serialization(&manifest_path, e))?;
            if manifest.architecture != architecture {
                return Err(WasteError::serialization(
                    &manifest_path,
                    format!("expected {}, found {}", architecture, manifest.architecture),
                ));
            }
            if pretrained.is_none() || pretrained == manifest.source.as_deref() {
                let bytes = std::fs::read(&weights_path)?;
                let backbone = module_from_bytes::<B, _>(backbone, bytes, "backbone", device)?;
                info!(
                    "Loaded backbone {} ({})",
                    weights_path.display(),
                    manifest.backbone_id
                );
                return Ok(Self::new(backbone, manifest, device.clone()));
            }
            info!(
                "Backbone {} was not imported from the requested weights, rebuilding",
                manifest.backbone_id
            );
        }

        std::fs::create_dir_all(workspace)?;
        let mut manifest = BackboneManifest::new(architecture);
        if let Some(path) = pretrained {
            import_backbone(&mut backbone, &config, path)?;
            let weights_stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            manifest.backbone_id = format!("{}-{}", manifest.backbone_id, weights_stem);
            manifest.source = Some(path.to_path_buf());
        }
        let bytes = module_to_bytes::<B, _>(backbone.clone(), "backbone")?;
        std::fs::write(&weights_path, bytes)?;
        let content = serde_json::to_string_pretty(&manifest)
            .map_err(|e| WasteError::serialization(&manifest_path, e))?;
        std::fs::write(&manifest_path, content)?;
        info!(
            "Initialised backbone {} ({})",
            weights_path.display(),
            manifest.backbone_id
        );

        Ok(Self::new(backbone, manifest, device.clone()))
    }

    pub fn manifest(&self) -> &BackboneManifest {
        &self.manifest
    }

    pub fn backbone(&self) -> &ResidualBackbone<B> {
        &self.backbone
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// 画像群の特徴量を計算
    ///
    /// # 引数
    /// - `paths`: 画像ファイル
    /// - `batch_size`: 1回の順伝播に渡す枚数
    ///
    /// # 戻り値
    /// - 入力順の特徴ベクトル
    pub fn features(&self, paths: &[PathBuf], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        let size = self.manifest.image_size;
        let feature_size = self.manifest.feature_size;
        let mut result = Vec::with_capacity(paths.len());

        for chunk in paths.chunks(batch_size.max(1)) {
            let mut all_pixels = Vec::with_capacity(chunk.len() * 3 * size * size);
            for path in chunk {
                all_pixels.extend(load_and_normalize_image(path, size)?);
            }

            let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
                .reshape([chunk.len(), 3, size, size]);
            let output: Vec<f32> = self
                .backbone
                .forward(images)
                .into_data()
                .to_vec()
                .map_err(|e| WasteError::Training(format!("feature readback failed: {:?}", e)))?;

            result.extend(output.chunks(feature_size).map(<[f32]>::to_vec));
            debug!("Extracted features for {}/{} images", result.len(), paths.len());
        }

        Ok(result)
    }

    /// 画像1枚の特徴量
    pub fn image_features(&self, path: &Path) -> Result<Vec<f32>> {
        let mut features = self.features(&[path.to_path_buf()], 1)?;
        features
            .pop()
            .ok_or_else(|| WasteError::inference(path, "backbone returned no features"))
    }

    /// キャッシュを使って分割の特徴量を用意する
    ///
    /// `reuse` が有効でキャッシュのバックボーンIDが一致する場合、
    /// キャッシュにある画像は再計算しません。キャッシュは今回の画像で上書きされます。
    pub fn cached_features(
        &self,
        paths: &[PathBuf],
        split: SplitKind,
        workspace: &Path,
        reuse: bool,
        batch_size: usize,
    ) -> Result<BottleneckValues> {
        let cache_path = workspace.join(split.cache_file_name());

        let mut cached: HashMap<PathBuf, Vec<f32>> = HashMap::new();
        if reuse {
            match BottleneckCache::load(&cache_path) {
                Some(cache) if cache.matches(&self.manifest) => {
                    cached = cache
                        .entries
                        .into_iter()
                        .map(|entry| (entry.image_path, entry.features))
                        .collect();
                }
                Some(_) => info!("{} cache belongs to another backbone, recomputing", split),
                None => debug!("No {} cache at {}", split, cache_path.display()),
            }
        }

        let missing: Vec<PathBuf> = paths
            .iter()
            .filter(|path| !cached.contains_key(*path))
            .cloned()
            .collect();
        let computed = self.features(&missing, batch_size)?;
        let computed_count = computed.len();
        cached.extend(missing.into_iter().zip(computed));

        let mut entries = Vec::with_capacity(paths.len());
        let mut features = Vec::with_capacity(paths.len());
        for path in paths {
            let vector = cached
                .get(path)
                .cloned()
                .ok_or_else(|| WasteError::Training(format!("no features for {}", path.display())))?;
            entries.push(CachedFeature {
                image_path: path.clone(),
                features: vector.clone(),
            });
            features.push(vector);
        }

        std::fs::create_dir_all(workspace)?;
        BottleneckCache {
            backbone_id: self.manifest.backbone_id.clone(),
            image_size: self.manifest.image_size,
            entries,
        }
        .save(&cache_path)?;

        Ok(BottleneckValues {
            features,
            computed: computed_count,
            reused: paths.len() - computed_count,
        })
    }
}
