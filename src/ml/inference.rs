//! 学習済みモデルによる推論

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor};
use tracing::debug;

use crate::error::{Result, WasteError};
use crate::ml::backbone::Architecture;
use crate::ml::bottleneck::{module_from_bytes, module_to_bytes, BackboneManifest, FeatureExtractor};
use crate::ml::metrics::ScoredRecord;
use crate::ml::ml_model::{ClassifierHead, HeadConfig};
use crate::model::{load_model_archive, save_model_archive, DataSchema, ModelArchive, ModelMetadata};
use crate::types::LabeledImageRecord;

/// 学習済みモデル（固定バックボーン + 分類ヘッド + ラベル対応）
#[derive(Debug, Clone)]
pub struct WasteModel<B: Backend> {
    extractor: FeatureExtractor<B>,
    head: ClassifierHead<B>,
    metadata: ModelMetadata,
}

impl<B: Backend> WasteModel<B> {
    pub fn new(extractor: FeatureExtractor<B>, head: ClassifierHead<B>, metadata: ModelMetadata) -> Self {
        Self {
            extractor,
            head,
            metadata,
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn label_keys(&self) -> &[String] {
        &self.metadata.label_keys
    }

    /// 特徴量のバッチからクラス確率を計算
    pub fn probabilities(&self, features: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let feature_size = self.metadata.feature_size;
        let flat: Vec<f32> = features.iter().flatten().copied().collect();
        let input = Tensor::<B, 1>::from_floats(flat.as_slice(), self.extractor.device())
            .reshape([features.len(), feature_size]);

        let output: Vec<f32> = self
            .head
            .forward_probabilities(input)
            .into_data()
            .to_vec()
            .map_err(|e| WasteError::Training(format!("probability readback failed: {:?}", e)))?;

        Ok(output
            .chunks(self.metadata.num_classes())
            .map(<[f32]>::to_vec)
            .collect())
    }

    /// 画像1枚のクラス確率
    pub fn score_image(&self, path: &Path) -> Result<Vec<f32>> {
        let features = self
            .extractor
            .image_features(path)
            .map_err(|e| match e {
                WasteError::Inference { .. } => e,
                other => WasteError::inference(path, other),
            })?;
        self.probabilities(&[features])?
            .pop()
            .ok_or_else(|| WasteError::inference(path, "head returned no scores"))
    }

    /// 画像1枚を分類（キーに対応するラベルが無ければ `None`）
    pub fn classify_image(&self, path: &Path) -> Result<Option<String>> {
        let probabilities = self.score_image(path)?;
        let key = crate::ml::metrics::argmax(&probabilities);
        let label = self.metadata.key_to_value(key).map(str::to_string);
        debug!("{} -> key {} ({:?})", path.display(), key, label);
        Ok(label)
    }

    /// ラベル付きレコードをまとめて推論
    ///
    /// # 引数
    /// - `records`: 評価対象
    /// - `batch_size`: バックボーンに一度に渡す枚数
    pub fn score_records(&self, records: &[LabeledImageRecord], batch_size: usize) -> Result<Vec<ScoredRecord>> {
        let paths: Vec<_> = records.iter().map(|r| r.image_path.clone()).collect();
        let features = self.extractor.features(&paths, batch_size)?;
        let probabilities = self.probabilities(&features)?;

        Ok(records
            .iter()
            .zip(probabilities)
            .map(|(record, probs)| {
                ScoredRecord::from_probabilities(
                    self.metadata.value_to_key(&record.label),
                    probs,
                    &self.metadata.label_keys,
                )
            })
            .collect())
    }

    /// モデルとスキーマをzipファイルに保存
    pub fn save(&self, schema: &DataSchema, path: &Path) -> Result<()> {
        let archive = ModelArchive {
            metadata: self.metadata.clone(),
            schema: schema.clone(),
            backbone: module_to_bytes::<B, _>(self.extractor.backbone().clone(), "backbone.bin")?,
            head: module_to_bytes::<B, _>(self.head.clone(), "head.bin")?,
        };
        save_model_archive(path, &archive)
    }

    /// zipファイルからモデルを読み込む
    ///
    /// # 戻り値
    /// - モデルと保存時のスキーマ
    pub fn load(path: &Path, device: &B::Device) -> Result<(Self, DataSchema)> {
        let archive = load_model_archive(path)?;
        let metadata = archive.metadata;
        let architecture: Architecture = metadata.architecture;

        let config = architecture.backbone_config();
        if config.feature_size() != metadata.feature_size {
            return Err(WasteError::serialization(
                path,
                format!(
                    "{} produces {} features, metadata says {}",
                    architecture,
                    config.feature_size(),
                    metadata.feature_size
                ),
            ));
        }

        let backbone = module_from_bytes::<B, _>(
            config.init::<B>(device),
            archive.backbone,
            "backbone.bin",
            device,
        )?;
        let head = module_from_bytes::<B, _>(
            HeadConfig::new(metadata.feature_size, metadata.num_classes()).init::<B>(device),
            archive.head,
            "head.bin",
            device,
        )?;
        let expected = [metadata.feature_size, metadata.num_classes()];
        if head.dims() != expected {
            return Err(WasteError::serialization(
                path,
                format!(
                    "head.bin maps {} features to {} classes, metadata expects {} -> {}",
                    head.dims()[0],
                    head.dims()[1],
                    expected[0],
                    expected[1]
                ),
            ));
        }

        let manifest = BackboneManifest {
            architecture,
            image_size: metadata.image_size,
            feature_size: metadata.feature_size,
            backbone_id: metadata.backbone_id.clone(),
            source: None,
        };
        let extractor = FeatureExtractor::new(backbone, manifest, device.clone());

        Ok((Self::new(extractor, head, metadata), archive.schema))
    }
}
