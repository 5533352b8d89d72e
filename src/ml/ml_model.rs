//! 分類ヘッドと画像前処理の共通定義
//!
//! バックボーンが出力したボトルネック特徴量をクラスごとのロジットへ変換する線形層と、
//! 画像ファイルをモデル入力へ変換する前処理を提供します。

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{loss::CrossEntropyLossConfig, Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::imageops::FilterType;

use crate::error::WasteError;

/// ImageNetの平均
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNetの標準偏差
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 分類ヘッド設定
#[derive(Config, Debug)]
pub struct HeadConfig {
    /// 入力特徴量の次元
    pub feature_size: usize,
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.0)]
    pub dropout: f64,
}

impl HeadConfig {
    /// ヘッドを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        ClassifierHead {
            dropout: DropoutConfig::new(self.dropout).init(),
            linear: LinearConfig::new(self.feature_size, self.num_classes).init(device),
        }
    }
}

/// 分類ヘッド（Dropout + 全結合1層）
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    dropout: Dropout,
    linear: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `features`: ボトルネック特徴量 [batch_size, feature_size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.dropout.forward(features);
        self.linear.forward(x)
    }

    /// 全結合層の形状 [feature_size, num_classes]
    pub fn dims(&self) -> [usize; 2] {
        self.linear.weight.val().dims()
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(features), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        features: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(features);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// 画像を読み込んでリサイズ・正規化
///
/// `size` x `size` に縮小したRGB画像をImageNetの平均と標準偏差で正規化し、
/// (C, H, W) の順で平坦化して返します。
pub fn load_and_normalize_image(path: &Path, size: usize) -> crate::error::Result<Vec<f32>> {
    let img = image::open(path).map_err(|e| WasteError::unsupported(path, e))?;
    let img = img
        .resize_exact(size as u32, size as u32, FilterType::Triangle)
        .to_rgb8();

    let plane = size * size;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, pixel) in img.pixels().enumerate() {
        for channel in 0..3 {
            let value = pixel[channel] as f32 / 255.0;
            data[channel * plane + i] = (value - MEAN[channel]) / STD[channel];
        }
    }

    Ok(data)
}
