//! 特徴抽出用の残差ネットワーク（pre-activation ResNet, "v2"）
//!
//! 学習中は重みを固定し、グローバル平均プーリング後のベクトルをボトルネック特徴量として使います。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

/// バックボーンのアーキテクチャ
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    /// ResNet v2 101層（ボトルネックブロック 3-4-23-3）
    ResnetV2_101,
    /// ResNet v2 50層（ボトルネックブロック 3-4-6-3）
    ResnetV2_50,
    /// 各段1ブロック・幅8の小型ネットワーク（動作確認・テスト用）
    Compact,
}

impl Architecture {
    /// モデル入力の一辺（ピクセル）
    pub fn input_size(&self) -> usize {
        match self {
            Architecture::ResnetV2_101 | Architecture::ResnetV2_50 => 299,
            Architecture::Compact => 32,
        }
    }

    /// ファイル名に使う識別子
    pub fn file_stem(&self) -> &'static str {
        match self {
            Architecture::ResnetV2_101 => "resnet_v2_101",
            Architecture::ResnetV2_50 => "resnet_v2_50",
            Architecture::Compact => "compact",
        }
    }

    pub fn backbone_config(&self) -> BackboneConfig {
        match self {
            Architecture::ResnetV2_101 => BackboneConfig::new(vec![3, 4, 23, 3]),
            Architecture::ResnetV2_50 => BackboneConfig::new(vec![3, 4, 6, 3]),
            Architecture::Compact => BackboneConfig::new(vec![1, 1, 1, 1])
                .with_base_width(8)
                .with_bottleneck(false),
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_stem())
    }
}

/// バックボーン設定
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// 各ステージのブロック数
    pub stage_blocks: Vec<usize>,
    /// 最初のステージの幅（以降のステージで倍になる）
    #[config(default = 64)]
    pub base_width: usize,
    /// ボトルネックブロック（1x1-3x3-1x1, 出力4倍）を使うか
    #[config(default = true)]
    pub bottleneck: bool,
}

impl BackboneConfig {
    fn expansion(&self) -> usize {
        if self.bottleneck {
            4
        } else {
            1
        }
    }

    /// 出力特徴ベクトルの次元
    pub fn feature_size(&self) -> usize {
        let last_stage = self.stage_blocks.len().saturating_sub(1);
        self.base_width * (1 << last_stage) * self.expansion()
    }

    /// バックボーンを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualBackbone<B> {
        let stem = Conv2dConfig::new([3, self.base_width], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut blocks = Vec::new();
        let mut in_channels = self.base_width;
        for (stage, &num_blocks) in self.stage_blocks.iter().enumerate() {
            let width = self.base_width * (1 << stage);
            for index in 0..num_blocks {
                let stride = if stage > 0 && index == 0 { 2 } else { 1 };
                let block = ResidualBlock::new(
                    in_channels,
                    width,
                    self.expansion(),
                    stride,
                    self.bottleneck,
                    device,
                );
                in_channels = width * self.expansion();
                blocks.push(block);
            }
        }

        ResidualBackbone {
            stem,
            stem_pool,
            blocks,
            post_norm: BatchNormConfig::new(in_channels).init(device),
            activation: Relu::new(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}

fn conv_config(channels: [usize; 2], kernel: usize, stride: usize) -> Conv2dConfig {
    let padding = kernel / 2;
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
}

/// pre-activation 残差ブロック
///
/// ボトルネック: BN-ReLU-1x1 → BN-ReLU-3x3(stride) → BN-ReLU-1x1(x4)
/// ベーシック:   BN-ReLU-3x3(stride) → BN-ReLU-3x3
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    norm1: BatchNorm<B>,
    conv1: Conv2d<B>,
    norm2: BatchNorm<B>,
    conv2: Conv2d<B>,
    norm3: Option<BatchNorm<B>>,
    conv3: Option<Conv2d<B>>,
    /// 形状が変わる場合の射影ショートカット
    shortcut: Option<Conv2d<B>>,
    activation: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    fn new(
        in_channels: usize,
        width: usize,
        expansion: usize,
        stride: usize,
        bottleneck: bool,
        device: &B::Device,
    ) -> Self {
        let out_channels = width * expansion;
        let shortcut = (stride != 1 || in_channels != out_channels)
            .then(|| conv_config([in_channels, out_channels], 1, stride).init(device));

        if bottleneck {
            Self {
                norm1: BatchNormConfig::new(in_channels).init(device),
                conv1: conv_config([in_channels, width], 1, 1).init(device),
                norm2: BatchNormConfig::new(width).init(device),
                conv2: conv_config([width, width], 3, stride).init(device),
                norm3: Some(BatchNormConfig::new(width).init(device)),
                conv3: Some(conv_config([width, out_channels], 1, 1).init(device)),
                shortcut,
                activation: Relu::new(),
            }
        } else {
            Self {
                norm1: BatchNormConfig::new(in_channels).init(device),
                conv1: conv_config([in_channels, width], 3, stride).init(device),
                norm2: BatchNormConfig::new(width).init(device),
                conv2: conv_config([width, out_channels], 3, 1).init(device),
                norm3: None,
                conv3: None,
                shortcut,
                activation: Relu::new(),
            }
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let preact = self.activation.forward(self.norm1.forward(x.clone()));
        let shortcut = match &self.shortcut {
            Some(projection) => projection.forward(preact.clone()),
            None => x,
        };

        let y = self.conv1.forward(preact);
        let y = self
            .conv2
            .forward(self.activation.forward(self.norm2.forward(y)));
        let y = match (&self.norm3, &self.conv3) {
            (Some(norm), Some(conv)) => conv.forward(self.activation.forward(norm.forward(y))),
            _ => y,
        };

        y + shortcut
    }
}

/// 特徴抽出ネットワーク
#[derive(Module, Debug)]
pub struct ResidualBackbone<B: Backend> {
    stem: Conv2d<B>,
    stem_pool: MaxPool2d,
    blocks: Vec<ResidualBlock<B>>,
    post_norm: BatchNorm<B>,
    activation: Relu,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResidualBackbone<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - ボトルネック特徴量 [batch_size, feature_size]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.stem.forward(images);
        let x = self.stem_pool.forward(x);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = self.activation.forward(self.post_norm.forward(x));
        let x = self.pool.forward(x);

        let [_, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{cpu_device, CpuBackend};

    #[test]
    fn test_feature_sizes() {
        assert_eq!(Architecture::ResnetV2_101.backbone_config().feature_size(), 2048);
        assert_eq!(Architecture::ResnetV2_50.backbone_config().feature_size(), 2048);
        assert_eq!(Architecture::Compact.backbone_config().feature_size(), 64);
    }

    #[test]
    fn test_compact_forward_shape() {
        let device = cpu_device();
        let arch = Architecture::Compact;
        let config = arch.backbone_config();
        let backbone = config.init::<CpuBackend>(&device);

        let size = arch.input_size();
        let images = Tensor::<CpuBackend, 4>::zeros([2, 3, size, size], &device);
        let features = backbone.forward(images);
        assert_eq!(features.dims(), [2, config.feature_size()]);
    }

    #[test]
    fn test_architecture_serde_names() {
        let json = serde_json::to_string(&Architecture::ResnetV2_101).unwrap();
        assert_eq!(json, "\"ResnetV2_101\"");
        assert_eq!(Architecture::ResnetV2_101.to_string(), "resnet_v2_101");
    }
}
