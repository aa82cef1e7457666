//! EfficientNet implementation for the UNet3+ encoder.
//!
//! This crate provides the torchvision EfficientNet (V1) feature extractor, truncated
//! before the classifier. Only the intermediate feature maps are exposed; the final
//! 1x1 expansion conv and pooling head are never built.

use burn::{nn::Initializer, prelude::*};
use core::f64::consts::SQRT_2;

mod blocks;
pub use blocks::*;

#[cfg(feature = "pretrained")]
mod weights;
#[cfg(feature = "pretrained")]
pub use weights::*;

/// Base stage table: (expand_ratio, kernel, stride, in_channels, out_channels, layers)
const BASE_STAGES: [(usize, usize, usize, usize, usize, usize); 7] = [
    (1, 3, 1, 32, 16, 1),
    (6, 3, 2, 16, 24, 2),
    (6, 5, 2, 24, 40, 2),
    (6, 3, 2, 40, 80, 3),
    (6, 5, 1, 80, 112, 3),
    (6, 5, 2, 112, 192, 4),
    (6, 3, 1, 192, 320, 1),
];

const BASE_STEM_CHANNELS: usize = 32;

/// Stage indices whose outputs are exposed as feature levels (strides 2, 4, 8, 16, 32).
pub const FEATURE_STAGES: [usize; 5] = [0, 1, 2, 4, 6];

/// Number of feature levels an EfficientNet exposes.
pub const NUM_FEATURE_LEVELS: usize = FEATURE_STAGES.len();

/// Rounds a scaled channel count to a multiple of 8 without dropping below 90% of it.
fn make_divisible(value: f64) -> usize {
    let divisor = 8.0;
    let rounded = ((value + divisor / 2.0) / divisor).floor() * divisor;
    let mut rounded = rounded.max(divisor);
    if rounded < 0.9 * value {
        rounded += divisor;
    }
    rounded as usize
}

/// EfficientNet configuration
#[derive(Config, Debug)]
pub struct EfficientNetConfig {
    /// Channel width multiplier
    pub width_mult: f64,
    /// Layer depth multiplier
    pub depth_mult: f64,
    /// Maximum stochastic depth probability, reached by the last block
    #[config(default = "0.2")]
    pub stochastic_depth_prob: f64,
    /// Initializer applied to every conv layer
    #[config(default = "Initializer::KaimingNormal { gain: SQRT_2, fan_out_only: true }")]
    pub initializer: Initializer,
}

impl EfficientNetConfig {
    /// EfficientNet-B0 configuration
    pub fn b0() -> Self {
        Self::new(1.0, 1.0)
    }

    /// EfficientNet-B5 configuration
    pub fn b5() -> Self {
        Self::new(1.6, 2.2)
    }

    /// EfficientNet-B6 configuration
    pub fn b6() -> Self {
        Self::new(1.8, 2.6)
    }

    fn adjust_channels(&self, channels: usize) -> usize {
        make_divisible(channels as f64 * self.width_mult)
    }

    fn adjust_depth(&self, layers: usize) -> usize {
        (layers as f64 * self.depth_mult).ceil() as usize
    }

    /// Number of blocks per stage after depth scaling.
    pub fn stage_depths(&self) -> [usize; 7] {
        BASE_STAGES.map(|(.., layers)| self.adjust_depth(layers))
    }

    /// Output channels of each feature level.
    pub fn feature_channels(&self) -> [usize; NUM_FEATURE_LEVELS] {
        FEATURE_STAGES.map(|stage| self.adjust_channels(BASE_STAGES[stage].4))
    }

    /// Initialize a new EfficientNet feature extractor.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> EfficientNet<B> {
        let stem = ConvNormAct::new(
            3,
            self.adjust_channels(BASE_STEM_CHANNELS),
            3,
            2,
            1,
            true,
            &self.initializer,
            device,
        );

        let total_blocks: usize = self.stage_depths().iter().sum();
        let mut block_id = 0;
        let mut stages = Vec::with_capacity(BASE_STAGES.len());

        for (expand_ratio, kernel_size, stride, in_channels, out_channels, layers) in BASE_STAGES
        {
            let out_channels = self.adjust_channels(out_channels);
            let mut in_channels = self.adjust_channels(in_channels);
            let mut stride = stride;
            let mut blocks = Vec::new();

            for _ in 0..self.adjust_depth(layers) {
                let drop_path =
                    self.stochastic_depth_prob * block_id as f64 / total_blocks as f64;
                blocks.push(MBConv::new(
                    MBConvSettings {
                        expand_ratio,
                        kernel_size,
                        stride,
                        in_channels,
                        out_channels,
                        drop_path,
                    },
                    &self.initializer,
                    device,
                ));
                // Only the first block of a stage changes resolution or width
                in_channels = out_channels;
                stride = 1;
                block_id += 1;
            }

            stages.push(MBConvStage::new(blocks, out_channels));
        }

        EfficientNet { stem, stages }
    }
}

/// EfficientNet feature extractor.
#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    pub stem: ConvNormAct<B>,
    pub stages: Vec<MBConvStage<B>>,
}

impl<B: Backend> EfficientNet<B> {
    /// Output channels of each feature level, finest first.
    pub fn feature_channels(&self) -> Vec<usize> {
        FEATURE_STAGES
            .iter()
            .map(|&stage| self.stages[stage].out_channels())
            .collect()
    }

    /// Runs the network and returns the first `levels` feature maps, finest first.
    ///
    /// Stages past the last requested level are skipped.
    ///
    /// # Shapes
    /// - input: `[batch, 3, height, width]`
    /// - output[i]: `[batch, channels_i, height / 2^(i+1), width / 2^(i+1)]` (rounded up)
    pub fn forward_features(&self, input: Tensor<B, 4>, levels: usize) -> Vec<Tensor<B, 4>> {
        let levels = levels.min(NUM_FEATURE_LEVELS);
        let mut features = Vec::with_capacity(levels);
        if levels == 0 {
            return features;
        }

        let mut x = self.stem.forward(input);
        for (idx, stage) in self.stages.iter().enumerate() {
            x = stage.forward(x);
            if FEATURE_STAGES.contains(&idx) {
                features.push(x.clone());
                if features.len() == levels {
                    break;
                }
            }
        }

        features
    }

    /// Forward pass returning all five feature levels.
    pub fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        self.forward_features(input, NUM_FEATURE_LEVELS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_make_divisible() {
        assert_eq!(make_divisible(25.6), 24);
        assert_eq!(make_divisible(51.2), 48);
        assert_eq!(make_divisible(179.2), 176);
        assert_eq!(make_divisible(3.0), 8);
    }

    #[test]
    fn test_feature_channels() {
        assert_eq!(
            EfficientNetConfig::b0().feature_channels(),
            [16, 24, 40, 112, 320]
        );
        assert_eq!(
            EfficientNetConfig::b5().feature_channels(),
            [24, 40, 64, 176, 512]
        );
        assert_eq!(
            EfficientNetConfig::b6().feature_channels(),
            [32, 40, 72, 200, 576]
        );
    }

    #[test]
    fn test_stage_depths() {
        assert_eq!(EfficientNetConfig::b0().stage_depths(), [1, 2, 2, 3, 3, 4, 1]);
        assert_eq!(EfficientNetConfig::b5().stage_depths(), [3, 5, 5, 7, 7, 9, 3]);
    }

    #[test]
    fn test_efficientnet_b0_forward() {
        let device = Default::default();
        let model = EfficientNetConfig::b0().init::<TestBackend>(&device);
        assert_eq!(model.feature_channels(), vec![16, 24, 40, 112, 320]);

        let input =
            Tensor::<TestBackend, 4>::random([1, 3, 64, 64], Distribution::Default, &device);
        let features = model.forward(input);

        assert_eq!(features.len(), 5);
        assert_eq!(features[0].dims(), [1, 16, 32, 32]);
        assert_eq!(features[1].dims(), [1, 24, 16, 16]);
        assert_eq!(features[2].dims(), [1, 40, 8, 8]);
        assert_eq!(features[3].dims(), [1, 112, 4, 4]);
        assert_eq!(features[4].dims(), [1, 320, 2, 2]);
    }

    #[test]
    fn test_forward_features_stops_early() {
        let device = Default::default();
        let model = EfficientNetConfig::b0().init::<TestBackend>(&device);

        let input =
            Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let features = model.forward_features(input, 3);

        assert_eq!(features.len(), 3);
        assert_eq!(features[2].dims(), [2, 40, 4, 4]);
    }
}
