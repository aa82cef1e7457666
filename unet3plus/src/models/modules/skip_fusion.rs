//! Full-scale skip fusion block.
//!
//! Every decoder stage of UNet3+ sees all encoder levels at or below its resolution and
//! every coarser decoder stage. Each input is resampled to the stage resolution,
//! projected to `skip_channels`, concatenated and refined.

use burn::{
    module::Ignored,
    nn::{Dropout, DropoutConfig},
    prelude::*,
};
use burn_extra_ops::{CeilMaxPool2d, CeilMaxPool2dConfig};

use super::{conv_block::ConvBnRelu, resize, upsample};
use crate::{
    config::{InterpolationStrategy, UpsampleOrder},
    error::{UNet3PlusError, UNet3PlusResult},
};

/// Configuration for [`FullScaleFusion`].
#[derive(Config, Debug)]
pub struct FullScaleFusionConfig {
    /// Channels of each encoder input, the target resolution first.
    pub encoder_channels: Vec<usize>,
    /// Downscale factor of each encoder input relative to the target resolution.
    pub encoder_scales: Vec<usize>,
    /// Number of decoder inputs from coarser stages.
    pub num_decoder_inputs: usize,
    /// Channels of the first (coarsest) decoder input.
    pub bottom_channels: usize,
    #[config(default = 64)]
    pub skip_channels: usize,
    /// Upscale factor of each decoder input. Defaults to `2^n, 2^(n-1), ..., 2`.
    #[config(default = "None")]
    pub decoder_scales: Option<Vec<usize>>,
    #[config(default = 0.3)]
    pub dropout: f64,
    #[config(default = "UpsampleOrder::ProjectThenUpsample")]
    pub upsample_order: UpsampleOrder,
    #[config(default = 2)]
    pub fuse_blocks: usize,
    #[config(default = "InterpolationStrategy::Bilinear")]
    pub interpolation: InterpolationStrategy,
}

impl FullScaleFusionConfig {
    /// Channels of the fused output: one skip width per input.
    pub fn output_channels(&self) -> usize {
        self.skip_channels * (self.encoder_channels.len() + self.num_decoder_inputs)
    }

    /// Upscale factors applied to the decoder inputs.
    pub fn resolved_decoder_scales(&self) -> Vec<usize> {
        self.decoder_scales.clone().unwrap_or_else(|| {
            (1..=self.num_decoder_inputs)
                .rev()
                .map(|exp| 1usize << exp)
                .collect()
        })
    }

    /// Initializes a new [`FullScaleFusion`] block.
    ///
    /// # Errors
    ///
    /// Returns [`UNet3PlusError::InvalidConfiguration`] when the per-input lists disagree
    /// in length or contain a zero scale.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> UNet3PlusResult<FullScaleFusion<B>> {
        let decoder_scales = self.resolved_decoder_scales();

        if self.encoder_channels.is_empty() {
            return Err(UNet3PlusError::InvalidConfiguration {
                reason: "fusion block needs at least one encoder input".to_string(),
            });
        }
        if self.encoder_channels.len() != self.encoder_scales.len() {
            return Err(UNet3PlusError::InvalidConfiguration {
                reason: format!(
                    "{} encoder channels but {} encoder scales",
                    self.encoder_channels.len(),
                    self.encoder_scales.len()
                ),
            });
        }
        if decoder_scales.len() != self.num_decoder_inputs {
            return Err(UNet3PlusError::InvalidConfiguration {
                reason: format!(
                    "{} decoder inputs but {} decoder scales",
                    self.num_decoder_inputs,
                    decoder_scales.len()
                ),
            });
        }
        if self.encoder_scales.contains(&0) || decoder_scales.contains(&0) {
            return Err(UNet3PlusError::InvalidConfiguration {
                reason: "scale factors must be positive".to_string(),
            });
        }

        let fused_channels = self.output_channels();

        let encoder_paths = self
            .encoder_channels
            .iter()
            .zip(&self.encoder_scales)
            .map(|(&channels, &scale)| EncoderPath {
                pool: (scale > 1).then(|| CeilMaxPool2dConfig::new(scale).init()),
                conv: ConvBnRelu::new(channels, self.skip_channels, device),
            })
            .collect();

        let decoder_paths = decoder_scales
            .iter()
            .enumerate()
            .map(|(idx, &scale)| {
                let channels = if idx == 0 {
                    self.bottom_channels
                } else {
                    fused_channels
                };
                DecoderPath {
                    conv: ConvBnRelu::new(channels, self.skip_channels, device),
                    scale,
                    order: Ignored(self.upsample_order.clone()),
                }
            })
            .collect();

        let fuse = (0..self.fuse_blocks)
            .map(|_| ConvBnRelu::new(fused_channels, fused_channels, device))
            .collect();

        Ok(FullScaleFusion {
            encoder_paths,
            decoder_paths,
            dropout: DropoutConfig::new(self.dropout).init(),
            fuse,
            interpolation: Ignored(self.interpolation.clone()),
        })
    }
}

/// Encoder-to-decoder path: optional ceil-mode max pooling, then projection.
#[derive(Module, Debug)]
pub struct EncoderPath<B: Backend> {
    pool: Option<CeilMaxPool2d>,
    pub conv: ConvBnRelu<B>,
}

impl<B: Backend> EncoderPath<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        };
        self.conv.forward(x)
    }
}

/// Decoder-to-decoder path: projection and upsampling in the configured order.
#[derive(Module, Debug)]
pub struct DecoderPath<B: Backend> {
    pub conv: ConvBnRelu<B>,
    scale: usize,
    order: Ignored<UpsampleOrder>,
}

impl<B: Backend> DecoderPath<B> {
    pub fn forward(&self, x: Tensor<B, 4>, strategy: &InterpolationStrategy) -> Tensor<B, 4> {
        match self.order.0 {
            UpsampleOrder::ProjectThenUpsample => {
                upsample(self.conv.forward(x), self.scale, strategy)
            }
            UpsampleOrder::UpsampleThenProject => {
                self.conv.forward(upsample(x, self.scale, strategy))
            }
        }
    }
}

/// Full-scale skip fusion block.
#[derive(Module, Debug)]
pub struct FullScaleFusion<B: Backend> {
    pub encoder_paths: Vec<EncoderPath<B>>,
    pub decoder_paths: Vec<DecoderPath<B>>,
    dropout: Dropout,
    pub fuse: Vec<ConvBnRelu<B>>,
    interpolation: Ignored<InterpolationStrategy>,
}

impl<B: Backend> FullScaleFusion<B> {
    /// Fuses encoder and decoder maps at the resolution of `encoder_maps[0]`.
    ///
    /// Extra maps beyond the configured inputs are ignored. A resampled map whose size
    /// still differs from the target (odd input sizes) is resized to it.
    ///
    /// # Shapes
    /// - encoder_maps[i]: `[batch, encoder_channels_i, H * scale_i, W * scale_i]`
    /// - decoder_maps[j]: `[batch, channels_j, H / scale_j, W / scale_j]`
    /// - output: `[batch, skip_channels * inputs, H, W]`
    pub fn forward(
        &self,
        encoder_maps: &[Tensor<B, 4>],
        decoder_maps: &[Tensor<B, 4>],
    ) -> Tensor<B, 4> {
        let strategy = &self.interpolation.0;
        let mut target = None;
        let mut paths =
            Vec::with_capacity(self.encoder_paths.len() + self.decoder_paths.len());

        for (map, path) in encoder_maps.iter().zip(&self.encoder_paths) {
            let x = path.forward(map.clone());
            let [_, _, h, w] = x.dims();
            let size = *target.get_or_insert([h, w]);
            paths.push(resize(x, size, strategy));
        }

        for (map, path) in decoder_maps.iter().zip(&self.decoder_paths) {
            let x = path.forward(map.clone(), strategy);
            let x = match target {
                Some(size) => resize(x, size, strategy),
                None => x,
            };
            paths.push(x);
        }

        let x = self.dropout.forward(Tensor::cat(paths, 1));
        self.fuse.iter().fold(x, |x, layer| layer.forward(x))
    }

    /// Number of inputs this block fuses.
    pub fn num_inputs(&self) -> usize {
        self.encoder_paths.len() + self.decoder_paths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    fn random(shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::random(shape, Distribution::Normal(0.0, 1.0), &Default::default())
    }

    #[test]
    fn default_decoder_scales_are_descending_powers_of_two() {
        let config = FullScaleFusionConfig::new(vec![8, 4], vec![1, 2], 3, 16);
        assert_eq!(config.resolved_decoder_scales(), vec![8, 4, 2]);
        assert_eq!(config.output_channels(), 64 * 5);

        let config = FullScaleFusionConfig::new(vec![8], vec![1], 0, 16);
        assert!(config.resolved_decoder_scales().is_empty());
    }

    #[test]
    fn fuses_to_target_resolution() {
        let device = Default::default();
        // Stage 2 of a 4-level encoder: two encoder maps (target and one finer), two
        // decoder maps (bottom and stage 1).
        let block = FullScaleFusionConfig::new(vec![16, 8], vec![1, 2], 2, 32)
            .with_skip_channels(4)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(block.num_inputs(), 4);

        let encoder_maps = [random([2, 16, 8, 8]), random([2, 8, 16, 16])];
        let decoder_maps = [random([2, 32, 2, 2]), random([2, 16, 4, 4])];
        let out = block.forward(&encoder_maps, &decoder_maps);

        assert_eq!(out.dims(), [2, 16, 8, 8]);
    }

    #[test]
    fn odd_sizes_are_resampled_to_target() {
        let device = Default::default();
        let block = FullScaleFusionConfig::new(vec![4, 4], vec![1, 2], 1, 6)
            .with_skip_channels(2)
            .with_upsample_order(UpsampleOrder::UpsampleThenProject)
            .with_interpolation(InterpolationStrategy::Nearest)
            .init::<TestBackend>(&device)
            .unwrap();

        // 5x5 target: the 9x9 map pools to 5x5 with ceil mode, the 3x3 bottom map
        // upsamples to 6x6 and is resized down.
        let encoder_maps = [random([1, 4, 5, 5]), random([1, 4, 9, 9])];
        let decoder_maps = [random([1, 6, 3, 3])];
        let out = block.forward(&encoder_maps, &decoder_maps);

        assert_eq!(out.dims(), [1, 6, 5, 5]);
    }

    #[test]
    fn fuse_block_count_is_configurable() {
        let device = Default::default();
        let block = FullScaleFusionConfig::new(vec![4], vec![1], 1, 4)
            .with_skip_channels(2)
            .with_fuse_blocks(1)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(block.fuse.len(), 1);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let device = Default::default();
        let result = FullScaleFusionConfig::new(vec![4, 8], vec![1], 0, 4)
            .init::<TestBackend>(&device);
        assert!(matches!(
            result,
            Err(UNet3PlusError::InvalidConfiguration { .. })
        ));

        let result = FullScaleFusionConfig::new(vec![4], vec![1], 2, 4)
            .with_decoder_scales(Some(vec![2]))
            .init::<TestBackend>(&device);
        assert!(result.is_err());
    }
}
