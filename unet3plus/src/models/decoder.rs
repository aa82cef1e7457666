//! UNet3+ decoder with dense full-scale connectivity.

use burn::prelude::*;
use burn_extra_ops::Identity;

use super::modules::{FullScaleFusion, FullScaleFusionConfig};
use crate::{
    config::{DecoderConfig, InterpolationStrategy},
    error::UNet3PlusResult,
};

/// A single decoder stage.
#[derive(Module, Debug)]
pub enum DecoderStage<B: Backend> {
    /// Stage 0: the coarsest encoder map passed through.
    Bottom(Identity<B>),
    /// Every later stage fuses encoder and coarser decoder maps.
    Fusion(FullScaleFusion<B>),
}

/// Decoder built from one stage per encoder level.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    pub stages: Vec<DecoderStage<B>>,
}

impl<B: Backend> Decoder<B> {
    /// Builds the decoder for encoder levels with `encoder_channels` (finest first).
    pub fn new(
        encoder_channels: &[usize],
        config: &DecoderConfig,
        interpolation: &InterpolationStrategy,
        device: &Device<B>,
    ) -> UNet3PlusResult<Self> {
        let reversed: Vec<usize> = encoder_channels.iter().rev().copied().collect();
        let levels = reversed.len();
        let mut stages = Vec::with_capacity(levels);

        for stage in 0..levels {
            if stage == 0 {
                stages.push(DecoderStage::Bottom(Identity::new()));
                continue;
            }

            let encoder_scales = (0..levels - stage).map(|exp| 1usize << exp).collect();
            let block = FullScaleFusionConfig::new(
                reversed[stage..].to_vec(),
                encoder_scales,
                stage,
                reversed[0],
            )
            .with_skip_channels(config.skip_channels)
            .with_dropout(config.dropout)
            .with_upsample_order(config.upsample_order.clone())
            .with_fuse_blocks(config.fuse_blocks)
            .with_interpolation(interpolation.clone())
            .init(device)?;

            stages.push(DecoderStage::Fusion(block));
        }

        Ok(Self { stages })
    }

    /// Runs every stage and returns their outputs in construction order (coarsest first).
    ///
    /// `encoder_maps` is the encoder output, finest first.
    pub fn forward(&self, encoder_maps: Vec<Tensor<B, 4>>) -> Vec<Tensor<B, 4>> {
        let reversed: Vec<_> = encoder_maps.into_iter().rev().collect();
        let mut outputs: Vec<Tensor<B, 4>> = Vec::with_capacity(self.stages.len());

        for (idx, stage) in self.stages.iter().enumerate() {
            let out = match stage {
                DecoderStage::Bottom(identity) => identity.forward(reversed[idx].clone()),
                DecoderStage::Fusion(block) => block.forward(&reversed[idx..], &outputs),
            };
            outputs.push(out);
        }

        outputs
    }

    /// Number of decoder stages.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }
}
