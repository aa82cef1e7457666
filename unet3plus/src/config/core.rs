//! Core configuration structures for UNet3+.

use std::path::PathBuf;

use backbones::{BackboneVariant, NUM_FEATURE_LEVELS};
use burn::prelude::*;

use super::enums::{InterpolationStrategy, UpsampleOrder};
use crate::error::{UNet3PlusError, UNet3PlusResult};

/// Encoder configuration: backbone selection and the target channel schedule.
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Backbone name, e.g. `efficientnet-b5`.
    #[config(default = "String::from(\"efficientnet-b5\")")]
    pub backbone: String,
    /// Channel schedule. The first entry is the input channel count, the rest are the
    /// channels of each encoder level, finest first.
    #[config(default = "vec![3, 64, 128, 256, 512, 1024]")]
    pub channels: Vec<usize>,
    /// Load pretrained backbone weights instead of initializing them.
    #[config(default = false)]
    pub pretrained: bool,
    /// Explicit checkpoint for the pretrained backbone. Defaults to the cache location.
    #[config(default = "None")]
    pub weights: Option<PathBuf>,
}

impl EncoderConfig {
    /// Parses the configured backbone name.
    pub fn variant(&self) -> UNet3PlusResult<BackboneVariant> {
        Ok(self.backbone.parse()?)
    }

    /// Number of encoder levels (channel schedule minus the input entry).
    pub fn num_levels(&self) -> usize {
        self.channels.len().saturating_sub(1)
    }

    /// Output channels of each encoder level, finest first.
    pub fn level_channels(&self) -> &[usize] {
        self.channels.get(1..).unwrap_or_default()
    }
}

/// Decoder configuration.
#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Width every skip path is projected to.
    #[config(default = 64)]
    pub skip_channels: usize,
    /// Dropout applied to the concatenated skip paths.
    #[config(default = 0.3)]
    pub dropout: f64,
    /// Upsample/projection order on decoder-to-decoder paths.
    #[config(default = "UpsampleOrder::ProjectThenUpsample")]
    pub upsample_order: UpsampleOrder,
    /// Number of conv + BN + ReLU layers refining the concatenation.
    #[config(default = 2)]
    pub fuse_blocks: usize,
}

/// Prediction head configuration.
#[derive(Config, Debug)]
pub struct HeadConfig {
    /// Number of segmentation classes (output channels).
    #[config(default = 1)]
    pub num_classes: usize,
    /// Number of auxiliary (deep supervision) heads.
    #[config(default = 2)]
    pub aux_heads: usize,
    /// Gate auxiliary outputs with an object presence classifier.
    #[config(default = true)]
    pub classification_guided: bool,
    /// Use a 4x4 stride 2 transposed conv as the final head.
    #[config(default = false)]
    pub transpose_final: bool,
}

/// UNet3+ model configuration.
#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = "EncoderConfig::new()")]
    pub encoder: EncoderConfig,
    #[config(default = "DecoderConfig::new()")]
    pub decoder: DecoderConfig,
    #[config(default = "HeadConfig::new()")]
    pub heads: HeadConfig,
    /// Interpolation used for every resize in the network.
    #[config(default = "InterpolationStrategy::Bilinear")]
    pub interpolation: InterpolationStrategy,
}

impl ModelConfig {
    /// Number of decoder stages, equal to the number of encoder levels.
    pub fn num_stages(&self) -> usize {
        self.encoder.num_levels()
    }

    /// Channels of every fused decoder stage.
    pub fn decoder_channels(&self) -> usize {
        self.decoder.skip_channels * self.num_stages()
    }

    /// Decoder stages that carry an auxiliary head.
    ///
    /// The heads sit on the last `aux_heads` intermediate stages, i.e. all stages but
    /// the finest one.
    pub fn aux_stage_indices(&self) -> Vec<usize> {
        let stages = self.num_stages();
        let end = stages.saturating_sub(1);
        let start = end.saturating_sub(self.heads.aux_heads);
        (start..end).collect()
    }

    /// Checks the configuration for logical consistency.
    ///
    /// # Errors
    ///
    /// Returns [`UNet3PlusError::UnsupportedBackbone`] for unknown backbone names and
    /// [`UNet3PlusError::InvalidConfiguration`] for inconsistent settings.
    pub fn validate(&self) -> UNet3PlusResult<()> {
        self.encoder.variant()?;

        let invalid = |reason: String| Err(UNet3PlusError::InvalidConfiguration { reason });

        if self.encoder.channels.first() != Some(&3) {
            return invalid(format!(
                "channel schedule must start with 3 input channels, got {:?}",
                self.encoder.channels
            ));
        }
        let levels = self.encoder.num_levels();
        if !(2..=NUM_FEATURE_LEVELS).contains(&levels) {
            return invalid(format!(
                "channel schedule must describe 2 to {NUM_FEATURE_LEVELS} encoder levels, got {levels}"
            ));
        }
        if self.encoder.level_channels().contains(&0) {
            return invalid("encoder channels must be positive".to_string());
        }
        if self.decoder.skip_channels == 0 {
            return invalid("skip_channels must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.decoder.dropout) {
            return invalid(format!(
                "dropout must be in [0, 1), got {}",
                self.decoder.dropout
            ));
        }
        if self.heads.num_classes == 0 {
            return invalid("num_classes must be at least 1".to_string());
        }
        if self.heads.aux_heads > levels - 1 {
            return invalid(format!(
                "aux_heads ({}) cannot exceed the number of intermediate decoder stages ({})",
                self.heads.aux_heads,
                levels - 1
            ));
        }

        Ok(())
    }
}
