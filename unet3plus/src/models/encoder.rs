//! Encoder adapter: backbone feature pyramid projected to the configured channel schedule.

use backbones::{create_backbone, BackboneVariant, BackboneWrapper, FeatureExtractor};
use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
};
use burn_extra_ops::Identity;

use super::init::conv_initializer;
use crate::{
    config::EncoderConfig,
    error::{UNet3PlusError, UNet3PlusResult},
};

/// Channel projection applied to one backbone level.
#[derive(Module, Debug)]
pub enum ChannelProjection<B: Backend> {
    /// Native channels already match the target.
    Identity(Identity<B>),
    /// Bias-free 1x1 conv to the target channel count.
    Conv(Conv2d<B>),
}

impl<B: Backend> ChannelProjection<B> {
    fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        if in_channels == out_channels {
            Self::Identity(Identity::new())
        } else {
            Self::Conv(
                Conv2dConfig::new([in_channels, out_channels], [1, 1])
                    .with_bias(false)
                    .with_initializer(conv_initializer())
                    .init(device),
            )
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Identity(identity) => identity.forward(x),
            Self::Conv(conv) => conv.forward(x),
        }
    }

    /// Whether this level is projected (as opposed to passed through).
    pub const fn is_projection(&self) -> bool {
        matches!(self, Self::Conv(_))
    }
}

/// UNet3+ encoder.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub backbone: BackboneWrapper<B>,
    pub projections: Vec<ChannelProjection<B>>,
}

impl<B: Backend> Encoder<B> {
    /// Builds the encoder for `config`.
    ///
    /// # Errors
    ///
    /// Fails with [`UNet3PlusError::UnsupportedBackbone`] for unknown backbone names,
    /// [`UNet3PlusError::InvalidConfiguration`] when the schedule asks for more levels
    /// than the backbone has, and [`UNet3PlusError::WeightLoadingFailed`] when
    /// pretrained weights cannot be loaded.
    pub fn new(config: &EncoderConfig, device: &Device<B>) -> UNet3PlusResult<Self> {
        let variant = config.variant()?;
        let targets = config.level_channels();
        let native = variant.feature_channels();

        if targets.is_empty() || targets.len() > native.len() {
            return Err(UNet3PlusError::InvalidConfiguration {
                reason: format!(
                    "{variant} provides {} feature levels, {} requested",
                    native.len(),
                    targets.len()
                ),
            });
        }

        let backbone = if config.pretrained {
            load_pretrained(variant, config, device)?
        } else {
            create_backbone(variant, &conv_initializer(), device)
        };

        let projections = native
            .iter()
            .zip(targets)
            .map(|(&native, &target)| ChannelProjection::new(native, target, device))
            .collect();

        Ok(Self {
            backbone,
            projections,
        })
    }

    /// Encoder output, finest first, one map per configured level.
    pub fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        self.backbone
            .extract(input, self.projections.len())
            .into_iter()
            .zip(&self.projections)
            .map(|(feature, projection)| projection.forward(feature))
            .collect()
    }

    /// Number of encoder levels.
    pub fn num_levels(&self) -> usize {
        self.projections.len()
    }
}

#[cfg(feature = "pretrained")]
fn load_pretrained<B: Backend>(
    variant: BackboneVariant,
    config: &EncoderConfig,
    device: &Device<B>,
) -> UNet3PlusResult<BackboneWrapper<B>> {
    let path = config
        .weights
        .clone()
        .or_else(|| backbones::default_weights_path(variant.name()))
        .ok_or_else(|| UNet3PlusError::WeightLoadingFailed {
            reason: "no weight path given and no cache directory available".to_string(),
        })?;

    tracing::info!(backbone = %variant, path = %path.display(), "loading pretrained backbone");
    let backbone = variant
        .config()
        .init(device)
        .load_torchvision_weights(&path, device)
        .map_err(|e| UNet3PlusError::WeightLoadingFailed {
            reason: e.to_string(),
        })?;

    Ok(BackboneWrapper::EfficientNet(backbone))
}

#[cfg(not(feature = "pretrained"))]
fn load_pretrained<B: Backend>(
    variant: BackboneVariant,
    _config: &EncoderConfig,
    _device: &Device<B>,
) -> UNet3PlusResult<BackboneWrapper<B>> {
    Err(UNet3PlusError::WeightLoadingFailed {
        reason: format!(
            "pretrained {variant} weights requested but unet3plus-burn was built without the `pretrained` feature"
        ),
    })
}
