//! Backbone implementations for UNet3+
//!
//! This crate provides a unified interface over the feature extractors the UNet3+
//! encoder can be built on. Every backbone exposes a pyramid of feature maps, finest
//! first, each at half the resolution of the previous one.

use std::{fmt, str::FromStr};

use burn::{nn::Initializer, prelude::*};
use thiserror::Error;

pub use efficientnet::{EfficientNet, EfficientNetConfig, NUM_FEATURE_LEVELS};
#[cfg(feature = "pretrained")]
pub use efficientnet::{default_weights_path, WeightError};

/// Unified feature extractor trait
pub trait FeatureExtractor<B: Backend> {
    /// Returns the first `levels` feature maps, finest first.
    ///
    /// # Arguments
    /// * `input` - Input tensor of shape `[batch_size, 3, height, width]`
    fn extract(&self, input: Tensor<B, 4>, levels: usize) -> Vec<Tensor<B, 4>>;

    /// Native output channels of each feature level
    fn output_channels(&self) -> Vec<usize>;
}

impl<B: Backend> FeatureExtractor<B> for EfficientNet<B> {
    fn extract(&self, input: Tensor<B, 4>, levels: usize) -> Vec<Tensor<B, 4>> {
        self.forward_features(input, levels)
    }

    fn output_channels(&self) -> Vec<usize> {
        self.feature_channels()
    }
}

/// Error returned when a backbone name is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown backbone '{name}' - available backbones: {available}")]
pub struct UnknownBackbone {
    pub name: String,
    pub available: String,
}

/// Supported backbone variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackboneVariant {
    /// EfficientNet-B0
    EfficientNetB0,
    /// EfficientNet-B5
    EfficientNetB5,
    /// EfficientNet-B6
    EfficientNetB6,
}

impl BackboneVariant {
    /// All variants, in registry order
    pub const ALL: [Self; 3] = [
        Self::EfficientNetB0,
        Self::EfficientNetB5,
        Self::EfficientNetB6,
    ];

    /// Canonical name, e.g. `efficientnet-b5`
    pub const fn name(self) -> &'static str {
        match self {
            Self::EfficientNetB0 => "efficientnet-b0",
            Self::EfficientNetB5 => "efficientnet-b5",
            Self::EfficientNetB6 => "efficientnet-b6",
        }
    }

    /// Network configuration for this variant
    pub fn config(self) -> EfficientNetConfig {
        match self {
            Self::EfficientNetB0 => EfficientNetConfig::b0(),
            Self::EfficientNetB5 => EfficientNetConfig::b5(),
            Self::EfficientNetB6 => EfficientNetConfig::b6(),
        }
    }

    /// Native channels of each feature level, without building the network
    pub fn feature_channels(self) -> Vec<usize> {
        self.config().feature_channels().to_vec()
    }
}

impl fmt::Display for BackboneVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackboneVariant {
    type Err = UnknownBackbone;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let short = normalized
            .strip_prefix("efficientnet-")
            .or_else(|| normalized.strip_prefix("efficientnet_"))
            .unwrap_or(&normalized);

        match short {
            "b0" => Ok(Self::EfficientNetB0),
            "b5" => Ok(Self::EfficientNetB5),
            "b6" => Ok(Self::EfficientNetB6),
            _ => Err(UnknownBackbone {
                name: s.to_string(),
                available: Self::ALL.map(Self::name).join(", "),
            }),
        }
    }
}

/// Enum to wrap different backbone implementations
#[derive(Module, Debug)]
pub enum BackboneWrapper<B: Backend> {
    /// EfficientNet backbone
    EfficientNet(EfficientNet<B>),
}

impl<B: Backend> FeatureExtractor<B> for BackboneWrapper<B> {
    fn extract(&self, input: Tensor<B, 4>, levels: usize) -> Vec<Tensor<B, 4>> {
        match self {
            Self::EfficientNet(backbone) => backbone.extract(input, levels),
        }
    }

    fn output_channels(&self) -> Vec<usize> {
        match self {
            Self::EfficientNet(backbone) => backbone.output_channels(),
        }
    }
}

/// Factory function to create freshly initialized backbones
pub fn create_backbone<B: Backend>(
    variant: BackboneVariant,
    initializer: &Initializer,
    device: &Device<B>,
) -> BackboneWrapper<B> {
    let config = variant.config().with_initializer(initializer.clone());
    BackboneWrapper::EfficientNet(config.init(device))
}
