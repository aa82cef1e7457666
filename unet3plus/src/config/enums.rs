//! Enumeration types for UNet3+ configuration.

use burn::prelude::*;

/// Defines the interpolation strategy for tensor resizing operations.
///
/// `Bilinear` uses align-corners sampling and is computed with matmuls, so both
/// strategies train on every backend.
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum InterpolationStrategy {
    /// Bilinear interpolation.
    Bilinear,
    /// Nearest neighbour interpolation.
    Nearest,
}

impl Default for InterpolationStrategy {
    fn default() -> Self {
        Self::Bilinear
    }
}

/// Order of the upsampling and the channel projection on decoder-to-decoder paths.
#[derive(Config, Debug, PartialEq, Eq, Hash)]
pub enum UpsampleOrder {
    /// Project at the coarse resolution, then upsample. Cheaper.
    ProjectThenUpsample,
    /// Upsample first, then project at the target resolution, as in the UNet3+ paper.
    UpsampleThenProject,
}

impl Default for UpsampleOrder {
    fn default() -> Self {
        Self::ProjectThenUpsample
    }
}
