use std::path::PathBuf;

use backbones::UnknownBackbone;
use thiserror::Error;

/// The error type for `unet3plus-burn` operations.
///
/// Configuration problems surface when a model is constructed; everything else is
/// raised by the training loop and its collaborators (checkpoints, metrics, data).
#[derive(Error, Debug)]
pub enum UNet3PlusError {
    /// Error for when an unsupported backbone network is specified.
    #[error("Unsupported backbone: {backbone} (available: {available})")]
    UnsupportedBackbone {
        /// The name of the unsupported backbone.
        backbone: String,
        /// Comma separated list of supported names.
        available: String,
    },

    /// Error for when an invalid model or trainer configuration is provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when loading pretrained backbone weights fails.
    #[error("Failed to load weights: {reason}")]
    WeightLoadingFailed {
        /// The reason for the weight loading failure.
        reason: String,
    },

    /// Error for when a checkpoint cannot be written.
    #[error("Checkpoint operation failed for {}: {reason}", path.display())]
    CheckpointFailed {
        /// Checkpoint file path.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// Error for when a metrics sink cannot persist a record.
    #[error("Metrics sink failed: {reason}")]
    MetricsSinkFailed {
        /// The reason for the failure.
        reason: String,
    },

    /// Error for when dataset operations fail.
    #[error("Dataset error: {message}")]
    DatasetError {
        /// The error message.
        message: String,
    },

    /// Error for when tensor data cannot be read back to the host.
    #[error("Tensor data conversion failed: {reason}")]
    TensorDataFailed {
        /// The reason for the failure.
        reason: String,
    },

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<UnknownBackbone> for UNet3PlusError {
    fn from(err: UnknownBackbone) -> Self {
        Self::UnsupportedBackbone {
            backbone: err.name,
            available: err.available,
        }
    }
}

/// A specialized `Result` type for `unet3plus-burn` operations.
pub type UNet3PlusResult<T> = Result<T, UNet3PlusError>;
