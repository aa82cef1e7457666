//! UNet3+ semantic segmentation on Burn.
//!
//! An EfficientNet encoder feeds a decoder whose stages fuse every encoder level and
//! every coarser decoder stage (full-scale skip connections). Optional auxiliary heads
//! provide deep supervision and can be gated by an object presence head. The
//! [`training`] module drives optimisation, validation and best-checkpoint handling.

pub mod config;
pub mod dataset;
pub mod error;
pub mod losses;
pub mod metrics;
pub mod models;
pub mod training;
pub mod utils;
pub mod visualization;

pub use config::{
    DecoderConfig, EncoderConfig, HeadConfig, InterpolationStrategy, ModelConfig, UpsampleOrder,
};
pub use dataset::{FolderDataset, SegmentationBatcher, SegmentationItem};
pub use error::{UNet3PlusError, UNet3PlusResult};
pub use losses::{LossConfig, LossFunction, LossKind, SegmentationLoss};
pub use metrics::{dice_coefficient, threshold_predictions};
pub use models::{Predictions, UNet3Plus, UNet3PlusRecord};
pub use training::{
    BatchSource, EpochHook, HookContext, JsonLinesSink, MemorySink, MetricsSink,
    SegmentationBatch, Trainer, TrainerConfig, TrainingOutcome, ValidationConfig,
};
pub use utils::seed_everything;
pub use visualization::render_sample_panel;
