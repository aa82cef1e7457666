//! Training and validation.
//!
//! - `batch`: batch type and the [`BatchSource`] abstraction over data loaders
//! - `trainer`: the epoch loop
//! - `validation`: metrics and worst-sample selection on held-out data
//! - `checkpoint`: best-score checkpoint replacement
//! - `sink`: metrics records and their destinations
//! - `hooks`: per-epoch instrumentation

pub mod batch;
pub mod checkpoint;
pub mod hooks;
pub mod sink;
pub mod trainer;
pub mod validation;

pub use batch::{BatchSource, SegmentationBatch};
pub use checkpoint::BestCheckpoint;
pub use hooks::{EpochHook, HookContext};
pub use sink::{JsonLinesSink, MemorySink, MetricValue, MetricsRecord, MetricsSink, RunSummary};
pub use trainer::{Trainer, TrainerConfig, TrainingOutcome};
pub use validation::{
    validate, SampleRecord, ValidationAccumulator, ValidationConfig, ValidationReport,
    WorstSamples,
};
