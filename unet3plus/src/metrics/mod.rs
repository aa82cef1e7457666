//! Evaluation metrics.

pub mod dice;

pub use dice::{dice_coefficient, threshold_predictions};
