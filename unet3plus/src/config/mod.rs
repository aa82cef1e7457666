//! Configuration module for UNet3+.
//!
//! - `core`: model configuration structures and their validation
//! - `enums`: enumeration types used in configurations

pub mod core;
pub mod enums;

pub use self::core::{DecoderConfig, EncoderConfig, HeadConfig, ModelConfig};
pub use enums::{InterpolationStrategy, UpsampleOrder};
