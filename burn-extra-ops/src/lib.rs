//! Additional operations for the Burn deep learning framework
//!
//! This crate provides operations that are commonly used in deep learning but are not
//! yet available in the core Burn framework:
//!
//! - [`DropPath`]: stochastic depth for residual branches
//! - [`CeilMaxPool2d`]: max pooling whose output size rounds up on odd inputs
//! - [`Identity`]: pass-through module for optional layers

mod drop_path;
mod identity;
mod pool;

pub use drop_path::{DropPath, DropPathConfig};
pub use identity::Identity;
pub use pool::{max_pool2d_ceil, CeilMaxPool2d, CeilMaxPool2dConfig};
