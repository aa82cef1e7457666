//! UNet3+ command line tools.
//!
//! ## Usage
//!
//! ```bash
//! # Write the default configuration, edit it, then train
//! cargo run --bin train -- --write-config train.json
//! cargo run --release --bin train -- --config train.json
//!
//! # Train on the GPU
//! cargo run --release --bin train --features wgpu --no-default-features -- --config train.json
//! ```

pub mod backend;
pub mod config;

pub use backend::{create_device, get_backend_name, SelectedBackend, SelectedDevice, TrainBackend};
pub use config::TrainingConfig;
