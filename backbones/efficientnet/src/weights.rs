//! Loading torchvision EfficientNet checkpoints.
//!
//! torchvision stores the network as `features.{stage}.{block}.block.{layer}` where each
//! layer is itself a `(conv, bn)` sequential. The rules below map that layout onto
//! [`EfficientNet`]'s module tree. The classifier and the final 1x1 conv (`features.8`)
//! have no counterpart and are ignored.

use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use thiserror::Error;

use crate::{EfficientNet, EfficientNetRecord};

/// Errors raised while loading pretrained weights.
#[derive(Debug, Error)]
pub enum WeightError {
    /// The checkpoint file does not exist
    #[error("weight file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The checkpoint could not be read or did not match the module tree
    #[error("failed to load weights from {}: {reason}", path.display())]
    LoadFailed { path: PathBuf, reason: String },
}

/// Default on-disk location of the torchvision checkpoint for a variant.
///
/// Resolves to `<cache_dir>/unet3plus/<variant>.pth`.
pub fn default_weights_path(variant: &str) -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("unet3plus").join(format!("{variant}.pth")))
}

/// Builds the PyTorch load arguments with the torchvision key remapping.
pub fn torchvision_load_args(path: &Path) -> LoadArgs {
    let mut args = LoadArgs::new(path.to_path_buf())
        .with_key_remap(r"^features\.0\.0\.(.+)", "stem.conv.$1")
        .with_key_remap(r"^features\.0\.1\.(.+)", "stem.bn.$1");

    // Stage 0 has no expansion layer, so its sequential indices are shifted by one.
    let stage0 = [(0, "depthwise"), (2, "project")];
    for (idx, name) in stage0 {
        args = args
            .with_key_remap(
                &format!(r"^features\.1\.([0-9]+)\.block\.{idx}\.0\.(.+)"),
                &format!("stages.0.blocks.$1.{name}.conv.$2"),
            )
            .with_key_remap(
                &format!(r"^features\.1\.([0-9]+)\.block\.{idx}\.1\.(.+)"),
                &format!("stages.0.blocks.$1.{name}.bn.$2"),
            );
    }
    args = args.with_key_remap(
        r"^features\.1\.([0-9]+)\.block\.1\.(fc[12])\.(.+)",
        "stages.0.blocks.$1.se.$2.$3",
    );

    let layers = [(0, "expand"), (1, "depthwise"), (3, "project")];
    for stage in 1..7 {
        let feature = stage + 1;
        for (idx, name) in layers {
            args = args
                .with_key_remap(
                    &format!(r"^features\.{feature}\.([0-9]+)\.block\.{idx}\.0\.(.+)"),
                    &format!("stages.{stage}.blocks.$1.{name}.conv.$2"),
                )
                .with_key_remap(
                    &format!(r"^features\.{feature}\.([0-9]+)\.block\.{idx}\.1\.(.+)"),
                    &format!("stages.{stage}.blocks.$1.{name}.bn.$2"),
                );
        }
        args = args.with_key_remap(
            &format!(r"^features\.{feature}\.([0-9]+)\.block\.2\.(fc[12])\.(.+)"),
            &format!("stages.{stage}.blocks.$1.se.$2.$3"),
        );
    }

    args
}

impl<B: Backend> EfficientNet<B> {
    /// Replaces the parameters with a torchvision checkpoint.
    pub fn load_torchvision_weights(
        self,
        path: &Path,
        device: &Device<B>,
    ) -> Result<Self, WeightError> {
        if !path.exists() {
            return Err(WeightError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();
        let record: EfficientNetRecord<B> = recorder
            .load(torchvision_load_args(path), device)
            .map_err(|e| WeightError::LoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(self.load_record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EfficientNetConfig;
    use burn::backend::NdArray;

    #[test]
    fn missing_file_is_reported() {
        let device = Default::default();
        let model = EfficientNetConfig::b0().init::<NdArray<f32>>(&device);

        let result = model.load_torchvision_weights(Path::new("does/not/exist.pth"), &device);
        assert!(matches!(result, Err(WeightError::NotFound { .. })));
    }

    #[test]
    fn default_path_uses_variant_name() {
        if let Some(path) = default_weights_path("efficientnet-b5") {
            assert!(path.ends_with("unet3plus/efficientnet-b5.pth"));
        }
    }
}
