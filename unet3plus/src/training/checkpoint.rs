//! Best-checkpoint bookkeeping.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};

use super::sink::RunSummary;
use crate::error::{UNet3PlusError, UNet3PlusResult};

/// Tracks the best validation Dice and keeps exactly one checkpoint for it on disk.
///
/// Only parameters are written; optimizer and scheduler state are not.
#[derive(Debug, Clone)]
pub struct BestCheckpoint {
    save_dir: PathBuf,
    best_dice: f64,
    best_epoch: usize,
    path: Option<PathBuf>,
}

impl BestCheckpoint {
    /// Starts with a best Dice of 0, so the first positive score is saved.
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            best_dice: 0.0,
            best_epoch: 0,
            path: None,
        }
    }

    pub const fn best_dice(&self) -> f64 {
        self.best_dice
    }

    /// 1-based epoch of the best score, 0 if nothing was saved yet.
    pub const fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_improvement(&self, dice: f64) -> bool {
        dice > self.best_dice
    }

    /// `{save_dir}/best_dice_{dice:.4}.mpk`
    pub fn checkpoint_path(&self, dice: f64) -> PathBuf {
        self.save_dir.join(format!("best_dice_{dice:.4}.mpk"))
    }

    /// Replaces the stored checkpoint when `dice` beats the best score.
    ///
    /// Returns the new run summary on improvement. The previous file is removed before
    /// the new one is written, so an interruption in between leaves no checkpoint.
    pub fn update<B: Backend, M: Module<B>>(
        &mut self,
        model: &M,
        dice: f64,
        epoch: usize,
    ) -> UNet3PlusResult<Option<RunSummary>> {
        if !self.is_improvement(dice) {
            return Ok(None);
        }

        if let Some(previous) = self.path.take() {
            if previous.exists() {
                if let Err(e) = fs::remove_file(&previous) {
                    tracing::warn!(path = %previous.display(), error = %e, "could not remove previous checkpoint");
                }
            }
        }

        fs::create_dir_all(&self.save_dir)?;
        let path = self.checkpoint_path(dice);
        model
            .clone()
            .save_file(path.clone(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
            .map_err(|e| UNet3PlusError::CheckpointFailed {
                path: path.clone(),
                reason: format!("{e:?}"),
            })?;

        tracing::info!(
            previous = self.best_dice,
            dice,
            epoch,
            path = %path.display(),
            "new best checkpoint"
        );

        self.best_dice = dice;
        self.best_epoch = epoch;
        self.path = Some(path.clone());

        Ok(Some(RunSummary {
            best_dice: dice,
            best_epoch: epoch,
            best_model_path: path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        nn::{Linear, LinearConfig},
    };

    type TestBackend = NdArray;

    fn checkpoints_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("best_dice_"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn checkpoint_name_uses_four_decimals() {
        let checkpoint = BestCheckpoint::new("runs");
        assert_eq!(
            checkpoint.checkpoint_path(0.123_456),
            PathBuf::from("runs").join("best_dice_0.1235.mpk")
        );
    }

    #[test]
    fn zero_dice_is_not_an_improvement() {
        let checkpoint = BestCheckpoint::new("runs");
        assert!(!checkpoint.is_improvement(0.0));
        assert!(checkpoint.is_improvement(0.01));
    }

    #[test]
    fn keeps_a_single_best_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model: Linear<TestBackend> = LinearConfig::new(2, 2).init(&device);
        let mut checkpoint = BestCheckpoint::new(dir.path());

        let summary = checkpoint.update(&model, 0.5, 1).unwrap().unwrap();
        assert_eq!(summary.best_epoch, 1);
        assert_eq!(checkpoints_in(dir.path()), vec!["best_dice_0.5000.mpk"]);

        assert!(checkpoint.update(&model, 0.4, 2).unwrap().is_none());
        assert!(checkpoint.update(&model, 0.5, 3).unwrap().is_none());

        let summary = checkpoint.update(&model, 0.75, 4).unwrap().unwrap();
        assert_eq!(checkpoints_in(dir.path()), vec!["best_dice_0.7500.mpk"]);
        assert_eq!(summary.best_model_path, dir.path().join("best_dice_0.7500.mpk"));
        assert_eq!(checkpoint.best_epoch(), 4);
        assert_eq!(checkpoint.best_dice(), 0.75);
    }

    #[test]
    fn missing_previous_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model: Linear<TestBackend> = LinearConfig::new(2, 2).init(&device);
        let mut checkpoint = BestCheckpoint::new(dir.path());

        checkpoint.update(&model, 0.3, 1).unwrap();
        fs::remove_file(checkpoint.path().unwrap()).unwrap();

        checkpoint.update(&model, 0.6, 2).unwrap();
        assert_eq!(checkpoints_in(dir.path()), vec!["best_dice_0.6000.mpk"]);
    }
}
