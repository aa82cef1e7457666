//! Training run configuration, stored as JSON.

use std::{fs, path::{Path, PathBuf}};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use unet3plus_burn::{
    losses::LossConfig, training::ValidationConfig, ModelConfig, TrainerConfig,
};

/// Everything the `train` binary needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Model configuration.
    pub model: ModelConfig,
    /// Loss used for training and validation.
    pub loss: LossConfig,
    /// Class names, one per mask folder and output channel.
    pub class_names: Vec<String>,
    /// Training dataset root (`images/`, `masks/<class>/`).
    pub train_dataset_path: PathBuf,
    /// Validation dataset root.
    pub val_dataset_path: PathBuf,
    /// Directory for the best checkpoint and the metrics log.
    pub save_dir: PathBuf,
    /// Samples are resized to `[height, width]`.
    pub image_size: [usize; 2],
    pub num_epochs: usize,
    pub val_interval: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub learning_rate: f64,
    pub weight_decay: f32,
    /// The learning rate is multiplied by `lr_gamma` every `lr_step_size` validations.
    pub lr_step_size: usize,
    pub lr_gamma: f64,
    /// Weight of the auxiliary head losses; 0 trains on the main output only.
    pub aux_loss_weight: f64,
    pub validation: ValidationConfig,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::new(),
            loss: LossConfig::new(),
            class_names: vec!["foreground".to_string()],
            train_dataset_path: PathBuf::from("datasets/train"),
            val_dataset_path: PathBuf::from("datasets/val"),
            save_dir: PathBuf::from("checkpoints"),
            image_size: [512, 512],
            num_epochs: 100,
            val_interval: 1,
            batch_size: 4,
            num_workers: 4,
            learning_rate: 1e-4,
            weight_decay: 1e-4,
            lr_step_size: 10,
            lr_gamma: 0.5,
            aux_loss_weight: 0.0,
            validation: ValidationConfig::new(),
            seed: 123,
        }
    }
}

impl TrainingConfig {
    /// Reads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Writes the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Checks values the library cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "Batch size must be greater than 0");
        ensure!(self.num_epochs > 0, "Number of epochs must be greater than 0");
        ensure!(self.val_interval > 0, "Validation interval must be greater than 0");
        ensure!(self.learning_rate > 0.0, "Learning rate must be positive");
        ensure!(self.lr_step_size > 0, "LR step size must be greater than 0");
        ensure!(
            self.class_names.len() == self.model.heads.num_classes,
            "{} class names given for {} output classes",
            self.class_names.len(),
            self.model.heads.num_classes
        );
        self.model.validate()?;
        Ok(())
    }

    /// Trainer settings derived from this configuration.
    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig::new(self.save_dir.clone(), self.class_names.clone())
            .with_num_epochs(self.num_epochs)
            .with_val_interval(self.val_interval)
            .with_aux_loss_weight(self.aux_loss_weight)
            .with_validation(self.validation.clone())
    }
}
