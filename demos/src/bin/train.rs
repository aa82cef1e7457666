//! UNet3+ training.
//!
//! Trains on a folder dataset, validates every `val_interval` epochs and keeps the best
//! checkpoint (`best_dice_{score}.mpk`) in the save directory. Metrics are appended to
//! `<save_dir>/logs/metrics.jsonl`.
//!
//! ## Usage
//!
//! ```bash
//! # Train with default configuration
//! cargo run --release --bin train
//!
//! # Train with a configuration file and overrides
//! cargo run --release --bin train -- --config train.json --num-epochs 50
//!
//! # Train with WGPU backend
//! cargo run --release --bin train --features wgpu --no-default-features
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder, Dataset},
    lr_scheduler::step::StepLrSchedulerConfig,
    optim::AdamWConfig,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use unet3plus_burn::{
    seed_everything, FolderDataset, JsonLinesSink, SegmentationBatch, SegmentationBatcher, Trainer,
    UNet3Plus,
};
use unet3plus_demos::{
    create_device, get_backend_name, SelectedBackend, TrainBackend, TrainingConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the resolved configuration to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Override batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override number of epochs
    #[arg(long)]
    num_epochs: Option<usize>,

    /// Override learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Override dataset root; expects `train/` and `val/` inside
    #[arg(long)]
    dataset_path: Option<PathBuf>,

    /// Override save directory
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Override random seed
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrainingConfig::load(path)?,
        None => TrainingConfig::default(),
    };
    apply_overrides(&mut config, &args);

    if let Some(path) = &args.write_config {
        config.save(path)?;
        tracing::info!(path = %path.display(), "wrote configuration");
        return Ok(());
    }

    config.validate()?;
    for path in [&config.train_dataset_path, &config.val_dataset_path] {
        if !path.exists() {
            bail!("Dataset path does not exist: {}", path.display());
        }
    }

    seed_everything::<TrainBackend>(config.seed);

    let device = create_device();
    tracing::info!(
        backend = get_backend_name(),
        backbone = %config.model.encoder.backbone,
        classes = ?config.class_names,
        epochs = config.num_epochs,
        batch_size = config.batch_size,
        lr = config.learning_rate,
        "starting UNet3+ training"
    );

    let model = config
        .model
        .init::<TrainBackend>(&device)
        .context("Failed to initialize UNet3+ model")?;

    let (train_loader, valid_loader) = create_dataloaders(&config)?;

    let optimizer = AdamWConfig::new()
        .with_weight_decay(config.weight_decay)
        .init::<TrainBackend, UNet3Plus<TrainBackend>>();
    let scheduler = StepLrSchedulerConfig::new(config.learning_rate, config.lr_step_size)
        .with_gamma(config.lr_gamma)
        .init()
        .map_err(anyhow::Error::msg)
        .context("Invalid learning rate schedule")?;
    let sink = JsonLinesSink::new(config.save_dir.join("logs"))
        .context("Failed to open metrics log")?;

    let mut trainer = Trainer::<TrainBackend, _, _, _, _>::new(
        config.trainer_config(),
        optimizer,
        config.loss.init(),
        scheduler,
        sink,
        device,
    );
    let outcome = trainer
        .fit(model, &train_loader, &valid_loader)
        .context("Training failed")?;

    match &outcome.best_checkpoint {
        Some(path) => tracing::info!(
            best_dice = outcome.best_dice,
            best_epoch = outcome.best_epoch,
            checkpoint = %path.display(),
            "done"
        ),
        None => tracing::warn!("validation Dice never exceeded 0, no checkpoint written"),
    }

    Ok(())
}

fn apply_overrides(config: &mut TrainingConfig, args: &Args) {
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(num_epochs) = args.num_epochs {
        config.num_epochs = num_epochs;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.learning_rate = learning_rate;
    }
    if let Some(dataset_path) = &args.dataset_path {
        config.train_dataset_path = dataset_path.join("train");
        config.val_dataset_path = dataset_path.join("val");
    }
    if let Some(save_dir) = &args.save_dir {
        config.save_dir = save_dir.clone();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
}

type TrainLoader = Arc<dyn DataLoader<TrainBackend, SegmentationBatch<TrainBackend>>>;
type ValidLoader = Arc<dyn DataLoader<SelectedBackend, SegmentationBatch<SelectedBackend>>>;

/// Creates the training (shuffled) and validation data loaders.
fn create_dataloaders(config: &TrainingConfig) -> Result<(TrainLoader, ValidLoader)> {
    let train_dataset =
        FolderDataset::new(&config.train_dataset_path, &config.class_names, config.image_size)
            .context("Failed to create training dataset")?;
    let valid_dataset =
        FolderDataset::new(&config.val_dataset_path, &config.class_names, config.image_size)
            .context("Failed to create validation dataset")?;
    tracing::info!(
        train = train_dataset.len(),
        valid = valid_dataset.len(),
        "datasets loaded"
    );

    let train_loader: TrainLoader = DataLoaderBuilder::new(SegmentationBatcher::new())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_dataset);

    let valid_loader: ValidLoader = DataLoaderBuilder::new(SegmentationBatcher::new())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(valid_dataset);

    Ok((train_loader, valid_loader))
}
