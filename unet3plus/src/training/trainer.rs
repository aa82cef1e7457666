//! The epoch loop.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    time::Instant,
};

use burn::{
    lr_scheduler::LrScheduler,
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use super::{
    batch::BatchSource,
    checkpoint::BestCheckpoint,
    hooks::{EpochHook, HookContext},
    sink::{MetricsRecord, MetricsSink},
    validation::{validate, ValidationConfig, ValidationReport},
};
use crate::{
    error::{UNet3PlusError, UNet3PlusResult},
    losses::{per_class_losses, LossFunction},
    models::UNet3Plus,
    utils::{format_hms, EtaEstimator},
    visualization::render_sample_panel,
};

/// Training loop settings.
#[derive(Config, Debug)]
pub struct TrainerConfig {
    /// Directory receiving the best checkpoint.
    pub save_dir: PathBuf,
    /// One name per output class, used in metric keys and logs.
    pub class_names: Vec<String>,
    #[config(default = 100)]
    pub num_epochs: usize,
    /// Validate every `val_interval` epochs.
    #[config(default = 1)]
    pub val_interval: usize,
    /// Weight of the mean auxiliary loss added to the main loss. 0 disables it.
    #[config(default = 0.0)]
    pub aux_loss_weight: f64,
    #[config(default = "ValidationConfig::new()")]
    pub validation: ValidationConfig,
}

/// What [`Trainer::fit`] hands back.
#[derive(Debug)]
pub struct TrainingOutcome<B: Backend> {
    /// The model after the last epoch.
    pub model: UNet3Plus<B>,
    /// Best validation Dice, 0 if no validation improved on 0.
    pub best_dice: f64,
    /// 1-based epoch of the best Dice, 0 if none.
    pub best_epoch: usize,
    pub best_checkpoint: Option<PathBuf>,
}

#[derive(Debug)]
struct EpochLosses {
    mean: f64,
    per_class: Vec<f64>,
}

/// Drives training, periodic validation and best-checkpoint handling.
pub struct Trainer<B, O, L, S, M>
where
    B: AutodiffBackend,
{
    config: TrainerConfig,
    optimizer: O,
    loss: L,
    scheduler: S,
    sink: M,
    device: B::Device,
    hook: Option<Box<dyn EpochHook<B>>>,
}

impl<B, O, L, S, M> Trainer<B, O, L, S, M>
where
    B: AutodiffBackend,
    O: Optimizer<UNet3Plus<B>, B>,
    L: LossFunction,
    S: LrScheduler,
    M: MetricsSink,
{
    pub fn new(
        config: TrainerConfig,
        optimizer: O,
        loss: L,
        scheduler: S,
        sink: M,
        device: B::Device,
    ) -> Self {
        Self {
            config,
            optimizer,
            loss,
            scheduler,
            sink,
            device,
            hook: None,
        }
    }

    /// Installs a hook that runs after each training phase.
    pub fn with_hook(mut self, hook: impl EpochHook<B> + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub const fn sink(&self) -> &M {
        &self.sink
    }

    pub fn into_sink(self) -> M {
        self.sink
    }

    fn check(&self, model: &UNet3Plus<B>) -> UNet3PlusResult<()> {
        let invalid = |reason: String| Err(UNet3PlusError::InvalidConfiguration { reason });

        if self.config.num_epochs == 0 {
            return invalid("num_epochs must be at least 1".to_string());
        }
        if self.config.val_interval == 0 {
            return invalid("val_interval must be at least 1".to_string());
        }
        if self.config.class_names.len() != model.num_classes() {
            return invalid(format!(
                "{} class names given for a model with {} classes",
                self.config.class_names.len(),
                model.num_classes()
            ));
        }
        Ok(())
    }

    /// Trains for `num_epochs` epochs.
    ///
    /// Every epoch emits one metrics record. Validation runs on the inner backend every
    /// `val_interval` epochs, steps the learning rate schedule and may replace the best
    /// checkpoint.
    pub fn fit<T, V>(
        &mut self,
        mut model: UNet3Plus<B>,
        train: &T,
        valid: &V,
    ) -> UNet3PlusResult<TrainingOutcome<B>>
    where
        T: BatchSource<B> + ?Sized,
        V: BatchSource<B::InnerBackend> + ?Sized,
    {
        self.check(&model)?;

        let num_epochs = self.config.num_epochs;
        let mut checkpoint = BestCheckpoint::new(self.config.save_dir.clone());
        let mut eta = EtaEstimator::new();
        let mut lr = self.scheduler.step();
        let run_start = Instant::now();

        tracing::info!(num_epochs, lr, save_dir = %self.config.save_dir.display(), "starting training");

        for epoch in 0..num_epochs {
            let epoch_number = epoch + 1;
            let epoch_start = Instant::now();

            let (trained, losses) = self.train_epoch(model, train, lr)?;
            model = trained;

            let epoch_time = epoch_start.elapsed();
            eta.record(epoch_time);
            tracing::info!(
                epoch = epoch_number,
                num_epochs,
                loss = losses.mean,
                time = %format_hms(epoch_time),
                eta = %format_hms(eta.remaining(num_epochs - epoch_number)),
                "epoch finished"
            );

            let mut record = MetricsRecord::new();
            record.insert_scalar("total/train_loss", losses.mean);
            for (name, value) in self.config.class_names.iter().zip(&losses.per_class) {
                record.insert_scalar(format!("train_loss_per_class/{name}"), *value);
            }
            record.insert_scalar("epoch", epoch_number as f64);

            if let Some(hook) = self.hook.as_mut() {
                let mut log_buffer = BTreeMap::from([("val_dice".to_string(), checkpoint.best_dice())]);
                hook.after_train_epoch(&mut HookContext {
                    model: &model,
                    log_buffer: &mut log_buffer,
                });
            }

            if epoch_number % self.config.val_interval == 0 {
                let valid_model = model.valid();
                let report = validate(
                    &valid_model,
                    valid,
                    &self.loss,
                    &self.config.validation,
                    &self.device,
                )?;

                lr = self.scheduler.step();
                self.record_validation(&mut record, &report, lr);

                if let Some(summary) = checkpoint.update(&valid_model, report.mean_dice, epoch_number)? {
                    self.sink.update_summary(&summary)?;
                }
            }

            self.sink.log(&record)?;
        }

        tracing::info!(
            total = %format_hms(run_start.elapsed()),
            best_dice = checkpoint.best_dice(),
            best_epoch = checkpoint.best_epoch(),
            "training finished"
        );

        Ok(TrainingOutcome {
            model,
            best_dice: checkpoint.best_dice(),
            best_epoch: checkpoint.best_epoch(),
            best_checkpoint: checkpoint.path().map(PathBuf::from),
        })
    }

    fn train_epoch<T>(
        &mut self,
        mut model: UNet3Plus<B>,
        train: &T,
        lr: f64,
    ) -> UNet3PlusResult<(UNet3Plus<B>, EpochLosses)>
    where
        T: BatchSource<B> + ?Sized,
    {
        let mut loss_sum = 0.0;
        let mut class_sums = vec![0.0; model.num_classes()];
        let mut num_batches = 0usize;

        for batch in train.batches() {
            let batch = batch.to_device(&self.device);
            let predictions = model.forward(batch.images);

            let mut loss = self.loss.loss(predictions.out.clone(), batch.masks.clone());
            if self.config.aux_loss_weight > 0.0 && !predictions.aux.is_empty() {
                let count = predictions.aux.len() as f64;
                let aux_loss = predictions
                    .aux
                    .values()
                    .map(|aux| self.loss.loss(aux.clone(), batch.masks.clone()))
                    .reduce(|acc, value| acc + value);
                if let Some(aux_loss) = aux_loss {
                    loss = loss + aux_loss.div_scalar(count).mul_scalar(self.config.aux_loss_weight);
                }
            }

            for (sum, value) in class_sums
                .iter_mut()
                .zip(per_class_losses(&self.loss, &predictions.out, &batch.masks))
            {
                *sum += value;
            }
            let batch_loss = loss.clone().detach().into_scalar().elem::<f64>();
            loss_sum += batch_loss;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = self.optimizer.step(lr, model, grads);
            num_batches += 1;

            tracing::debug!(
                batch = num_batches,
                loss = format!("{batch_loss:.4}"),
                running_loss = format!("{:.4}", loss_sum / num_batches as f64),
                "train step"
            );
        }

        if num_batches == 0 {
            return Err(UNet3PlusError::DatasetError {
                message: "training set produced no batches".to_string(),
            });
        }

        let batches = num_batches as f64;
        Ok((
            model,
            EpochLosses {
                mean: loss_sum / batches,
                per_class: class_sums.into_iter().map(|sum| sum / batches).collect(),
            },
        ))
    }

    fn record_validation(&self, record: &mut MetricsRecord, report: &ValidationReport, lr: f64) {
        record.insert_scalar("learning_rate", lr);
        record.insert_scalar("total/val_loss", report.mean_loss);
        record.insert_scalar("total/val_dice", report.mean_dice);

        tracing::info!(dice = report.mean_dice, loss = report.mean_loss, lr, "validation");
        for (class, name) in self.config.class_names.iter().enumerate() {
            let loss = report.class_losses.get(class).copied().unwrap_or_default();
            let dice = report.class_dice.get(class).copied().unwrap_or_default();
            tracing::info!(class = %name, dice = format!("{dice:.4}"), loss = format!("{loss:.4}"), "per-class dice");
            record.insert_scalar(format!("val_loss_per_class/{name}"), loss);
            record.insert_scalar(format!("val_dice_per_class/{name}"), dice);
        }

        for (rank, sample) in report.worst_samples.iter().enumerate() {
            record.insert_image(
                format!("worst_sample_{}", rank + 1),
                render_sample_panel(sample),
                format!("Dice Score: {:.4}", sample.dice),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{DecoderConfig, EncoderConfig, HeadConfig, InterpolationStrategy, ModelConfig},
        losses::LossConfig,
        training::{
            batch::SegmentationBatch,
            sink::{MemorySink, MetricValue},
        },
    };
    use burn::{
        backend::{Autodiff, NdArray},
        lr_scheduler::constant::ConstantLr,
        optim::AdamConfig,
        tensor::Distribution,
    };
    use std::{cell::RefCell, fs, rc::Rc};

    type InnerBackend = NdArray<f32>;
    type TrainBackend = Autodiff<InnerBackend>;

    fn tiny_model(aux_heads: usize) -> UNet3Plus<TrainBackend> {
        ModelConfig::new()
            .with_encoder(
                EncoderConfig::new()
                    .with_backbone("efficientnet-b0".to_string())
                    .with_channels(vec![3, 8, 16, 24]),
            )
            .with_decoder(DecoderConfig::new().with_skip_channels(4))
            .with_heads(
                HeadConfig::new()
                    .with_num_classes(2)
                    .with_aux_heads(aux_heads)
                    .with_classification_guided(false),
            )
            .init::<TrainBackend>(&Default::default())
            .unwrap()
    }

    fn batches<B: Backend>(count: usize) -> Vec<SegmentationBatch<B>> {
        let device = Default::default();
        (0..count)
            .map(|_| {
                SegmentationBatch::new(
                    Tensor::random([2, 3, 16, 16], Distribution::Default, &device),
                    Tensor::random([2, 2, 16, 16], Distribution::Bernoulli(0.5), &device),
                )
            })
            .collect()
    }

    fn trainer(
        config: TrainerConfig,
    ) -> Trainer<
        TrainBackend,
        impl Optimizer<UNet3Plus<TrainBackend>, TrainBackend>,
        crate::losses::SegmentationLoss,
        ConstantLr,
        MemorySink,
    > {
        Trainer::new(
            config,
            AdamConfig::new().init::<TrainBackend, UNet3Plus<TrainBackend>>(),
            LossConfig::new().init(),
            ConstantLr::new(1e-3),
            MemorySink::new(),
            Default::default(),
        )
    }

    fn config(dir: &std::path::Path) -> TrainerConfig {
        TrainerConfig::new(dir.to_path_buf(), vec!["lesion".to_string(), "organ".to_string()])
    }

    #[test]
    fn records_metrics_and_keeps_one_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(
            config(dir.path())
                .with_num_epochs(3)
                .with_val_interval(2)
                .with_validation(ValidationConfig::new().with_num_worst(3)),
        );

        let outcome = trainer
            .fit(tiny_model(0), &batches::<TrainBackend>(2), &batches::<InnerBackend>(1))
            .unwrap();
        let sink = trainer.into_sink();

        assert_eq!(sink.records.len(), 3);
        for (epoch, record) in sink.records.iter().enumerate() {
            assert_eq!(record.scalar("epoch"), Some((epoch + 1) as f64));
            assert!(record.scalar("total/train_loss").unwrap().is_finite());
            assert!(record.contains_key("train_loss_per_class/lesion"));
            assert!(record.contains_key("train_loss_per_class/organ"));
        }

        assert!(!sink.records[0].contains_key("total/val_dice"));
        let validated = &sink.records[1];
        assert_eq!(validated.scalar("learning_rate"), Some(1e-3));
        assert!(validated.contains_key("total/val_loss"));
        assert!(validated.contains_key("val_dice_per_class/organ"));
        assert!(validated.contains_key("val_loss_per_class/lesion"));
        for n in 1..=2 {
            assert!(matches!(
                validated.get(&format!("worst_sample_{n}")),
                Some(MetricValue::Image { caption, .. }) if caption.starts_with("Dice Score: ")
            ));
        }
        // Only two validation samples exist.
        assert!(!validated.contains_key("worst_sample_3"));

        let val_dice = validated.scalar("total/val_dice").unwrap();
        assert_eq!(outcome.best_dice, val_dice);

        let checkpoints: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .collect();
        if val_dice > 0.0 {
            assert_eq!(outcome.best_epoch, 2);
            assert_eq!(checkpoints.len(), 1);
            let expected = format!("best_dice_{val_dice:.4}.mpk");
            assert_eq!(checkpoints[0].file_name().to_string_lossy(), expected);
            assert_eq!(sink.summary.unwrap().best_epoch, 2);
        } else {
            assert!(checkpoints.is_empty());
        }
    }

    #[test]
    fn hook_sees_best_dice_every_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_by_hook = Rc::clone(&seen);

        let mut trainer = trainer(config(dir.path()).with_num_epochs(2)).with_hook(
            move |ctx: &mut HookContext<'_, TrainBackend>| {
                assert_eq!(ctx.model.num_classes(), 2);
                seen_by_hook.borrow_mut().push(ctx.log_buffer["val_dice"]);
            },
        );

        let outcome = trainer
            .fit(tiny_model(1), &batches::<TrainBackend>(1), &batches::<InnerBackend>(1))
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], 0.0);
        assert!(seen[1] <= outcome.best_dice);
    }

    #[test]
    fn aux_loss_weight_trains_with_aux_heads() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(
            config(dir.path())
                .with_num_epochs(1)
                .with_aux_loss_weight(0.4),
        );

        trainer
            .fit(tiny_model(2), &batches::<TrainBackend>(1), &batches::<InnerBackend>(1))
            .unwrap();
        assert_eq!(trainer.sink().records.len(), 1);
    }

    #[test]
    fn trains_with_default_interpolation_and_presence_gate() {
        assert_eq!(ModelConfig::new().interpolation, InterpolationStrategy::Bilinear);

        let dir = tempfile::tempdir().unwrap();
        let model = ModelConfig::new()
            .with_encoder(
                EncoderConfig::new()
                    .with_backbone("efficientnet-b0".to_string())
                    .with_channels(vec![3, 8, 16, 24]),
            )
            .with_decoder(DecoderConfig::new().with_skip_channels(4))
            .with_heads(HeadConfig::new().with_num_classes(2).with_aux_heads(1))
            .init::<TrainBackend>(&Default::default())
            .unwrap();
        let mut trainer = trainer(
            config(dir.path())
                .with_num_epochs(2)
                .with_aux_loss_weight(0.5),
        );

        trainer
            .fit(model, &batches::<TrainBackend>(2), &batches::<InnerBackend>(1))
            .unwrap();
        let sink = trainer.into_sink();
        assert_eq!(sink.records.len(), 2);
        for record in &sink.records {
            assert!(record.scalar("total/train_loss").unwrap().is_finite());
        }
    }

    #[test]
    fn rejects_mismatched_class_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(
            TrainerConfig::new(dir.path().to_path_buf(), vec!["only".to_string()])
                .with_num_epochs(1),
        );

        let result = trainer.fit(
            tiny_model(0),
            &batches::<TrainBackend>(1),
            &batches::<InnerBackend>(1),
        );
        assert!(matches!(result, Err(UNet3PlusError::InvalidConfiguration { .. })));
    }

    #[test]
    fn empty_training_set_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(config(dir.path()).with_num_epochs(1));

        let result = trainer.fit(
            tiny_model(0),
            &Vec::<SegmentationBatch<TrainBackend>>::new(),
            &batches::<InnerBackend>(1),
        );
        assert!(matches!(result, Err(UNet3PlusError::DatasetError { .. })));
    }
}
