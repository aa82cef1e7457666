//! Validation: aggregate and per-class loss and Dice, plus the worst samples.

use burn::{prelude::*, tensor::ElementConversion};

use super::batch::BatchSource;
use crate::{
    config::InterpolationStrategy,
    error::{UNet3PlusError, UNet3PlusResult},
    losses::{per_class_losses, LossFunction},
    metrics::{dice_coefficient, threshold_predictions},
    models::{modules::resize, UNet3Plus},
    utils::to_host,
};

/// Validation settings.
#[derive(Config, Debug)]
pub struct ValidationConfig {
    /// Sigmoid threshold that binarizes predictions.
    #[config(default = 0.5)]
    pub threshold: f64,
    /// How many lowest-Dice samples to keep for inspection.
    #[config(default = 4)]
    pub num_worst: usize,
}

/// One validation sample, copied to the host.
///
/// `image` is `[3, H, W]`; `prediction` and `mask` are `[classes, H, W]`, all row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// Encounter order across the whole validation pass.
    pub index: usize,
    pub image: Vec<f32>,
    pub prediction: Vec<f32>,
    pub mask: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub num_classes: usize,
    /// Dice averaged over classes.
    pub dice: f64,
}

/// Keeps the `capacity` lowest-Dice samples, ascending, ties in encounter order.
#[derive(Debug, Clone)]
pub struct WorstSamples {
    capacity: usize,
    samples: Vec<SampleRecord>,
}

impl WorstSamples {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Whether a sample with this score would be kept.
    pub fn accepts(&self, dice: f64) -> bool {
        self.samples.len() < self.capacity
            || self.samples.last().is_some_and(|worst| dice < worst.dice)
    }

    pub fn push(&mut self, sample: SampleRecord) {
        if !self.accepts(sample.dice) {
            return;
        }
        let position = self.samples.partition_point(|kept| kept.dice <= sample.dice);
        self.samples.insert(position, sample);
        self.samples.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_vec(self) -> Vec<SampleRecord> {
        self.samples
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Mean of the per-class Dice scores.
    pub mean_dice: f64,
    /// Aggregate loss averaged over batches.
    pub mean_loss: f64,
    /// Per-class loss averaged over batches.
    pub class_losses: Vec<f64>,
    /// Per-class Dice averaged over samples.
    pub class_dice: Vec<f64>,
    /// Lowest-Dice samples, ascending.
    pub worst_samples: Vec<SampleRecord>,
    pub num_samples: usize,
}

/// Accumulates validation statistics batch by batch.
#[derive(Debug)]
pub struct ValidationAccumulator<'a, L> {
    loss: &'a L,
    threshold: f64,
    loss_sum: f64,
    class_loss_sums: Vec<f64>,
    class_dice_sums: Vec<f64>,
    num_batches: usize,
    num_samples: usize,
    worst: WorstSamples,
}

impl<'a, L: LossFunction> ValidationAccumulator<'a, L> {
    pub fn new(loss: &'a L, config: &ValidationConfig) -> Self {
        Self {
            loss,
            threshold: config.threshold,
            loss_sum: 0.0,
            class_loss_sums: Vec::new(),
            class_dice_sums: Vec::new(),
            num_batches: 0,
            num_samples: 0,
            worst: WorstSamples::new(config.num_worst),
        }
    }

    /// Adds one batch of logits.
    ///
    /// Logits whose spatial size differs from the masks are resized bilinearly first.
    pub fn observe<B: Backend>(
        &mut self,
        images: Tensor<B, 4>,
        logits: Tensor<B, 4>,
        masks: Tensor<B, 4>,
    ) -> UNet3PlusResult<()> {
        let [batch, classes, height, width] = masks.dims();
        let [logit_batch, logit_classes, _, _] = logits.dims();
        if [logit_batch, logit_classes] != [batch, classes] {
            return Err(UNet3PlusError::DatasetError {
                message: format!(
                    "masks have shape [{batch}, {classes}, ..] but logits have [{logit_batch}, {logit_classes}, ..]"
                ),
            });
        }
        let logits = resize(logits, [height, width], &InterpolationStrategy::Bilinear);

        if self.class_dice_sums.is_empty() {
            self.class_loss_sums = vec![0.0; classes];
            self.class_dice_sums = vec![0.0; classes];
        } else if self.class_dice_sums.len() != classes {
            return Err(UNet3PlusError::DatasetError {
                message: format!(
                    "batch has {classes} mask channels, expected {}",
                    self.class_dice_sums.len()
                ),
            });
        }

        self.loss_sum += self
            .loss
            .loss(logits.clone(), masks.clone())
            .into_scalar()
            .elem::<f64>();
        for (sum, value) in self
            .class_loss_sums
            .iter_mut()
            .zip(per_class_losses(self.loss, &logits, &masks))
        {
            *sum += value;
        }

        let predictions = threshold_predictions(logits, self.threshold);
        let dice = to_host(dice_coefficient(predictions.clone(), masks.clone()))?;

        let mut host = None;
        for sample in 0..batch {
            let scores = &dice[sample * classes..(sample + 1) * classes];
            for (sum, score) in self.class_dice_sums.iter_mut().zip(scores) {
                *sum += f64::from(*score);
            }
            let sample_dice = scores.iter().map(|&s| f64::from(s)).sum::<f64>() / classes as f64;
            let index = self.num_samples + sample;

            if !self.worst.accepts(sample_dice) {
                continue;
            }
            if host.is_none() {
                host = Some((
                    to_host(images.clone())?,
                    to_host(predictions.clone())?,
                    to_host(masks.clone())?,
                ));
            }
            if let Some((images, predictions, masks)) = &host {
                let image_len = images.len() / batch;
                let map_len = classes * height * width;
                self.worst.push(SampleRecord {
                    index,
                    image: images[sample * image_len..(sample + 1) * image_len].to_vec(),
                    prediction: predictions[sample * map_len..(sample + 1) * map_len].to_vec(),
                    mask: masks[sample * map_len..(sample + 1) * map_len].to_vec(),
                    height,
                    width,
                    num_classes: classes,
                    dice: sample_dice,
                });
            }
        }

        self.num_batches += 1;
        self.num_samples += batch;
        Ok(())
    }

    /// Reduces the accumulated statistics.
    pub fn finish(self) -> UNet3PlusResult<ValidationReport> {
        if self.num_samples == 0 {
            return Err(UNet3PlusError::DatasetError {
                message: "validation set produced no samples".to_string(),
            });
        }

        let batches = self.num_batches as f64;
        let samples = self.num_samples as f64;
        let class_dice: Vec<f64> = self.class_dice_sums.iter().map(|sum| sum / samples).collect();
        let mean_dice = class_dice.iter().sum::<f64>() / class_dice.len() as f64;

        Ok(ValidationReport {
            mean_dice,
            mean_loss: self.loss_sum / batches,
            class_losses: self.class_loss_sums.iter().map(|sum| sum / batches).collect(),
            class_dice,
            worst_samples: self.worst.into_vec(),
            num_samples: self.num_samples,
        })
    }
}

/// Runs the model over every validation batch.
///
/// Call with the inner (non-autodiff) backend so that dropout and batch statistics
/// are in inference mode and no graph is recorded.
pub fn validate<B, S, L>(
    model: &UNet3Plus<B>,
    source: &S,
    loss: &L,
    config: &ValidationConfig,
    device: &B::Device,
) -> UNet3PlusResult<ValidationReport>
where
    B: Backend,
    S: BatchSource<B> + ?Sized,
    L: LossFunction,
{
    let mut accumulator = ValidationAccumulator::new(loss, config);

    for batch in source.batches() {
        let batch = batch.to_device(device);
        let predictions = model.forward(batch.images.clone());
        accumulator.observe(batch.images, predictions.out, batch.masks)?;
    }

    let report = accumulator.finish()?;
    tracing::debug!(
        samples = report.num_samples,
        dice = report.mean_dice,
        loss = report.mean_loss,
        "validation finished"
    );
    Ok(report)
}
