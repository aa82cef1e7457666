//! Loss functions for UNet3+ training.
//!
//! Losses compare raw logits `[batch, classes, H, W]` against binary masks of the same
//! shape. They are generic over the backend at the method level, so one loss value
//! serves both the autodiff training backend and the inner validation backend.

pub mod bce;
pub mod combined;
pub mod dice;

pub use bce::{BceWithLogitsLoss, BceWithLogitsLossConfig};
pub use combined::{BceDiceLoss, BceDiceLossConfig};
pub use dice::{SoftDiceLoss, SoftDiceLossConfig};

use burn::{prelude::*, tensor::ElementConversion};

/// A segmentation loss.
///
/// Implementations must accept single-class slices (`[batch, 1, H, W]`) so that
/// per-class losses can be reported with the same function.
pub trait LossFunction {
    /// Mean loss over the batch.
    fn loss<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1>;
}

/// Loss of each class, computed on detached single-class slices.
///
/// The values are informational and never contribute gradients.
pub fn per_class_losses<B: Backend, L: LossFunction>(
    loss: &L,
    logits: &Tensor<B, 4>,
    targets: &Tensor<B, 4>,
) -> Vec<f64> {
    let [_, classes, _, _] = logits.dims();
    let logits = logits.clone().detach();

    (0..classes)
        .map(|class| {
            loss.loss(
                logits.clone().narrow(1, class, 1),
                targets.clone().narrow(1, class, 1),
            )
            .into_scalar()
            .elem::<f64>()
        })
        .collect()
}

/// Loss selected by [`LossConfig`].
#[derive(Config, Debug, PartialEq, Eq)]
pub enum LossKind {
    /// Binary cross entropy on logits.
    Bce,
    /// Soft Dice.
    Dice,
    /// Weighted sum of BCE and soft Dice.
    BceDice,
}

/// Loss configuration.
#[derive(Config, Debug)]
pub struct LossConfig {
    #[config(default = "LossKind::BceDice")]
    pub kind: LossKind,
    /// Weight of the BCE term for [`LossKind::BceDice`].
    #[config(default = 0.5)]
    pub bce_weight: f64,
    /// Weight of the Dice term for [`LossKind::BceDice`].
    #[config(default = 0.5)]
    pub dice_weight: f64,
    /// Smoothing constant of the soft Dice term.
    #[config(default = 1.0)]
    pub smooth: f64,
}

impl LossConfig {
    /// Initializes the configured loss.
    pub fn init(&self) -> SegmentationLoss {
        let dice = SoftDiceLossConfig::new().with_smooth(self.smooth);
        match self.kind {
            LossKind::Bce => SegmentationLoss::Bce(BceWithLogitsLossConfig::new().init()),
            LossKind::Dice => SegmentationLoss::Dice(dice.init()),
            LossKind::BceDice => SegmentationLoss::BceDice(
                BceDiceLossConfig::new()
                    .with_bce_weight(self.bce_weight)
                    .with_dice_weight(self.dice_weight)
                    .with_dice(dice)
                    .init(),
            ),
        }
    }
}

/// Any of the built-in segmentation losses.
#[derive(Debug, Clone)]
pub enum SegmentationLoss {
    Bce(BceWithLogitsLoss),
    Dice(SoftDiceLoss),
    BceDice(BceDiceLoss),
}

impl LossFunction for SegmentationLoss {
    fn loss<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        match self {
            Self::Bce(loss) => loss.loss(logits, targets),
            Self::Dice(loss) => loss.loss(logits, targets),
            Self::BceDice(loss) => loss.loss(logits, targets),
        }
    }
}
