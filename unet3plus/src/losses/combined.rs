use burn::prelude::*;

use super::{
    bce::{BceWithLogitsLoss, BceWithLogitsLossConfig},
    dice::{SoftDiceLoss, SoftDiceLossConfig},
    LossFunction,
};

/// Configuration for [`BceDiceLoss`].
#[derive(Config, Debug)]
pub struct BceDiceLossConfig {
    #[config(default = 0.5)]
    pub bce_weight: f64,
    #[config(default = 0.5)]
    pub dice_weight: f64,
    #[config(default = "BceWithLogitsLossConfig::new()")]
    pub bce: BceWithLogitsLossConfig,
    #[config(default = "SoftDiceLossConfig::new()")]
    pub dice: SoftDiceLossConfig,
}

impl BceDiceLossConfig {
    pub fn init(&self) -> BceDiceLoss {
        BceDiceLoss {
            bce_weight: self.bce_weight,
            dice_weight: self.dice_weight,
            bce: self.bce.init(),
            dice: self.dice.init(),
        }
    }
}

/// Weighted sum of BCE-with-logits and soft Dice.
#[derive(Debug, Clone)]
pub struct BceDiceLoss {
    bce_weight: f64,
    dice_weight: f64,
    bce: BceWithLogitsLoss,
    dice: SoftDiceLoss,
}

impl LossFunction for BceDiceLoss {
    fn loss<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        let bce = self.bce.forward(logits.clone(), targets.clone());
        let dice = self.dice.forward(logits, targets);
        bce * self.bce_weight + dice * self.dice_weight
    }
}
