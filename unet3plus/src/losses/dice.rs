use burn::{prelude::*, tensor::activation::sigmoid};

use super::LossFunction;

/// Configuration for [`SoftDiceLoss`].
#[derive(Config, Debug)]
pub struct SoftDiceLossConfig {
    /// Added to numerator and denominator, keeps empty masks finite.
    #[config(default = 1.0)]
    pub smooth: f64,
}

impl SoftDiceLossConfig {
    pub const fn init(&self) -> SoftDiceLoss {
        SoftDiceLoss {
            smooth: self.smooth,
        }
    }
}

/// Soft Dice loss on sigmoid probabilities.
///
/// The Dice score is computed per sample and class over the spatial dimensions, then
/// averaged; the loss is `1 - mean dice`.
#[derive(Debug, Clone)]
pub struct SoftDiceLoss {
    smooth: f64,
}

impl SoftDiceLoss {
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        assert_eq!(
            logits.dims(),
            targets.dims(),
            "logits and targets must have the same shape"
        );

        let probs = sigmoid(logits).flatten::<3>(2, 3);
        let targets = targets.flatten::<3>(2, 3);

        let intersection = (probs.clone() * targets.clone()).sum_dim(2);
        let denominator = probs.sum_dim(2) + targets.sum_dim(2);

        let dice = (intersection * 2.0 + self.smooth) / (denominator + self.smooth);
        dice.mean().neg() + 1.0
    }
}

impl LossFunction for SoftDiceLoss {
    fn loss<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        self.forward(logits, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn confident_correct_prediction_has_near_zero_loss() {
        let device = Default::default();
        let loss = SoftDiceLossConfig::new().init();

        let targets =
            Tensor::<TestBackend, 4>::from_floats([[[[1.0, 0.0], [0.0, 1.0]]]], &device);
        let logits = (targets.clone() * 2.0 - 1.0) * 50.0;

        let value = loss.forward(logits, targets).into_scalar();
        assert!(value.abs() < 1e-4, "{value}");
    }

    #[test]
    fn inverted_prediction_has_high_loss() {
        let device = Default::default();
        let loss = SoftDiceLossConfig::new().with_smooth(0.0).init();

        let targets =
            Tensor::<TestBackend, 4>::from_floats([[[[1.0, 0.0], [0.0, 1.0]]]], &device);
        let logits = (targets.clone() * 2.0 - 1.0) * -50.0;

        let value = loss.forward(logits, targets).into_scalar();
        assert!(value > 0.99, "{value}");
    }

    #[test]
    fn empty_mask_and_empty_prediction_is_finite() {
        let device = Default::default();
        let loss = SoftDiceLossConfig::new().init();

        let targets = Tensor::<TestBackend, 4>::zeros([2, 1, 4, 4], &device);
        let logits = Tensor::<TestBackend, 4>::full([2, 1, 4, 4], -50.0, &device);

        let value = loss.forward(logits, targets).into_scalar();
        assert!(value.is_finite());
        assert!(value.abs() < 1e-4);
    }
}
