use burn::prelude::*;

use super::LossFunction;

/// Configuration for [`BceWithLogitsLoss`].
#[derive(Config, Debug)]
pub struct BceWithLogitsLossConfig {
    /// Weight applied to positive targets.
    #[config(default = 1.0)]
    pub pos_weight: f64,
}

impl BceWithLogitsLossConfig {
    pub const fn init(&self) -> BceWithLogitsLoss {
        BceWithLogitsLoss {
            pos_weight: self.pos_weight,
        }
    }
}

/// Binary cross entropy on logits, averaged over every element.
#[derive(Debug, Clone)]
pub struct BceWithLogitsLoss {
    pos_weight: f64,
}

impl BceWithLogitsLoss {
    /// Computes `max(x, 0) - x * y + log(1 + exp(-|x|))`, scaled on positives by
    /// `pos_weight`, without evaluating `sigmoid` explicitly.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        logits: Tensor<B, D>,
        targets: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        assert_eq!(
            logits.dims(),
            targets.dims(),
            "logits and targets must have the same shape"
        );

        // log(1 + exp(-|x|)) + max(-x, 0) = -log(sigmoid(x))
        let log_sigmoid_neg = logits.clone().abs().neg().exp().log1p();
        let neg_log_p = log_sigmoid_neg.clone() + logits.clone().neg().clamp_min(0.0);
        let neg_log_not_p = log_sigmoid_neg + logits.clamp_min(0.0);

        let ones = targets.ones_like();
        let loss = targets.clone() * neg_log_p * self.pos_weight + (ones - targets) * neg_log_not_p;
        loss.mean()
    }
}

impl LossFunction for BceWithLogitsLoss {
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
    fn matches_reference_values() {
        let device = Default::default();
        let loss = BceWithLogitsLossConfig::new().init();

        let logits = Tensor::<TestBackend, 1>::from_floats([2.0, -1.0, 0.5, -3.0], &device);
        let targets = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 0.0, 1.0], &device);

        let value = loss.forward(logits, targets).into_scalar();

        // mean(softplus(-2), softplus(-1), softplus(0.5), softplus(3))
        let softplus = |x: f32| (1.0 + x.exp()).ln();
        let expected = (softplus(-2.0) + softplus(-1.0) + softplus(0.5) + softplus(3.0)) / 4.0;
        assert!((value - expected).abs() < 1e-5, "{value} vs {expected}");
    }

    #[test]
    fn stable_for_extreme_logits() {
        let device = Default::default();
        let loss = BceWithLogitsLossConfig::new().init();

        let logits = Tensor::<TestBackend, 1>::from_floats([100.0, -100.0], &device);
        let targets = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0], &device);

        let value = loss.forward(logits, targets).into_scalar();
        assert!(value.is_finite());
        assert!((value - 100.0).abs() < 1e-3);
    }

    #[test]
    fn pos_weight_scales_positive_term() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 1>::from_floats([0.0], &device);
        let targets = Tensor::<TestBackend, 1>::from_floats([1.0], &device);

        let plain = BceWithLogitsLossConfig::new()
            .init()
            .forward(logits.clone(), targets.clone())
            .into_scalar();
        let weighted = BceWithLogitsLossConfig::new()
            .with_pos_weight(2.0)
            .init()
            .forward(logits, targets)
            .into_scalar();

        assert!((weighted - 2.0 * plain).abs() < 1e-6);
    }
}
