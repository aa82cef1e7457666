//! # DropPath Regularization
//!
//! Implements the DropPath regularization technique, also known as stochastic depth.
//! During training, it randomly drops entire residual branches per sample and scales the
//! surviving ones, which is how EfficientNet's MBConv blocks regularize depth.
//!
//! Like Burn's `Dropout`, the module is only active when the backend tracks gradients,
//! so calling `valid()` on a model turns it into a no-op.

use burn::{prelude::*, tensor::Distribution};

/// Configuration for the `DropPath` module.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// The probability of dropping a path.
    #[config(default = "0.0")]
    pub drop_prob: f64,
    /// Whether to scale the output by the keep probability.
    #[config(default = "true")]
    pub scale_by_keep: bool,
}

impl DropPathConfig {
    /// Initializes a new `DropPath` module.
    pub const fn init<B: Backend>(&self) -> DropPath<B> {
        DropPath {
            drop_prob: self.drop_prob,
            scale_by_keep: self.scale_by_keep,
            _phantom: std::marker::PhantomData,
        }
    }
}

/// DropPath module.
#[derive(Module, Debug)]
pub struct DropPath<B: Backend> {
    drop_prob: f64,
    scale_by_keep: bool,
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> DropPath<B> {
    /// Applies DropPath to the input tensor.
    ///
    /// Returns the input unchanged outside of training or when `drop_prob` is 0.
    /// Otherwise each batch element is zeroed with probability `drop_prob`; the mask is
    /// drawn for the batch dimension only and broadcast over the remaining ones.
    ///
    /// # Shapes
    /// - input: `[batch_size, ...]`
    /// - output: `[batch_size, ...]`
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        if !B::ad_enabled() || self.drop_prob == 0.0 {
            return x;
        }
        let keep_prob = 1.0 - self.drop_prob;
        let batch_size = x.dims()[0];

        let mut mask_shape = [1; D];
        mask_shape[0] = batch_size;

        let random_tensor =
            Tensor::random(mask_shape, Distribution::Bernoulli(keep_prob), &x.device());

        if self.scale_by_keep {
            x * random_tensor / keep_prob
        } else {
            x * random_tensor
        }
    }

    /// The configured drop probability.
    pub const fn drop_prob(&self) -> f64 {
        self.drop_prob
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArray, Autodiff};

    type EvalBackend = NdArray;
    type TrainBackend = Autodiff<NdArray>;

    #[test]
    fn test_droppath_eval_mode_is_identity() {
        let device = Default::default();
        let drop_path = DropPathConfig::new()
            .with_drop_prob(0.9)
            .init::<EvalBackend>();

        let x = Tensor::<EvalBackend, 4>::ones([2, 3, 4, 4], &device);
        let output = drop_path.forward(x.clone());

        let diff = (output - x).abs().sum();
        assert_eq!(diff.into_scalar(), 0.0);
    }

    #[test]
    fn test_droppath_zero_prob() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().init::<TrainBackend>();

        let x = Tensor::<TrainBackend, 4>::ones([2, 3, 4, 4], &device);
        let output = drop_path.forward(x.clone());

        let diff = (output - x).abs().sum();
        assert_eq!(diff.into_scalar(), 0.0);
    }

    #[test]
    fn test_droppath_shape_preservation() {
        let device = Default::default();
        let drop_path = DropPathConfig::new()
            .with_drop_prob(0.5)
            .init::<TrainBackend>();

        let x4 = Tensor::<TrainBackend, 4>::ones([2, 3, 4, 4], &device);
        assert_eq!(drop_path.forward(x4.clone()).dims(), x4.dims());

        let x2 = Tensor::<TrainBackend, 2>::ones([2, 512], &device);
        assert_eq!(drop_path.forward(x2.clone()).dims(), x2.dims());
    }

    #[test]
    fn test_droppath_samples_are_dropped_or_scaled() {
        let device = Default::default();
        let drop_path = DropPathConfig::new()
            .with_drop_prob(0.5)
            .init::<TrainBackend>();

        let x = Tensor::<TrainBackend, 3>::ones([4, 8, 16], &device);
        let output = drop_path.forward(x);

        for i in 0..4 {
            let sum = output
                .clone()
                .slice([i..i + 1, 0..8, 0..16])
                .sum()
                .into_scalar();
            // 8 * 16 elements scaled by 1 / keep_prob = 2
            assert!(
                sum.abs() < 1e-6 || (sum - 256.0).abs() < 1e-3,
                "unexpected per-sample sum {sum}"
            );
        }
    }

    #[test]
    fn test_droppath_drop_rate_statistics() {
        let device = Default::default();
        let drop_path = DropPathConfig::new()
            .with_drop_prob(0.5)
            .with_scale_by_keep(false)
            .init::<TrainBackend>();

        let batch_size = 10;
        let x = Tensor::<TrainBackend, 2>::ones([batch_size, 4], &device);

        let mut dropped = 0;
        let trials = 100;
        for _ in 0..trials {
            let output = drop_path.forward(x.clone());
            for i in 0..batch_size {
                let sum = output.clone().slice([i..i + 1, 0..4]).sum().into_scalar();
                if sum.abs() < 1e-6 {
                    dropped += 1;
                }
            }
        }

        let rate = dropped as f64 / (trials * batch_size) as f64;
        assert!((rate - 0.5).abs() < 0.1, "drop rate {rate} too far from 0.5");
    }
}
