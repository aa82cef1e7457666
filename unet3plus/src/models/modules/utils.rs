use burn::{
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use crate::config::InterpolationStrategy;

/// Align-corners linear interpolation weights, `[out_len, in_len]`.
///
/// Row `i` samples the input at `i * (in_len - 1) / (out_len - 1)`.
fn linear_weights<B: Backend>(in_len: usize, out_len: usize, device: &B::Device) -> Tensor<B, 2> {
    let ratio = (in_len - 1) as f64 / out_len.saturating_sub(1).max(1) as f64;
    let mut weights = vec![0.0_f32; out_len * in_len];

    for i in 0..out_len {
        let src = ratio * i as f64;
        let lo = (src.floor() as usize).min(in_len - 1);
        let hi = (lo + 1).min(in_len - 1);
        let frac = (src - lo as f64) as f32;
        weights[i * in_len + lo] += 1.0 - frac;
        weights[i * in_len + hi] += frac;
    }

    Tensor::from_data(TensorData::new(weights, [out_len, in_len]), device)
}

/// Bilinear (align-corners) resize written as `A_h · x · A_wᵀ`.
///
/// Built from matmuls so the backward pass works on every backend, which is not
/// the case for `interpolate` in bilinear mode.
fn bilinear_resize<B: Backend>(tensor: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [batch, channels, h, w] = tensor.dims();
    let [out_h, out_w] = size;
    let device = tensor.device();

    let rows = linear_weights::<B>(h, out_h, &device)
        .unsqueeze::<4>()
        .expand([batch, channels, out_h, h]);
    let cols = linear_weights::<B>(w, out_w, &device)
        .transpose()
        .unsqueeze::<4>()
        .expand([batch, channels, w, out_w]);

    rows.matmul(tensor).matmul(cols)
}

/// Resizes a feature map to `size` ([height, width]).
///
/// The tensor is returned untouched when it already has the requested size.
pub fn resize<B: Backend>(
    tensor: Tensor<B, 4>,
    size: [usize; 2],
    strategy: &InterpolationStrategy,
) -> Tensor<B, 4> {
    let [_, _, h, w] = tensor.dims();
    if [h, w] == size {
        return tensor;
    }

    match strategy {
        InterpolationStrategy::Bilinear => bilinear_resize(tensor, size),
        InterpolationStrategy::Nearest => interpolate(
            tensor,
            size,
            InterpolateOptions::new(InterpolateMode::Nearest),
        ),
    }
}

/// Resizes `tensor` to the spatial size of `target`.
pub fn resize_like<B: Backend>(
    tensor: Tensor<B, 4>,
    target: &Tensor<B, 4>,
    strategy: &InterpolationStrategy,
) -> Tensor<B, 4> {
    let [_, _, h, w] = target.dims();
    resize(tensor, [h, w], strategy)
}

/// Upsamples a feature map by an integer scale factor.
pub fn upsample<B: Backend>(
    tensor: Tensor<B, 4>,
    scale: usize,
    strategy: &InterpolationStrategy,
) -> Tensor<B, 4> {
    let [_, _, h, w] = tensor.dims();
    resize(tensor, [h * scale, w * scale], strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    fn assert_close(actual: Vec<f32>, expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn bilinear_resize_aligns_corners() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_data([[[[0.0, 1.0], [2.0, 3.0]]]], &device);
        let y = resize(x, [3, 3], &InterpolationStrategy::Bilinear);
        assert_eq!(y.dims(), [1, 1, 3, 3]);
        assert_close(
            y.into_data().to_vec::<f32>().unwrap(),
            &[0.0, 0.5, 1.0, 1.0, 1.5, 2.0, 2.0, 2.5, 3.0],
        );
    }

    #[test]
    fn bilinear_resize_matches_interpolate_forward() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random(
            [2, 3, 5, 7],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        for size in [[10, 14], [3, 4], [1, 1], [9, 7]] {
            let expected = interpolate(
                x.clone(),
                size,
                InterpolateOptions::new(InterpolateMode::Bilinear),
            );
            let actual = resize(x.clone(), size, &InterpolationStrategy::Bilinear);
            assert_eq!(actual.dims(), expected.dims());
            assert_close(
                actual.into_data().to_vec::<f32>().unwrap(),
                &expected.into_data().to_vec::<f32>().unwrap(),
            );
        }
    }

    #[test]
    fn bilinear_resize_has_gradients() {
        let device = Default::default();
        let x = Tensor::<Autodiff<TestBackend>, 4>::ones([1, 2, 3, 3], &device).require_grad();
        let grads = resize(x.clone(), [6, 6], &InterpolationStrategy::Bilinear)
            .sum()
            .backward();
        let grad = x.grad(&grads).unwrap();
        assert_eq!(grad.dims(), [1, 2, 3, 3]);
        // Every output row and column distributes a total weight of 1.
        let total = grad.sum().into_scalar();
        assert!((total - 72.0).abs() < 1e-4, "{total}");
    }

    #[test]
    fn resize_is_noop_for_matching_size() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 2, 5, 7], &device);
        let y = resize(x.clone(), [5, 7], &InterpolationStrategy::Bilinear);
        assert_eq!(y.dims(), [1, 2, 5, 7]);
        let diff = (y - x).abs().sum().into_scalar();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn upsample_scales_both_axes() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([2, 3, 4, 5], &device);
        assert_eq!(
            upsample(x.clone(), 4, &InterpolationStrategy::Nearest).dims(),
            [2, 3, 16, 20]
        );
        assert_eq!(
            upsample(x, 2, &InterpolationStrategy::Bilinear).dims(),
            [2, 3, 8, 10]
        );
    }

    #[test]
    fn resize_like_matches_target() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 1, 3, 3], &device);
        let target = Tensor::<TestBackend, 4>::zeros([1, 4, 10, 6], &device);
        let y = resize_like(x, &target, &InterpolationStrategy::Nearest);
        assert_eq!(y.dims(), [1, 1, 10, 6]);
    }
}
