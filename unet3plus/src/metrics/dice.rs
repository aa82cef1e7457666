use burn::{prelude::*, tensor::activation::sigmoid};

/// Binarizes logits: `sigmoid(logits) > threshold`, as `0.0`/`1.0` floats.
pub fn threshold_predictions<B: Backend>(logits: Tensor<B, 4>, threshold: f64) -> Tensor<B, 4> {
    sigmoid(logits).greater_elem(threshold).float()
}

/// Dice coefficient per sample and class.
///
/// `2|P ∩ G| / (|P| + |G|)` over the spatial dimensions, and exactly `1.0` when both the
/// prediction and the ground truth are empty.
///
/// # Shapes
/// - pred, target: `[N, C, H, W]` with values in `{0, 1}`
/// - output: `[N, C]`
///
/// # Panics
///
/// Panics when the shapes differ; callers check class counts beforehand.
pub fn dice_coefficient<B: Backend>(pred: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 2> {
    assert_eq!(
        pred.dims(),
        target.dims(),
        "prediction and target must have the same shape"
    );

    let pred = pred.flatten::<3>(2, 3);
    let target = target.flatten::<3>(2, 3);

    let intersection = (pred.clone() * target.clone()).sum_dim(2).squeeze::<2>(2);
    let denominator = (pred.sum_dim(2) + target.sum_dim(2)).squeeze::<2>(2);
    let empty = denominator.clone().equal_elem(0.0);

    (intersection * 2.0 / denominator.clamp_min(1.0)).mask_fill(empty, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn values(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn perfect_prediction_scores_one() {
        let device = Default::default();
        // 2 samples, 2 one-hot classes, 4x4
        let class0 = Tensor::<TestBackend, 4>::from_floats(
            [[[
                [1.0, 1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0],
            ]]],
            &device,
        );
        let class1 = class0.clone().neg() + 1.0;
        let mask = Tensor::cat(vec![class0, class1], 1).repeat_dim(0, 2);

        let dice = dice_coefficient(mask.clone(), mask);

        assert_eq!(dice.dims(), [2, 2]);
        assert_eq!(values(dice), vec![1.0; 4]);
    }

    #[test]
    fn both_empty_is_exactly_one() {
        let device = Default::default();
        let empty = Tensor::<TestBackend, 4>::zeros([3, 2, 5, 5], &device);

        let dice = dice_coefficient(empty.clone(), empty);

        assert_eq!(values(dice), vec![1.0; 6]);
    }

    #[test]
    fn partial_overlap() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 1.0, 0.0, 0.0]]]], &device);
        let target = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 0.0, 1.0, 1.0]]]], &device);

        let dice = values(dice_coefficient(pred.clone(), target.clone()));
        // 2 * 1 / (2 + 3)
        assert!((dice[0] - 0.4).abs() < 1e-6);

        // Empty prediction against a non-empty mask scores zero
        let dice = values(dice_coefficient(pred.zeros_like(), target));
        assert_eq!(dice, vec![0.0]);
    }

    #[test]
    fn thresholding_uses_sigmoid() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 4>::from_floats([[[[-2.0, 0.0, 0.1, 3.0]]]], &device);

        let binary = threshold_predictions(logits, 0.5);

        assert_eq!(
            binary.into_data().to_vec::<f32>().unwrap(),
            vec![0.0, 0.0, 1.0, 1.0]
        );
    }
}
