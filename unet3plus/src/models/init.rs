use burn::nn::Initializer;
use core::f64::consts::SQRT_2;

/// Initialization policy shared by every freshly constructed conv layer.
///
/// Kaiming normal with ReLU gain, scaled by fan-out.
pub const fn conv_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: SQRT_2,
        fan_out_only: true,
    }
}

/// Initializer for transposed convs.
///
/// Burn only hands the fan-in to a transposed conv initializer, so the fan-out
/// variant above cannot be used there.
pub const fn conv_transpose_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: SQRT_2,
        fan_out_only: false,
    }
}
