//! # Ceil-mode max pooling
//!
//! Burn's `MaxPool2d` always floors the output size. Full-scale skip connections need
//! PyTorch's `ceil_mode=True` behaviour so that odd-sized feature maps still land on the
//! resolution produced by the strided convolutions of the encoder. The input is padded
//! on the bottom/right edge with negative infinity up to the next multiple of the stride,
//! so padded cells never win the max.

use burn::{
    nn::pool::{MaxPool2d, MaxPool2dConfig},
    prelude::*,
};

/// Configuration for [`CeilMaxPool2d`].
#[derive(Config, Debug)]
pub struct CeilMaxPool2dConfig {
    /// Kernel size, also used as the stride.
    pub scale: usize,
}

impl CeilMaxPool2dConfig {
    /// Initializes a [`CeilMaxPool2d`] module.
    pub fn init(&self) -> CeilMaxPool2d {
        assert!(self.scale > 0, "pooling scale must be positive");
        let pool = MaxPool2dConfig::new([self.scale, self.scale])
            .with_strides([self.scale, self.scale])
            .init();
        CeilMaxPool2d {
            scale: self.scale,
            pool,
        }
    }
}

/// Non-overlapping max pooling that rounds the output size up.
#[derive(Module, Debug, Clone)]
pub struct CeilMaxPool2d {
    scale: usize,
    pool: MaxPool2d,
}

impl CeilMaxPool2d {
    /// Output spatial size for an input of `[height, width]`.
    pub const fn output_size(&self, size: [usize; 2]) -> [usize; 2] {
        [size[0].div_ceil(self.scale), size[1].div_ceil(self.scale)]
    }

    /// # Shapes
    /// - input: `[batch, channels, height, width]`
    /// - output: `[batch, channels, ceil(height / scale), ceil(width / scale)]`
    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = input.dims();
        let [out_h, out_w] = self.output_size([h, w]);
        let pad_h = out_h * self.scale - h;
        let pad_w = out_w * self.scale - w;

        let input = if pad_h > 0 || pad_w > 0 {
            input.pad((0, pad_w, 0, pad_h), f32::NEG_INFINITY)
        } else {
            input
        };

        self.pool.forward(input)
    }
}

/// Functional form of [`CeilMaxPool2d`].
pub fn max_pool2d_ceil<B: Backend>(input: Tensor<B, 4>, scale: usize) -> Tensor<B, 4> {
    CeilMaxPool2dConfig::new(scale).init().forward(input)
}
