use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::{sigmoid, silu},
};
use burn_extra_ops::{DropPath, DropPathConfig};

/// Convolution + batch norm, optionally followed by SiLU.
///
/// Mirrors torchvision's `Conv2dNormActivation` with "same" padding.
#[derive(Module, Debug)]
pub struct ConvNormAct<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    activation: bool,
}

impl<B: Backend> ConvNormAct<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activation: bool,
        initializer: &Initializer,
        device: &Device<B>,
    ) -> Self {
        let padding = (kernel_size - 1) / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .with_initializer(initializer.clone())
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self {
            conv,
            bn,
            activation,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        if self.activation {
            silu(x)
        } else {
            x
        }
    }
}

/// Squeeze-and-excitation channel attention.
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    avgpool: AdaptiveAvgPool2d,
    pub fc1: Conv2d<B>,
    pub fc2: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    pub fn new(
        channels: usize,
        squeeze_channels: usize,
        initializer: &Initializer,
        device: &Device<B>,
    ) -> Self {
        let fc1 = Conv2dConfig::new([channels, squeeze_channels], [1, 1])
            .with_initializer(initializer.clone())
            .init(device);
        let fc2 = Conv2dConfig::new([squeeze_channels, channels], [1, 1])
            .with_initializer(initializer.clone())
            .init(device);

        Self {
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1,
            fc2,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.avgpool.forward(x.clone());
        let scale = silu(self.fc1.forward(scale));
        let scale = sigmoid(self.fc2.forward(scale));
        x * scale
    }
}

/// Settings for a single [`MBConv`] block.
#[derive(Debug, Clone, Copy)]
pub struct MBConvSettings {
    pub expand_ratio: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub drop_path: f64,
}

/// Mobile inverted bottleneck block with squeeze-and-excitation.
#[derive(Module, Debug)]
pub struct MBConv<B: Backend> {
    pub expand: Option<ConvNormAct<B>>,
    pub depthwise: ConvNormAct<B>,
    pub se: SqueezeExcitation<B>,
    pub project: ConvNormAct<B>,
    drop_path: DropPath<B>,
    use_residual: bool,
}

impl<B: Backend> MBConv<B> {
    pub fn new(settings: MBConvSettings, initializer: &Initializer, device: &Device<B>) -> Self {
        let MBConvSettings {
            expand_ratio,
            kernel_size,
            stride,
            in_channels,
            out_channels,
            drop_path,
        } = settings;
        let expanded = in_channels * expand_ratio;

        let expand = (expanded != in_channels).then(|| {
            ConvNormAct::new(in_channels, expanded, 1, 1, 1, true, initializer, device)
        });
        let depthwise = ConvNormAct::new(
            expanded,
            expanded,
            kernel_size,
            stride,
            expanded,
            true,
            initializer,
            device,
        );
        let squeeze_channels = (in_channels / 4).max(1);
        let se = SqueezeExcitation::new(expanded, squeeze_channels, initializer, device);
        let project = ConvNormAct::new(expanded, out_channels, 1, 1, 1, false, initializer, device);

        Self {
            expand,
            depthwise,
            se,
            project,
            drop_path: DropPathConfig::new().with_drop_prob(drop_path).init(),
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x);
        let x = self.se.forward(x);
        let x = self.project.forward(x);

        if self.use_residual {
            self.drop_path.forward(x) + input
        } else {
            x
        }
    }
}

/// A run of MBConv blocks sharing kernel size and output width.
#[derive(Module, Debug)]
pub struct MBConvStage<B: Backend> {
    pub blocks: Vec<MBConv<B>>,
    out_channels: usize,
}

impl<B: Backend> MBConvStage<B> {
    pub const fn new(blocks: Vec<MBConv<B>>, out_channels: usize) -> Self {
        Self {
            blocks,
            out_channels,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }
}
