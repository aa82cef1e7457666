use std::collections::BTreeMap;

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        Dropout, DropoutConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::sigmoid,
};

use super::{
    decoder::Decoder,
    encoder::Encoder,
    init::{conv_initializer, conv_transpose_initializer},
    modules::resize,
};
use crate::{
    config::{InterpolationStrategy, ModelConfig},
    error::UNet3PlusResult,
};

/// Named outputs of a UNet3+ forward pass.
#[derive(Debug, Clone)]
pub struct Predictions<B: Backend> {
    /// Main segmentation logits at input resolution, `[batch, classes, H, W]`.
    pub out: Tensor<B, 4>,
    /// Object presence scores, `[batch, 2]`.
    pub cls: Option<Tensor<B, 2>>,
    /// Auxiliary segmentation logits at input resolution, keyed by decoder stage.
    pub aux: BTreeMap<usize, Tensor<B, 4>>,
}

impl<B: Backend> Predictions<B> {
    /// Output names in the order `out`, `cls`, `aux{i}`.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = vec!["out".to_string()];
        if self.cls.is_some() {
            keys.push("cls".to_string());
        }
        keys.extend(self.aux.keys().map(|stage| format!("aux{stage}")));
        keys
    }

    /// Segmentation map by name (`out` or `aux{i}`).
    pub fn segmentation(&self, key: &str) -> Option<&Tensor<B, 4>> {
        if key == "out" {
            return Some(&self.out);
        }
        let stage = key.strip_prefix("aux")?.parse().ok()?;
        self.aux.get(&stage)
    }
}

/// Final segmentation head.
#[derive(Module, Debug)]
pub enum SegmentationHead<B: Backend> {
    /// 3x3 conv at the finest decoder resolution.
    Conv(Conv2d<B>),
    /// 4x4 stride 2 transposed conv, doubling the resolution.
    Transposed(ConvTranspose2d<B>),
}

impl<B: Backend> SegmentationHead<B> {
    fn new(in_channels: usize, num_classes: usize, transpose: bool, device: &Device<B>) -> Self {
        if transpose {
            Self::Transposed(
                ConvTranspose2dConfig::new([in_channels, num_classes], [4, 4])
                    .with_stride([2, 2])
                    .with_padding([1, 1])
                    .with_bias(false)
                    .with_initializer(conv_transpose_initializer())
                    .init(device),
            )
        } else {
            Self::Conv(conv3x3(in_channels, num_classes, device))
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Conv(conv) => conv.forward(x),
            Self::Transposed(conv) => conv.forward(x),
        }
    }
}

/// Object presence ("classification-guided") head.
#[derive(Module, Debug)]
pub struct ClassificationHead<B: Backend> {
    dropout: Dropout,
    pub conv: Conv2d<B>,
}

impl<B: Backend> ClassificationHead<B> {
    fn new(in_channels: usize, device: &Device<B>) -> Self {
        Self {
            dropout: DropoutConfig::new(0.5).init(),
            conv: Conv2dConfig::new([in_channels, 2], [1, 1]).init(device),
        }
    }

    /// # Shapes
    /// - input: `[batch, channels, H, W]`
    /// - output: `[batch, 2]` sigmoid scores
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.dropout.forward(x);
        // Global max pool over both spatial axes.
        let x = self.conv.forward(x).max_dim(2).max_dim(3);
        sigmoid(x.flatten::<2>(1, 3))
    }
}

/// Per-sample presence gate derived from the presence scores.
///
/// The gate is the argmax over the two scores, 1 when an object is predicted present
/// and 0 otherwise, shaped `[batch, 1, 1, 1]` for broadcasting.
pub fn presence_gate<B: Backend>(scores: Tensor<B, 2>) -> Tensor<B, 4> {
    let [batch, _] = scores.dims();
    scores.argmax(1).float().reshape([batch, 1, 1, 1])
}

/// Auxiliary segmentation head on an intermediate decoder stage.
#[derive(Module, Debug)]
pub struct AuxHead<B: Backend> {
    stage: usize,
    pub conv: Conv2d<B>,
}

impl<B: Backend> AuxHead<B> {
    /// Decoder stage this head reads from.
    pub const fn stage(&self) -> usize {
        self.stage
    }
}

fn conv3x3<B: Backend>(in_channels: usize, out_channels: usize, device: &Device<B>) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_initializer(conv_initializer())
        .init(device)
}

impl ModelConfig {
    /// Initializes a new UNet3+ model.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found by [`ModelConfig::validate`], or a
    /// weight loading error when a pretrained backbone cannot be loaded.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> UNet3PlusResult<UNet3Plus<B>> {
        self.validate()?;

        let encoder = Encoder::new(&self.encoder, device)?;
        let level_channels = self.encoder.level_channels();
        let decoder = Decoder::new(level_channels, &self.decoder, &self.interpolation, device)?;

        let num_classes = self.heads.num_classes;
        let decoder_channels = self.decoder_channels();
        let bottom_channels = level_channels[level_channels.len() - 1];

        let head = SegmentationHead::new(
            decoder_channels,
            num_classes,
            self.heads.transpose_final,
            device,
        );

        let aux_heads: Vec<AuxHead<B>> = self
            .aux_stage_indices()
            .into_iter()
            .map(|stage| {
                let channels = if stage == 0 {
                    bottom_channels
                } else {
                    decoder_channels
                };
                AuxHead {
                    stage,
                    conv: conv3x3(channels, num_classes, device),
                }
            })
            .collect();

        let cls = self
            .heads
            .classification_guided
            .then(|| ClassificationHead::new(bottom_channels, device));

        Ok(UNet3Plus {
            encoder,
            decoder,
            head,
            cls,
            aux_heads,
            interpolation: Ignored(self.interpolation.clone()),
            num_classes,
        })
    }
}

/// UNet3+ segmentation network.
#[derive(Module, Debug)]
pub struct UNet3Plus<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Decoder<B>,
    pub head: SegmentationHead<B>,
    pub cls: Option<ClassificationHead<B>>,
    pub aux_heads: Vec<AuxHead<B>>,
    interpolation: Ignored<InterpolationStrategy>,
    num_classes: usize,
}

impl<B: Backend> UNet3Plus<B> {
    /// Runs the network.
    ///
    /// `out` and every `aux{i}` are resized to the input resolution. The presence
    /// scores are only computed when auxiliary heads exist, since they exist only to
    /// gate them.
    ///
    /// # Shapes
    /// - input: `[batch, 3, H, W]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Predictions<B> {
        let [_, _, h, w] = input.dims();
        let strategy = &self.interpolation.0;

        let stages = self.decoder.forward(self.encoder.forward(input));
        let finest = stages.len() - 1;

        let out = resize(self.head.forward(stages[finest].clone()), [h, w], strategy);

        let mut cls = None;
        let mut aux = BTreeMap::new();

        if !self.aux_heads.is_empty() {
            let mut gate = None;

            for (idx, stage) in stages[..finest].iter().enumerate() {
                if idx == 0 {
                    if let Some(cls_head) = &self.cls {
                        let scores = cls_head.forward(stage.clone());
                        gate = Some(presence_gate(scores.clone()));
                        cls = Some(scores);
                    }
                }

                let Some(head) = self.aux_heads.iter().find(|head| head.stage == idx) else {
                    continue;
                };
                let stage = match &gate {
                    Some(gate) => stage.clone() * gate.clone(),
                    None => stage.clone(),
                };
                aux.insert(idx, resize(head.conv.forward(stage), [h, w], strategy));
            }
        }

        Predictions { out, cls, aux }
    }

    /// Number of output classes.
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Interpolation used for resizing.
    pub fn interpolation(&self) -> &InterpolationStrategy {
        &self.interpolation.0
    }
}
