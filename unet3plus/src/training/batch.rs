use std::sync::Arc;

use burn::{data::dataloader::DataLoader, prelude::*};

/// A batch of images and multi-label masks.
#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch, 3, H, W]`
    pub images: Tensor<B, 4>,
    /// `[batch, classes, H, W]`, one binary channel per class
    pub masks: Tensor<B, 4>,
}

impl<B: Backend> SegmentationBatch<B> {
    pub const fn new(images: Tensor<B, 4>, masks: Tensor<B, 4>) -> Self {
        Self { images, masks }
    }

    /// Moves both tensors to `device`.
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            images: self.images.to_device(device),
            masks: self.masks.to_device(device),
        }
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anything that can be iterated as a sequence of batches, once per epoch.
pub trait BatchSource<B: Backend> {
    fn batches(&self) -> Box<dyn Iterator<Item = SegmentationBatch<B>> + '_>;
}

impl<B: Backend> BatchSource<B> for [SegmentationBatch<B>] {
    fn batches(&self) -> Box<dyn Iterator<Item = SegmentationBatch<B>> + '_> {
        Box::new(self.iter().cloned())
    }
}

impl<B: Backend> BatchSource<B> for Vec<SegmentationBatch<B>> {
    fn batches(&self) -> Box<dyn Iterator<Item = SegmentationBatch<B>> + '_> {
        self.as_slice().batches()
    }
}

impl<B: Backend> BatchSource<B> for Arc<dyn DataLoader<B, SegmentationBatch<B>>> {
    fn batches(&self) -> Box<dyn Iterator<Item = SegmentationBatch<B>> + '_> {
        Box::new(self.iter())
    }
}
