//! Folder-backed segmentation dataset.
//!
//! Layout:
//!
//! ```text
//! <root>/images/<stem>.<png|jpg|jpeg>
//! <root>/masks/<class>/<stem>.png
//! ```
//!
//! Every image needs one mask per class. Images missing any mask are skipped with a
//! warning when the dataset is opened; files that exist but cannot be decoded are an
//! error.

use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use image::{imageops::FilterType, DynamicImage};
use walkdir::WalkDir;

use crate::{
    error::{UNet3PlusError, UNet3PlusResult},
    training::SegmentationBatch,
};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// A preprocessed sample kept on the host until batching.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationItem {
    /// `[3, H, W]` in `[0, 1]`
    pub image: Vec<f32>,
    /// `[classes, H, W]` in `{0, 1}`
    pub mask: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub num_classes: usize,
}

#[derive(Debug, Clone)]
struct SamplePaths {
    image: PathBuf,
    masks: Vec<PathBuf>,
}

/// Dataset reading image/mask pairs from a directory tree.
#[derive(Debug, Clone)]
pub struct FolderDataset {
    samples: Vec<SamplePaths>,
    size: [usize; 2],
    num_classes: usize,
}

impl FolderDataset {
    /// Indexes `root`, resizing every sample to `size` (`[height, width]`).
    pub fn new(
        root: impl AsRef<Path>,
        class_names: &[String],
        size: [usize; 2],
    ) -> UNet3PlusResult<Self> {
        let root = root.as_ref();
        if class_names.is_empty() {
            return Err(UNet3PlusError::DatasetError {
                message: "at least one class is required".to_string(),
            });
        }
        if size.contains(&0) {
            return Err(UNet3PlusError::DatasetError {
                message: format!("invalid sample size {size:?}"),
            });
        }

        let image_root = root.join("images");
        if !image_root.is_dir() {
            return Err(UNet3PlusError::DatasetError {
                message: format!("image directory does not exist: {}", image_root.display()),
            });
        }

        let mut samples = Vec::new();
        for entry in WalkDir::new(&image_root)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            let image = entry.into_path();
            if !has_image_extension(&image) {
                continue;
            }
            let Some(stem) = image.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let masks: Vec<PathBuf> = class_names
                .iter()
                .map(|class| root.join("masks").join(class).join(format!("{stem}.png")))
                .collect();
            if let Some(missing) = masks.iter().find(|mask| !mask.is_file()) {
                tracing::warn!(
                    image = %image.display(),
                    mask = %missing.display(),
                    "skipping image without mask"
                );
                continue;
            }

            for path in std::iter::once(&image).chain(&masks) {
                image::image_dimensions(path).map_err(|e| UNet3PlusError::DatasetError {
                    message: format!("unreadable image {}: {e}", path.display()),
                })?;
            }

            samples.push(SamplePaths { image, masks });
        }

        if samples.is_empty() {
            return Err(UNet3PlusError::DatasetError {
                message: format!("no image/mask pairs found in {}", root.display()),
            });
        }

        tracing::info!(samples = samples.len(), root = %root.display(), "indexed dataset");

        Ok(Self {
            samples,
            size,
            num_classes: class_names.len(),
        })
    }

    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Loads sample `index`, reporting decode failures instead of panicking.
    pub fn try_get(&self, index: usize) -> UNet3PlusResult<SegmentationItem> {
        let paths = self
            .samples
            .get(index)
            .ok_or_else(|| UNet3PlusError::DatasetError {
                message: format!("sample index {index} out of range ({})", self.samples.len()),
            })?;
        self.load(paths)
    }

    fn load(&self, paths: &SamplePaths) -> UNet3PlusResult<SegmentationItem> {
        let [height, width] = self.size;
        let open = |path: &Path| {
            image::open(path).map_err(|e| UNet3PlusError::DatasetError {
                message: format!("failed to read {}: {e}", path.display()),
            })
        };

        let image = open(&paths.image)?
            .resize_exact(width as u32, height as u32, FilterType::Triangle)
            .to_rgb32f();
        let plane = height * width;
        let mut chw = vec![0.0; 3 * plane];
        for (offset, pixel) in image.pixels().enumerate() {
            for (channel, value) in pixel.0.iter().enumerate() {
                chw[channel * plane + offset] = *value;
            }
        }

        let mut mask = Vec::with_capacity(self.num_classes * plane);
        for path in &paths.masks {
            mask.extend(binarize(open(path)?, width, height));
        }

        Ok(SegmentationItem {
            image: chw,
            mask,
            height,
            width,
            num_classes: self.num_classes,
        })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn binarize(mask: DynamicImage, width: usize, height: usize) -> impl Iterator<Item = f32> {
    mask.resize_exact(width as u32, height as u32, FilterType::Nearest)
        .to_luma8()
        .into_raw()
        .into_iter()
        .map(|value| if value > 127 { 1.0 } else { 0.0 })
}

impl Dataset<SegmentationItem> for FolderDataset {
    /// # Panics
    ///
    /// Panics when an indexed file can no longer be decoded. Data loaders treat
    /// `None` as the end of the dataset, so returning it would silently cut the
    /// epoch short.
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        let paths = self.samples.get(index)?;
        match self.load(paths) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::error!(index, error = %e, "failed to load sample");
                panic!("failed to load sample {index}: {e}");
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Stacks [`SegmentationItem`]s into a [`SegmentationBatch`].
#[derive(Debug, Clone, Default)]
pub struct SegmentationBatcher;

impl SegmentationBatcher {
    pub const fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher {
    fn batch(&self, items: Vec<SegmentationItem>, device: &B::Device) -> SegmentationBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut masks = Vec::with_capacity(items.len());

        for item in items {
            let (h, w) = (item.height, item.width);
            images.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.image, [3, h, w]),
                device,
            ));
            masks.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.mask, [item.num_classes, h, w]),
                device,
            ));
        }

        SegmentationBatch::new(Tensor::stack(images, 0), Tensor::stack(masks, 0))
    }
}
