//! Rendering of validation samples for the metrics sink.

use image::{Rgb, RgbImage};

use crate::training::SampleRecord;

/// Colours assigned to classes, cycled when there are more classes than entries.
pub const CLASS_PALETTE: [[u8; 3]; 8] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
];

/// Colour of `class`.
pub fn class_color(class: usize) -> Rgb<u8> {
    Rgb(CLASS_PALETTE[class % CLASS_PALETTE.len()])
}

/// Renders `[image | prediction | ground truth]` side by side.
///
/// The image is min-max normalised per sample. Masks are drawn on black, each class in
/// its palette colour; where classes overlap, the higher class index wins.
pub fn render_sample_panel(sample: &SampleRecord) -> RgbImage {
    let (height, width) = (sample.height, sample.width);
    let mut panel = RgbImage::new((width * 3) as u32, height as u32);

    draw_image(&mut panel, sample);
    draw_mask(&mut panel, &sample.prediction, sample, width);
    draw_mask(&mut panel, &sample.mask, sample, 2 * width);

    panel
}

fn draw_image(panel: &mut RgbImage, sample: &SampleRecord) {
    let plane = sample.height * sample.width;
    if sample.image.len() < 3 * plane {
        return;
    }

    let (min, max) = sample
        .image
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = if max > min { max - min } else { 1.0 };

    for y in 0..sample.height {
        for x in 0..sample.width {
            let offset = y * sample.width + x;
            let channel = |c: usize| {
                let value = (sample.image[c * plane + offset] - min) / range;
                (value.clamp(0.0, 1.0) * 255.0).round() as u8
            };
            panel.put_pixel(x as u32, y as u32, Rgb([channel(0), channel(1), channel(2)]));
        }
    }
}

fn draw_mask(panel: &mut RgbImage, mask: &[f32], sample: &SampleRecord, x_offset: usize) {
    let plane = sample.height * sample.width;
    for class in 0..sample.num_classes {
        let Some(channel) = mask.get(class * plane..(class + 1) * plane) else {
            return;
        };
        let color = class_color(class);
        for (offset, &value) in channel.iter().enumerate() {
            if value > 0.5 {
                let (y, x) = (offset / sample.width, offset % sample.width);
                panel.put_pixel((x_offset + x) as u32, y as u32, color);
            }
        }
    }
}
