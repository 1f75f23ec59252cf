//! Cleaning up page images before OCR.
//!
//! Scanned declarations are often grey, low-contrast and a little blurry. We
//! run a fixed pipeline: grayscale, contrast stretch, sharpen, then a fixed
//! threshold to black and white.

use image::{DynamicImage, GrayImage, Luma};

use crate::prelude::*;

/// 3x3 sharpening kernel. Sums to 1, so flat areas are unchanged.
const SHARPEN_KERNEL: [[f32; 3]; 3] = [[0.0, -1.0, 0.0], [-1.0, 5.0, -1.0], [0.0, -1.0, 0.0]];

/// Run the whole preprocessing pipeline.
pub fn preprocess(image: &DynamicImage, threshold: u8) -> GrayImage {
    let gray = image.to_luma8();
    let stretched = stretch_contrast(&gray);
    let sharpened = sharpen(&stretched);
    binarize(&sharpened, threshold)
}

/// Preprocess the image at `input` and save it as a PNG at `output`.
pub fn preprocess_file(input: &Path, output: &Path, threshold: u8) -> Result<()> {
    let image = image::open(input)
        .with_context(|| format!("failed to open page image {:?}", input.display()))?;
    preprocess(&image, threshold)
        .save(output)
        .with_context(|| format!("failed to save page image {:?}", output.display()))
}

/// Linearly stretch intensities so the darkest pixel is 0 and the lightest
/// is 255.
pub fn stretch_contrast(image: &GrayImage) -> GrayImage {
    let (min, max) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(min, max), Luma([p])| {
            (min.min(*p), max.max(*p))
        });
    if min >= max {
        return image.clone();
    }
    let range = f32::from(max - min);
    let mut out = image.clone();
    for Luma([p]) in out.pixels_mut() {
        *p = ((f32::from(*p - min) * 255.0 / range).round()) as u8;
    }
    out
}

/// Apply [`SHARPEN_KERNEL`]. Edge pixels reuse their nearest neighbours, so
/// the border does not turn into a black frame.
pub fn sharpen(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let mut sum = 0.0;
        for (ky, row) in SHARPEN_KERNEL.iter().enumerate() {
            for (kx, weight) in row.iter().enumerate() {
                let sx = (x + kx as u32).saturating_sub(1).min(width - 1);
                let sy = (y + ky as u32).saturating_sub(1).min(height - 1);
                sum += f32::from(image.get_pixel(sx, sy)[0]) * weight;
            }
        }
        Luma([sum.round().clamp(0.0, 255.0) as u8])
    })
}

/// Pixels at or above `threshold` become white, the rest black.
pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = image.clone();
    for Luma([p]) in out.pixels_mut() {
        *p = if *p >= threshold { 255 } else { 0 };
    }
    out
}
