//! Image preparation applied before perceptual hashing.
//!
//! The chain is deterministic so a region rendered slightly differently (scaling
//! filter, anti-aliasing, brightness) lands on the same hash as its reference.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbaImage};

/// Images whose shorter side is below this are upscaled 2x first.
const MIN_SIDE_FOR_HASH: u32 = 128;
const DENOISE_SIGMA: f32 = 0.6;
const EQUALIZE_TILES: u32 = 4;

/// Tunable part of the chain. Each variant produces one hash per region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HashVariant {
    pub sharpen_sigma: f32,
    pub sharpen_threshold: i32,
    /// Passed to `imageops::contrast`, in percent.
    pub contrast: f32,
    /// Grey levels kept after equalisation (256 = no posterisation).
    pub levels: u16,
}

impl HashVariant {
    pub const BASELINE: HashVariant = HashVariant {
        sharpen_sigma: 1.0,
        sharpen_threshold: 4,
        contrast: 10.0,
        levels: 256,
    };

    pub const STRONG_SHARPEN: HashVariant = HashVariant {
        sharpen_sigma: 2.0,
        sharpen_threshold: 1,
        contrast: 25.0,
        levels: 256,
    };

    pub const POSTERIZED: HashVariant = HashVariant {
        sharpen_sigma: 1.0,
        sharpen_threshold: 4,
        contrast: 10.0,
        levels: 16,
    };

    pub fn defaults() -> Vec<HashVariant> {
        vec![Self::BASELINE, Self::STRONG_SHARPEN, Self::POSTERIZED]
    }
}

/// Upscale, denoise, sharpen, adjust contrast, convert to grey, equalise locally and
/// optionally posterise.
pub fn prepare_for_hash(image: &RgbaImage, variant: &HashVariant) -> GrayImage {
    let (w, h) = image.dimensions();
    let upscaled;
    let source = if w.min(h) < MIN_SIDE_FOR_HASH && w > 0 && h > 0 {
        upscaled = imageops::resize(image, w * 2, h * 2, FilterType::CatmullRom);
        &upscaled
    } else {
        image
    };

    let denoised = imageops::blur(source, DENOISE_SIGMA);
    let sharpened = imageops::unsharpen(&denoised, variant.sharpen_sigma, variant.sharpen_threshold);
    let contrasted = imageops::contrast(&sharpened, variant.contrast);
    let gray = imageops::grayscale(&contrasted);
    let equalized = equalize_local(&gray, EQUALIZE_TILES);

    if variant.levels < 256 {
        posterize(&equalized, variant.levels)
    } else {
        equalized
    }
}

/// Histogram equalisation computed independently on a `tiles x tiles` grid.
pub fn equalize_local(gray: &GrayImage, tiles: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let tiles_x = tiles.clamp(1, w);
    let tiles_y = tiles.clamp(1, h);
    let mut out = GrayImage::new(w, h);

    for ty in 0..tiles_y {
        let y0 = ty * h / tiles_y;
        let y1 = (ty + 1) * h / tiles_y;
        for tx in 0..tiles_x {
            let x0 = tx * w / tiles_x;
            let x1 = (tx + 1) * w / tiles_x;

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let lut = equalization_lut(&hist);

            for y in y0..y1 {
                for x in x0..x1 {
                    let v = gray.get_pixel(x, y)[0];
                    out.put_pixel(x, y, Luma([lut[v as usize]]));
                }
            }
        }
    }
    out
}

fn equalization_lut(hist: &[u32; 256]) -> [u8; 256] {
    let total: u32 = hist.iter().sum();
    let mut lut = [0u8; 256];
    let cdf_min = hist.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == cdf_min {
        // Flat tile: keep values unchanged
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    let mut cdf = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        cdf += count;
        let scaled = (cdf.saturating_sub(cdf_min)) as f64 / (total - cdf_min) as f64 * 255.0;
        lut[i] = scaled.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Quantise to `levels` evenly spaced grey values.
pub fn posterize(gray: &GrayImage, levels: u16) -> GrayImage {
    let levels = levels.clamp(2, 256) as u32;
    let step = 256 / levels;
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        let bucket = (p[0] as u32 / step).min(levels - 1);
        p[0] = (bucket * 255 / (levels - 1)) as u8;
    }
    out
}
