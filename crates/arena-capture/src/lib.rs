use image::RgbaImage;
use serde::{Deserialize, Serialize};

mod provider;
#[cfg(feature = "screen")]
pub mod screen;

pub use provider::{CaptureError, CaptureProvider, StillFrameProvider};

/// Resolution change (on either axis) beyond which stored or located geometry is stale.
pub const RESOLUTION_TOLERANCE_PX: u32 = 50;

/// Bounding box of a capture region, either as fractions of the screen or in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegionBounds {
    Relative {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Absolute {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

impl RegionBounds {
    pub fn is_relative(&self) -> bool {
        matches!(self, RegionBounds::Relative { .. })
    }

    /// Resolve to pixel coordinates on a screen of the given size, clamped to the screen.
    pub fn to_pixels(&self, screen_width: u32, screen_height: u32) -> PixelRect {
        let rect = match *self {
            RegionBounds::Relative {
                x,
                y,
                width,
                height,
            } => PixelRect {
                x: (x * screen_width as f64).round().max(0.0) as u32,
                y: (y * screen_height as f64).round().max(0.0) as u32,
                width: (width * screen_width as f64).round().max(0.0) as u32,
                height: (height * screen_height as f64).round().max(0.0) as u32,
            },
            RegionBounds::Absolute {
                x,
                y,
                width,
                height,
            } => PixelRect {
                x,
                y,
                width,
                height,
            },
        };
        rect.clamp_to(screen_width, screen_height)
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Intersection over union with another rectangle.
    pub fn iou(&self, other: &PixelRect) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) as f64 * (y2 - y1) as f64;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    pub fn clamp_to(&self, width: u32, height: u32) -> PixelRect {
        let x = self.x.min(width.saturating_sub(1));
        let y = self.y.min(height.saturating_sub(1));
        PixelRect {
            x,
            y,
            width: self.width.min(width.saturating_sub(x)),
            height: self.height.min(height.saturating_sub(y)),
        }
    }

    /// Sub-rectangle given as fractions of this rectangle.
    pub fn sub_rect(&self, fx: f64, fy: f64, fw: f64, fh: f64) -> PixelRect {
        let w = self.width as f64;
        let h = self.height as f64;
        PixelRect {
            x: self.x + (fx * w) as u32,
            y: self.y + (fy * h) as u32,
            width: ((fw * w) as u32).max(1),
            height: ((fh * h) as u32).max(1),
        }
    }
}

/// One of the three offered-card areas on screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub index: usize,
    pub name: String,
    pub bounds: RegionBounds,
    /// Index of the screen the region lives on.
    pub screen: usize,
    /// Logical-to-physical pixel scale of that screen.
    pub scale_factor: f64,
}

impl CaptureRegion {
    pub fn new(index: usize, bounds: RegionBounds, screen: usize) -> Self {
        Self {
            index,
            name: format!("card_{}", index),
            bounds,
            screen,
            scale_factor: 1.0,
        }
    }

    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    /// Pixel rectangle on a screen of the given (physical) size.
    pub fn pixel_rect(&self, screen_width: u32, screen_height: u32) -> PixelRect {
        match self.bounds {
            RegionBounds::Absolute { .. } if (self.scale_factor - 1.0).abs() > f64::EPSILON => {
                let r = self.bounds.to_pixels(u32::MAX, u32::MAX);
                let s = self.scale_factor;
                PixelRect {
                    x: (r.x as f64 * s) as u32,
                    y: (r.y as f64 * s) as u32,
                    width: (r.width as f64 * s) as u32,
                    height: (r.height as f64 * s) as u32,
                }
                .clamp_to(screen_width, screen_height)
            }
            _ => self.bounds.to_pixels(screen_width, screen_height),
        }
    }
}

/// Whether two resolutions are close enough to share region geometry.
pub fn resolution_matches(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0.abs_diff(b.0) <= RESOLUTION_TOLERANCE_PX && a.1.abs_diff(b.1) <= RESOLUTION_TOLERANCE_PX
}

/// Crop a pixel rectangle from a captured frame, clamped to the frame bounds.
pub fn crop_region(frame: &RgbaImage, rect: &PixelRect) -> RgbaImage {
    let r = rect.clamp_to(frame.width(), frame.height());
    image::imageops::crop_imm(frame, r.x, r.y, r.width, r.height).to_image()
}

/// Proportional draft layout calibrated on a 1920x1080 screen.
pub mod layout {
    use super::{CaptureRegion, RegionBounds};

    pub const BASELINE_WIDTH: f64 = 1920.0;
    pub const BASELINE_HEIGHT: f64 = 1080.0;

    /// Card is ~250px wide and ~380px tall at 1080p.
    const CARD_WIDTH: f64 = 250.0;
    const CARD_HEIGHT: f64 = 380.0;
    const FIRST_CARD_X: f64 = 515.0;
    const CARD_TOP: f64 = 300.0;
    /// CARD_WIDTH + 70px gap
    const CARD_STRIDE: f64 = 320.0;

    /// Heuristic positions of the three offered cards for the given screen size.
    ///
    /// The game scales with height and letterboxes horizontally, so the baseline
    /// layout is scaled by `height / 1080` and centred on the screen width.
    pub fn card_slots(screen_width: u32, screen_height: u32, screen: usize) -> Vec<CaptureRegion> {
        let scale = screen_height as f64 / BASELINE_HEIGHT;
        let offset_x = (screen_width as f64 - BASELINE_WIDTH * scale) / 2.0;

        (0..3)
            .map(|i| {
                let x = offset_x + (FIRST_CARD_X + i as f64 * CARD_STRIDE) * scale;
                let bounds = RegionBounds::Absolute {
                    x: x.max(0.0).round() as u32,
                    y: (CARD_TOP * scale).round() as u32,
                    width: (CARD_WIDTH * scale).round() as u32,
                    height: (CARD_HEIGHT * scale).round() as u32,
                };
                CaptureRegion::new(i, bounds, screen)
            })
            .collect()
    }
}
