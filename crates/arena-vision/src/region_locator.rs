use arena_capture::{layout, CaptureRegion, PixelRect, RegionBounds};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::geometry::RegionGeometryStore;

/// Number of offered cards on a draft screen.
pub const REGION_COUNT: usize = 3;

#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Window step in pixels, both axes.
    pub stride: u32,
    /// Template pixel sampling step.
    pub sample_step: u32,
    /// Max RGB euclidean distance for a pixel to count as matching.
    pub color_tolerance: f64,
    /// Minimum fraction of matching pixels for a window to be kept.
    pub min_confidence: f64,
    pub iou_threshold: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            stride: 4,
            sample_step: 2,
            color_tolerance: 40.0,
            min_confidence: 0.8,
            iou_threshold: 0.5,
        }
    }
}

/// A template hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub rect: PixelRect,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionSource {
    Detected,
    Stored,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct LocatedRegions {
    /// Always exactly [`REGION_COUNT`] regions, left to right.
    pub regions: Vec<CaptureRegion>,
    pub source: RegionSource,
    pub resolution: (u32, u32),
}

/// Finds the three card rectangles by correlating a reference template over the screen.
pub struct RegionLocator {
    template: Option<RgbaImage>,
    config: LocatorConfig,
}

impl RegionLocator {
    pub fn new(template: RgbaImage, config: LocatorConfig) -> Self {
        Self {
            template: Some(template),
            config,
        }
    }

    /// A locator that always uses the heuristic layout.
    pub fn without_template() -> Self {
        Self {
            template: None,
            config: LocatorConfig::default(),
        }
    }

    pub fn has_template(&self) -> bool {
        self.template.is_some()
    }

    /// Slide the template over the frame and keep windows above the confidence threshold.
    pub fn scan(&self, frame: &RgbaImage) -> Vec<Detection> {
        let Some(template) = &self.template else {
            return Vec::new();
        };
        let (fw, fh) = frame.dimensions();
        let (tw, th) = template.dimensions();
        if tw == 0 || th == 0 || tw > fw || th > fh {
            return Vec::new();
        }

        let samples = template_samples(template, self.config.sample_step.max(1));
        if samples.is_empty() {
            return Vec::new();
        }
        let tol_sq = self.config.color_tolerance * self.config.color_tolerance;
        let max_misses =
            ((1.0 - self.config.min_confidence) * samples.len() as f64).floor() as usize;
        let stride = self.config.stride.max(1) as usize;

        let mut detections = Vec::new();
        for y in (0..=fh - th).step_by(stride) {
            for x in (0..=fw - tw).step_by(stride) {
                let mut misses = 0usize;
                for &(tx, ty, tp) in &samples {
                    let fp = frame.get_pixel(x + tx, y + ty);
                    if color_distance_sq(fp.0, tp) > tol_sq {
                        misses += 1;
                        if misses > max_misses {
                            break;
                        }
                    }
                }
                if misses <= max_misses {
                    let confidence = 1.0 - misses as f64 / samples.len() as f64;
                    detections.push(Detection {
                        rect: PixelRect::new(x, y, tw, th),
                        confidence,
                    });
                }
            }
        }

        debug!(
            "Template scan over {}x{}: {} window(s) above {:.2}",
            fw,
            fh,
            detections.len(),
            self.config.min_confidence
        );
        detections
    }

    /// Locate the three card regions, falling back to the proportional layout.
    pub fn locate(&self, frame: &RgbaImage, screen: usize) -> LocatedRegions {
        let resolution = frame.dimensions();
        let mut survivors = suppress(self.scan(frame), self.config.iou_threshold);
        survivors.sort_by_key(|d| (d.rect.x, d.rect.y));

        if survivors.len() >= REGION_COUNT {
            let regions = survivors
                .iter()
                .take(REGION_COUNT)
                .enumerate()
                .map(|(i, d)| {
                    CaptureRegion::new(
                        i,
                        RegionBounds::Absolute {
                            x: d.rect.x,
                            y: d.rect.y,
                            width: d.rect.width,
                            height: d.rect.height,
                        },
                        screen,
                    )
                })
                .collect();
            info!(
                "Located {} card regions by template ({} candidate(s) after NMS)",
                REGION_COUNT,
                survivors.len()
            );
            return LocatedRegions {
                regions,
                source: RegionSource::Detected,
                resolution,
            };
        }

        if self.template.is_some() {
            debug!(
                "Only {} region(s) found by template, using heuristic layout",
                survivors.len()
            );
        }
        LocatedRegions {
            regions: layout::card_slots(resolution.0, resolution.1, screen),
            source: RegionSource::Fallback,
            resolution,
        }
    }

    /// Like [`locate`](Self::locate), but reuses geometry stored for this resolution and
    /// persists fresh template detections.
    pub fn locate_cached(
        &self,
        frame: &RgbaImage,
        screen: usize,
        store: &mut RegionGeometryStore,
    ) -> LocatedRegions {
        let resolution = frame.dimensions();
        if let Some(regions) = store.lookup(resolution.0, resolution.1, screen) {
            debug!(
                "Using stored region geometry for {}x{}",
                resolution.0, resolution.1
            );
            return LocatedRegions {
                regions,
                source: RegionSource::Stored,
                resolution,
            };
        }

        let located = self.locate(frame, screen);
        if located.source == RegionSource::Detected {
            store.insert(resolution.0, resolution.1, &located.regions);
            if let Err(e) = store.save() {
                warn!("Failed to persist region geometry: {}", e);
            }
        }
        located
    }
}

/// Non-max suppression: any detection whose IoU with a higher-confidence survivor
/// exceeds `iou_threshold` is dropped.
pub fn suppress(mut detections: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep
            .iter()
            .all(|k| k.rect.iou(&det.rect) <= iou_threshold)
        {
            keep.push(det);
        }
    }
    keep
}

/// Opaque template pixels on a sampling grid.
fn template_samples(template: &RgbaImage, step: u32) -> Vec<(u32, u32, [u8; 4])> {
    let mut samples = Vec::new();
    for ty in (0..template.height()).step_by(step as usize) {
        for tx in (0..template.width()).step_by(step as usize) {
            let p = template.get_pixel(tx, ty).0;
            if p[3] >= 128 {
                samples.push((tx, ty, p));
            }
        }
    }
    samples
}

fn color_distance_sq(a: [u8; 4], b: [u8; 4]) -> f64 {
    let dr = a[0] as f64 - b[0] as f64;
    let dg = a[1] as f64 - b[1] as f64;
    let db = a[2] as f64 - b[2] as f64;
    dr * dr + dg * dg + db * db
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(x: u32, y: u32) -> image::Rgba<u8> {
        let v = ((x * 37 + y * 11) % 7) as u8 * 36;
        image::Rgba([v, 255 - v, v / 2, 255])
    }

    fn make_template() -> RgbaImage {
        RgbaImage::from_fn(20, 30, pattern)
    }

    fn make_frame(xs: &[u32]) -> RgbaImage {
        let mut frame = RgbaImage::from_pixel(400, 200, image::Rgba([0, 0, 0, 255]));
        for &ox in xs {
            for y in 0..30 {
                for x in 0..20 {
                    frame.put_pixel(ox + x, 60 + y, pattern(x, y));
                }
            }
        }
        frame
    }

    #[test]
    fn test_locates_three_regions_left_to_right() {
        let locator = RegionLocator::new(make_template(), LocatorConfig::default());
        let located = locator.locate(&make_frame(&[320, 40, 180]), 0);
        assert_eq!(located.source, RegionSource::Detected);
        let rects: Vec<PixelRect> = located
            .regions
            .iter()
            .map(|r| r.pixel_rect(400, 200))
            .collect();
        assert_eq!(
            rects,
            vec![
                PixelRect::new(40, 60, 20, 30),
                PixelRect::new(180, 60, 20, 30),
                PixelRect::new(320, 60, 20, 30),
            ]
        );
        assert_eq!(located.regions[2].index, 2);
    }

    #[test]
    fn test_takes_first_three_of_four() {
        let locator = RegionLocator::new(make_template(), LocatorConfig::default());
        let located = locator.locate(&make_frame(&[40, 120, 200, 280]), 0);
        let xs: Vec<u32> = located
            .regions
            .iter()
            .map(|r| r.pixel_rect(400, 200).x)
            .collect();
        assert_eq!(xs, vec![40, 120, 200]);
    }

    #[test]
    fn test_falls_back_when_too_few() {
        let locator = RegionLocator::new(make_template(), LocatorConfig::default());
        let located = locator.locate(&make_frame(&[40, 180]), 0);
        assert_eq!(located.source, RegionSource::Fallback);
        assert_eq!(located.regions.len(), REGION_COUNT);

        let no_template = RegionLocator::without_template().locate(&RgbaImage::new(1920, 1080), 0);
        assert_eq!(no_template.source, RegionSource::Fallback);
        assert_eq!(no_template.regions.len(), REGION_COUNT);
    }

    #[test]
    fn test_locate_is_idempotent() {
        let locator = RegionLocator::new(make_template(), LocatorConfig::default());
        let frame = make_frame(&[40, 180, 320]);
        let a = locator.locate(&frame, 0);
        let b = locator.locate(&frame, 0);
        assert_eq!(a.regions, b.regions);
        assert_eq!(a.source, b.source);
    }

    #[test]
    fn test_nms_keeps_higher_confidence() {
        let detections = vec![
            Detection {
                rect: PixelRect::new(0, 0, 10, 10),
                confidence: 0.8,
            },
            Detection {
                rect: PixelRect::new(1, 1, 10, 10),
                confidence: 0.95,
            },
            Detection {
                rect: PixelRect::new(50, 0, 10, 10),
                confidence: 0.85,
            },
        ];
        let kept = suppress(detections, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[0].rect.x, 1);
        for (i, a) in kept.iter().enumerate() {
            for b in kept.iter().skip(i + 1) {
                assert!(a.rect.iou(&b.rect) <= 0.5);
            }
        }
    }

    #[test]
    fn test_nms_keeps_low_overlap() {
        // IoU of these two is ~0.33
        let detections = vec![
            Detection {
                rect: PixelRect::new(0, 0, 10, 10),
                confidence: 0.9,
            },
            Detection {
                rect: PixelRect::new(5, 0, 10, 10),
                confidence: 0.85,
            },
        ];
        assert_eq!(suppress(detections, 0.5).len(), 2);
    }

    #[test]
    fn test_locate_cached_persists_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.json");
        let mut store = RegionGeometryStore::load(&path);
        let locator = RegionLocator::new(make_template(), LocatorConfig::default());
        let frame = make_frame(&[40, 180, 320]);

        let first = locator.locate_cached(&frame, 0, &mut store);
        assert_eq!(first.source, RegionSource::Detected);
        assert!(path.exists());

        let mut reloaded = RegionGeometryStore::load(&path);
        let second = locator.locate_cached(&frame, 0, &mut reloaded);
        assert_eq!(second.source, RegionSource::Stored);
        assert_eq!(first.regions, second.regions);
    }

    #[test]
    fn test_fallback_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.json");
        let mut store = RegionGeometryStore::load(&path);
        let located =
            RegionLocator::without_template().locate_cached(&RgbaImage::new(800, 600), 0, &mut store);
        assert_eq!(located.source, RegionSource::Fallback);
        assert!(!path.exists());
    }
}
