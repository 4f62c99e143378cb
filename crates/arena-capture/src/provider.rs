use image::RgbaImage;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::{crop_region, CaptureRegion};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture unavailable: {0}")]
    Unavailable(String),
    #[error("screen {0} not found")]
    ScreenNotFound(usize),
    #[error("region {0} is empty on a {1}x{2} screen")]
    EmptyRegion(usize, u32, u32),
}

/// Source of raw frames. Display enumeration and pixel acquisition live behind this seam.
pub trait CaptureProvider: Send + Sync {
    /// Capture the full screen with the given index.
    fn capture_screen(&self, screen: usize) -> Result<RgbaImage, CaptureError>;

    /// Size of a screen in the pixels `capture` crops from.
    fn screen_size(&self, screen: usize) -> Result<(u32, u32), CaptureError> {
        self.capture_screen(screen).map(|f| f.dimensions())
    }

    /// Capture one region. The default crops a full-screen capture.
    fn capture(&self, region: &CaptureRegion) -> Result<RgbaImage, CaptureError> {
        let frame = self.capture_screen(region.screen)?;
        let (w, h) = frame.dimensions();
        let rect = region.pixel_rect(w, h);
        if rect.width == 0 || rect.height == 0 {
            return Err(CaptureError::EmptyRegion(region.index, w, h));
        }
        Ok(crop_region(&frame, &rect))
    }
}

/// Serves a fixed frame that can be swapped at any time, e.g. saved screenshots fed
/// through the detection loop.
#[derive(Debug, Clone, Default)]
pub struct StillFrameProvider {
    frame: Arc<RwLock<Option<Arc<RgbaImage>>>>,
}

impl StillFrameProvider {
    pub fn new(frame: RgbaImage) -> Self {
        let provider = Self::default();
        provider.set_frame(Some(frame));
        provider
    }

    /// Replace the served frame. `None` makes every capture fail.
    pub fn set_frame(&self, frame: Option<RgbaImage>) {
        if let Ok(mut slot) = self.frame.write() {
            *slot = frame.map(Arc::new);
        }
    }

    fn current(&self) -> Option<Arc<RgbaImage>> {
        self.frame.read().ok().and_then(|slot| slot.clone())
    }
}

impl CaptureProvider for StillFrameProvider {
    fn capture_screen(&self, screen: usize) -> Result<RgbaImage, CaptureError> {
        if screen != 0 {
            return Err(CaptureError::ScreenNotFound(screen));
        }
        self.current()
            .map(|f| f.as_ref().clone())
            .ok_or_else(|| CaptureError::Unavailable("no frame loaded".to_string()))
    }

    fn screen_size(&self, screen: usize) -> Result<(u32, u32), CaptureError> {
        if screen != 0 {
            return Err(CaptureError::ScreenNotFound(screen));
        }
        self.current()
            .map(|f| f.dimensions())
            .ok_or_else(|| CaptureError::Unavailable("no frame loaded".to_string()))
    }

    fn capture(&self, region: &CaptureRegion) -> Result<RgbaImage, CaptureError> {
        if region.screen != 0 {
            return Err(CaptureError::ScreenNotFound(region.screen));
        }
        let frame = self
            .current()
            .ok_or_else(|| CaptureError::Unavailable("no frame loaded".to_string()))?;
        let (w, h) = frame.dimensions();
        let rect = region.pixel_rect(w, h);
        if rect.width == 0 || rect.height == 0 {
            return Err(CaptureError::EmptyRegion(region.index, w, h));
        }
        Ok(crop_region(&frame, &rect))
    }
}
