use image::RgbaImage;
use tracing::{debug, warn};
use xcap::Monitor;

use crate::{CaptureError, CaptureProvider};

/// Captures whole monitors through `xcap`. Screen indices follow `Monitor::all()` order.
/// The screen size comes from the captured frame, since monitor dimensions may be
/// logical while frames are physical pixels.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonitorCapture;

impl MonitorCapture {
    pub fn new() -> Self {
        Self
    }

    fn monitor(screen: usize) -> Result<Monitor, CaptureError> {
        let monitors = Monitor::all().map_err(|e| {
            warn!("Failed to enumerate monitors: {}", e);
            CaptureError::Unavailable(e.to_string())
        })?;
        monitors
            .into_iter()
            .nth(screen)
            .ok_or(CaptureError::ScreenNotFound(screen))
    }

    /// Scale factor of a screen, 1.0 when unknown.
    pub fn scale_factor(&self, screen: usize) -> f64 {
        Self::monitor(screen)
            .ok()
            .and_then(|m| m.scale_factor().ok())
            .map(|s| s as f64)
            .unwrap_or(1.0)
    }
}

impl CaptureProvider for MonitorCapture {
    fn capture_screen(&self, screen: usize) -> Result<RgbaImage, CaptureError> {
        let monitor = Self::monitor(screen)?;
        let frame = monitor
            .capture_image()
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
        debug!("Captured screen {} at {}x{}", screen, frame.width(), frame.height());
        Ok(frame)
    }
}
