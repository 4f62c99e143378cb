use anyhow::Result;
use arena_capture::screen::MonitorCapture;
use arena_tracker_lib::TrackerConfig;
use arena_vision::TesseractReader;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_CONFIG: &str = "arena-tracker.json";

#[tokio::main]
async fn main() -> Result<()> {
    arena_tracker_lib::init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ARENA_TRACKER_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = TrackerConfig::load(&config_path)?;

    arena_tracker_lib::run(
        config,
        Arc::new(MonitorCapture::new()),
        Some(Arc::new(TesseractReader::new())),
    )
    .await
}
