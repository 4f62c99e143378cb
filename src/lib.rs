pub mod cache;
pub mod commands;
pub mod config;
pub mod detection;
pub mod events;
pub mod hysteresis;
pub mod log_watcher;
pub mod pipeline;
pub mod scheduler;

pub use commands::DraftTracker;
pub use config::TrackerConfig;
pub use detection::{CycleOutcome, CycleStatus, DetectionEngine};
pub use events::{EventSink, TrackerEvent};

use anyhow::Result;
use arena_capture::CaptureProvider;
use arena_vision::TextRecognizer;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "arena_tracker=debug,arena_tracker_lib=debug,arena_vision=debug,arena_state=debug,arena_capture=debug"
                    .into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Run the tracker until Ctrl-C, printing every event to stdout as one JSON line.
pub async fn run(
    config: TrackerConfig,
    provider: Arc<dyn CaptureProvider>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
) -> Result<()> {
    let tracker = DraftTracker::new(config, provider, recognizer)?;
    let mut events = tracker.subscribe();

    tracker.start_detection(None).await;
    if tracker.config().log_path.is_some() {
        tracker.start_log_watch(None)?;
    } else {
        warn!("No log_path configured, relying on visual detection only");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            received = events.recv() => match received {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to serialize event: {}", e),
                },
                Err(RecvError::Lagged(n)) => warn!("Dropped {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracker.stop_detection();
    tracker.stop_log_watch();
    Ok(())
}
