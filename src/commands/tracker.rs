use anyhow::{Context, Result};
use arena_capture::CaptureProvider;
use arena_state::{DraftMachine, DraftPick, DraftSession, DraftState, LogParser};
use arena_vision::{
    CardIdentifier, LocatorConfig, RegionGeometryStore, RegionLocator, TextRecognizer,
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::TrackerConfig;
use crate::detection::{CycleOutcome, CycleStatus, DetectionEngine};
use crate::events::{EventSink, TrackerEvent};
use crate::log_watcher::watch_log;
use crate::pipeline::Pipeline;

struct LogWatch {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The tracker's operations: detection control, draft queries, log watching and the
/// event stream.
pub struct DraftTracker {
    config: TrackerConfig,
    engine: Arc<tokio::sync::Mutex<DetectionEngine>>,
    sink: EventSink,
    pipeline: Mutex<Option<Pipeline>>,
    log_watch: Mutex<Option<LogWatch>>,
}

impl DraftTracker {
    /// Build a tracker from the reference data under `config.data_dir`.
    pub fn new(
        config: TrackerConfig,
        provider: Arc<dyn CaptureProvider>,
        recognizer: Option<Arc<dyn TextRecognizer>>,
    ) -> Result<Self> {
        info!("Data directory: {}", config.data_dir.display());
        let identifier = CardIdentifier::load(&config.data_dir, recognizer)
            .context("Failed to load card reference data")?;
        let locator = match &config.locator_template {
            Some(path) => {
                let template = image::open(path)
                    .with_context(|| format!("Failed to open locator template {}", path.display()))?
                    .to_rgba8();
                RegionLocator::new(template, LocatorConfig::default())
            }
            None => RegionLocator::without_template(),
        };
        let geometry = RegionGeometryStore::load(&config.geometry_path());
        let identifier = identifier.with_consensus(config.consensus);
        Ok(Self::assemble(
            config,
            provider,
            Arc::new(identifier),
            locator,
            geometry,
        ))
    }

    /// Build a tracker around an already loaded identifier, using the heuristic
    /// layout and in-memory geometry. The identifier keeps its own consensus settings.
    pub fn with_identifier(
        config: TrackerConfig,
        provider: Arc<dyn CaptureProvider>,
        identifier: Arc<CardIdentifier>,
    ) -> Self {
        Self::assemble(
            config,
            provider,
            identifier,
            RegionLocator::without_template(),
            RegionGeometryStore::in_memory(),
        )
    }

    fn assemble(
        config: TrackerConfig,
        provider: Arc<dyn CaptureProvider>,
        identifier: Arc<CardIdentifier>,
        locator: RegionLocator,
        geometry: RegionGeometryStore,
    ) -> Self {
        let engine = DetectionEngine::new(provider, identifier, locator, geometry, &config);
        let sink = EventSink::new(DraftMachine::new(config.shown_group_window_ms));
        Self {
            config,
            engine: Arc::new(tokio::sync::Mutex::new(engine)),
            sink,
            pipeline: Mutex::new(None),
            log_watch: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start the detection loop, optionally overriding the poll interval. Does nothing
    /// if the loop is already running.
    pub async fn start_detection(&self, interval_ms: Option<u64>) {
        if self.is_detecting() {
            return;
        }
        {
            let mut engine = self.engine.lock().await;
            let base = interval_ms.unwrap_or(self.config.poll_interval_ms);
            engine.schedule_mut().set_base(Duration::from_millis(base));
            engine.reset();
        }
        let pipeline = Pipeline::start(self.engine.clone(), self.sink.clone());
        *lock(&self.pipeline) = Some(pipeline);
    }

    pub fn stop_detection(&self) {
        if let Some(pipeline) = lock(&self.pipeline).take() {
            pipeline.stop();
        }
    }

    pub fn is_detecting(&self) -> bool {
        lock(&self.pipeline)
            .as_ref()
            .is_some_and(|p| p.is_running())
    }

    /// Run one cycle now. Returns `Skipped` if a cycle is already in progress.
    pub async fn trigger_manual_detection(&self) -> CycleOutcome {
        let Ok(mut engine) = self.engine.try_lock() else {
            return CycleOutcome::bare(CycleStatus::Skipped);
        };
        let outcome = engine.run_cycle(&AtomicBool::new(false)).await;
        let next_poll = self.is_detecting().then(|| engine.schedule().interval());
        drop(engine);
        self.sink.publish_cycle(&outcome, next_poll);
        outcome
    }

    /// Most recent cycle of the running loop.
    pub fn latest_outcome(&self) -> Option<CycleOutcome> {
        lock(&self.pipeline).as_ref().and_then(|p| p.latest_outcome())
    }

    pub fn get_state(&self) -> DraftState {
        self.sink.draft().state()
    }

    pub fn get_session(&self) -> DraftSession {
        self.sink.draft().session().clone()
    }

    pub fn get_draft_picks(&self) -> Vec<DraftPick> {
        self.sink.draft().picks().to_vec()
    }

    pub fn get_selected_hero(&self) -> Option<String> {
        self.sink.draft().selected_hero().map(str::to_string)
    }

    /// Follow a log file, replacing any watch already running. Falls back to the
    /// configured `log_path`.
    pub fn start_log_watch(&self, path: Option<PathBuf>) -> Result<()> {
        let path = path
            .or_else(|| self.config.log_path.clone())
            .context("No log path given or configured")?;
        let parser = LogParser::new().context("Failed to build log parser")?;

        self.stop_log_watch();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(watch_log(
            path,
            self.config.log_poll(),
            parser,
            self.sink.clone(),
            stop.clone(),
        ));
        *lock(&self.log_watch) = Some(LogWatch { stop, handle });
        Ok(())
    }

    pub fn stop_log_watch(&self) {
        if let Some(watch) = lock(&self.log_watch).take() {
            watch.stop.store(true, std::sync::atomic::Ordering::SeqCst);
            watch.handle.abort();
        }
    }

    pub fn is_watching_log(&self) -> bool {
        lock(&self.log_watch)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.sink.subscribe()
    }
}

impl Drop for DraftTracker {
    fn drop(&mut self) {
        self.stop_detection();
        self.stop_log_watch();
    }
}
