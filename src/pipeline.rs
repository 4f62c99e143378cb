use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::detection::{CycleOutcome, CycleStatus, DetectionEngine};
use crate::events::EventSink;

/// Stop may land after the cycle's own last check, so it is looked at again before
/// anything is published.
fn finished_after_stop(outcome: &CycleOutcome, stop: &AtomicBool) -> bool {
    outcome.status == CycleStatus::Discarded || stop.load(Ordering::SeqCst)
}

/// The periodic detection loop. Cycles never overlap: a tick that finds the engine
/// busy is skipped rather than queued.
pub struct Pipeline {
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    outcome_rx: watch::Receiver<Option<CycleOutcome>>,
    handle: JoinHandle<()>,
}

impl Pipeline {
    pub fn start(engine: Arc<Mutex<DetectionEngine>>, sink: EventSink) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let (outcome_tx, outcome_rx) = watch::channel::<Option<CycleOutcome>>(None);

        let stop_loop = stop.clone();
        let wake_loop = wake.clone();
        let handle = tokio::spawn(async move {
            let mut wait = Duration::ZERO;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = wake_loop.notified() => {}
                }
                if stop_loop.load(Ordering::SeqCst) {
                    break;
                }

                let Ok(mut guard) = engine.try_lock() else {
                    debug!("Detection cycle still running, skipping tick");
                    wait = Duration::from_millis(50);
                    continue;
                };
                let outcome = guard.run_cycle(&stop_loop).await;
                wait = guard.schedule().interval();
                drop(guard);

                if finished_after_stop(&outcome, &stop_loop) {
                    debug!("Dropping {:?} cycle finished after stop", outcome.status);
                    break;
                }
                sink.publish_cycle(&outcome, Some(wait));
                let _ = outcome_tx.send(Some(outcome));
            }
            info!("Detection loop stopped");
        });

        info!("Detection loop started");
        Self {
            stop,
            wake,
            outcome_rx,
            handle,
        }
    }

    /// Stop after the current cycle; its results are discarded.
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            info!("Detection stop requested");
        }
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst) && !self.handle.is_finished()
    }

    pub fn latest_outcome(&self) -> Option<CycleOutcome> {
        self.outcome_rx.borrow().clone()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
