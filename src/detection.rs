use arena_capture::{layout, resolution_matches, CaptureError, CaptureProvider, PixelRect};
use arena_vision::{
    CardIdentifier, LocatedRegions, RegionGeometryStore, RegionIdentification, RegionLocator,
    RegionSource,
};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::{fingerprint, CacheEntry, DetectionCache};
use crate::config::TrackerConfig;
use crate::hysteresis::{Confirmation, ConfirmationFilter};
use crate::scheduler::PollSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Confirmed,
    Pending,
    Unchanged,
    Empty,
    CaptureUnavailable,
    Unstable,
    /// Detection was stopped while the cycle ran.
    Discarded,
    /// Another cycle was still in progress.
    Skipped,
}

impl CycleStatus {
    /// Outcomes that back the poll interval off.
    pub fn is_failure(self) -> bool {
        matches!(self, CycleStatus::Empty | CycleStatus::CaptureUnavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub status: CycleStatus,
    pub region_source: Option<RegionSource>,
    /// Per-region results, in region order.
    pub identifications: Vec<RegionIdentification>,
    /// Card ids in region order, set only when the cycle confirmed a new set.
    pub confirmed: Option<Vec<String>>,
}

impl CycleOutcome {
    pub fn bare(status: CycleStatus) -> Self {
        Self {
            status,
            region_source: None,
            identifications: Vec::new(),
            confirmed: None,
        }
    }

    pub fn card_ids(&self) -> Vec<String> {
        self.identifications
            .iter()
            .filter_map(|r| r.identification.card_id.clone())
            .collect()
    }
}

enum RegionResult {
    Cached(RegionIdentification),
    Fresh {
        rect: PixelRect,
        image: Arc<RgbaImage>,
        fingerprint: u64,
        identification: RegionIdentification,
    },
    MatchFailed(usize),
    CaptureFailed(usize),
}

/// Run blocking work off the async threads, giving up after `limit`.
async fn run_blocking<T, F>(limit: Duration, what: &'static str, f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!("{} task failed: {}", what, e);
            None
        }
        Err(_) => {
            warn!("{} timed out after {:?}", what, limit);
            None
        }
    }
}

fn timed_out(what: &str) -> CaptureError {
    CaptureError::Unavailable(format!("{} timed out", what))
}

/// One detection cycle at a time: locate regions, capture and identify each one,
/// then filter through the cache and confirmation hysteresis.
pub struct DetectionEngine {
    provider: Arc<dyn CaptureProvider>,
    identifier: Arc<CardIdentifier>,
    locator: Arc<RegionLocator>,
    geometry: Arc<Mutex<RegionGeometryStore>>,
    regions: Option<LocatedRegions>,
    /// Screen size the current regions were established for.
    regions_screen: Option<(u32, u32)>,
    cache: DetectionCache,
    filter: ConfirmationFilter,
    schedule: PollSchedule,
    screen: usize,
    capture_timeout: Duration,
    match_timeout: Duration,
}

impl DetectionEngine {
    pub fn new(
        provider: Arc<dyn CaptureProvider>,
        identifier: Arc<CardIdentifier>,
        locator: RegionLocator,
        geometry: RegionGeometryStore,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            provider,
            identifier,
            locator: Arc::new(locator),
            geometry: Arc::new(Mutex::new(geometry)),
            regions: None,
            regions_screen: None,
            cache: DetectionCache::new(config.cache_ttl(), config.cache_capacity),
            filter: ConfirmationFilter::new(config.max_unconfirmed_cycles),
            schedule: PollSchedule::from_millis(
                config.poll_interval_ms,
                config.debounce_ms,
                config.max_backoff_ms,
            ),
            screen: config.screen_index,
            capture_timeout: config.capture_timeout(),
            match_timeout: config.match_timeout(),
        }
    }

    pub fn regions(&self) -> Option<&LocatedRegions> {
        self.regions.as_ref()
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut PollSchedule {
        &mut self.schedule
    }

    /// Forget confirmation state and cached results, e.g. when detection restarts.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.cache.clear();
    }

    async fn ensure_regions(&mut self) -> Result<(u32, u32), CaptureError> {
        let screen = self.screen;
        let provider = self.provider.clone();
        let size = run_blocking(self.capture_timeout, "screen size", move || {
            provider.screen_size(screen)
        })
        .await
        .unwrap_or_else(|| Err(timed_out("screen size")))?;

        if let (Some(_), Some(known)) = (&self.regions, self.regions_screen) {
            if resolution_matches(known, size) {
                return Ok(size);
            }
            info!(
                "Screen resolution changed {}x{} -> {}x{}, re-locating card regions",
                known.0, known.1, size.0, size.1
            );
            self.regions = None;
            self.cache.clear();
        }

        let provider = self.provider.clone();
        let frame = run_blocking(self.capture_timeout, "screen capture", move || {
            provider.capture_screen(screen)
        })
        .await
        .unwrap_or_else(|| Err(timed_out("screen capture")))?;

        let locator = self.locator.clone();
        let geometry = self.geometry.clone();
        let located = run_blocking(self.match_timeout, "region locate", move || {
            let located = match geometry.lock() {
                Ok(mut store) => locator.locate_cached(&frame, screen, &mut store),
                Err(_) => locator.locate(&frame, screen),
            };
            located
        })
        .await
        .unwrap_or_else(|| LocatedRegions {
            regions: layout::card_slots(size.0, size.1, screen),
            source: RegionSource::Fallback,
            resolution: size,
        });

        info!(
            "Card regions ready ({:?}) for {}x{}",
            located.source, size.0, size.1
        );
        self.regions = Some(located);
        self.regions_screen = Some(size);
        Ok(size)
    }

    /// Run one full cycle. Results are thrown away if `stop` is set by the time all
    /// regions have been processed.
    pub async fn run_cycle(&mut self, stop: &AtomicBool) -> CycleOutcome {
        let wait = self.schedule.debounce_remaining(Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.schedule.mark_started(Instant::now());

        let outcome = self.detect(stop).await;
        match outcome.status {
            CycleStatus::Discarded | CycleStatus::Skipped => {}
            status if status.is_failure() => self.schedule.record_failure(),
            _ => self.schedule.record_success(),
        }
        outcome
    }

    async fn detect(&mut self, stop: &AtomicBool) -> CycleOutcome {
        let size = match self.ensure_regions().await {
            Ok(size) => size,
            Err(e) => {
                warn!("Capture unavailable: {}", e);
                return CycleOutcome::bare(CycleStatus::CaptureUnavailable);
            }
        };
        let Some(located) = self.regions.clone() else {
            return CycleOutcome::bare(CycleStatus::CaptureUnavailable);
        };

        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for region in located.regions {
            let rect = region.pixel_rect(size.0, size.1);
            let cached = self
                .cache
                .get(&rect, started)
                .map(|e| (e.fingerprint, e.identification.clone()));
            let provider = self.provider.clone();
            let identifier = self.identifier.clone();
            let (capture_timeout, match_timeout) = (self.capture_timeout, self.match_timeout);

            tasks.spawn(async move {
                let index = region.index;
                let image = match run_blocking(capture_timeout, "region capture", move || {
                    provider.capture(&region)
                })
                .await
                {
                    Some(Ok(image)) => Arc::new(image),
                    Some(Err(e)) => {
                        debug!("Region {} capture failed: {}", index, e);
                        return RegionResult::CaptureFailed(index);
                    }
                    None => return RegionResult::CaptureFailed(index),
                };

                let print = fingerprint(&image);
                if let Some((cached_print, identification)) = cached {
                    if cached_print == print {
                        debug!("Region {} unchanged, reusing cached result", index);
                        return RegionResult::Cached(identification);
                    }
                }

                let crop = image.clone();
                match run_blocking(match_timeout, "card identify", move || {
                    identifier.identify(&crop, index)
                })
                .await
                {
                    Some(identification) => RegionResult::Fresh {
                        rect,
                        image,
                        fingerprint: print,
                        identification,
                    },
                    None => RegionResult::MatchFailed(index),
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Region task failed: {}", e),
            }
        }

        if stop.load(Ordering::SeqCst) {
            debug!("Detection stopped during cycle, discarding results");
            return CycleOutcome::bare(CycleStatus::Discarded);
        }

        let mut captured = 0;
        let mut identifications = Vec::new();
        for result in results {
            match result {
                RegionResult::Cached(identification) => {
                    captured += 1;
                    identifications.push(identification);
                }
                RegionResult::Fresh {
                    rect,
                    image,
                    fingerprint,
                    identification,
                } => {
                    captured += 1;
                    self.cache.insert(
                        rect,
                        CacheEntry {
                            image,
                            captured_at: started,
                            fingerprint,
                            identification: identification.clone(),
                        },
                    );
                    identifications.push(identification);
                }
                RegionResult::MatchFailed(_) => captured += 1,
                RegionResult::CaptureFailed(_) => {}
            }
        }

        let mut outcome = CycleOutcome::bare(CycleStatus::CaptureUnavailable);
        outcome.region_source = Some(located.source);
        if captured == 0 {
            warn!("No card region could be captured");
            return outcome;
        }

        identifications.sort_by_key(|r| r.identification.region);
        outcome.identifications = identifications;
        let ids = outcome.card_ids();

        outcome.status = match self.filter.observe(ids.clone()) {
            Confirmation::Confirmed(_) => {
                outcome.confirmed = Some(ids);
                CycleStatus::Confirmed
            }
            Confirmation::Pending => CycleStatus::Pending,
            Confirmation::Unchanged => CycleStatus::Unchanged,
            Confirmation::Empty => CycleStatus::Empty,
            Confirmation::Unstable => CycleStatus::Unstable,
        };
        debug!(
            "Cycle {:?}: {:?} in {:?}",
            outcome.status,
            outcome.card_ids(),
            started.elapsed()
        );
        outcome
    }
}
