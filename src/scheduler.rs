use std::time::{Duration, Instant};
use tracing::debug;

/// Polling cadence for the detection loop: a base interval that backs off after
/// failed cycles, plus a minimum spacing between capture starts.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    base: Duration,
    debounce: Duration,
    max: Duration,
    current: Duration,
    consecutive_failures: u32,
    last_started: Option<Instant>,
}

impl PollSchedule {
    pub fn new(base: Duration, debounce: Duration, max: Duration) -> Self {
        Self {
            base,
            debounce,
            max: max.max(base),
            current: base,
            consecutive_failures: 0,
            last_started: None,
        }
    }

    pub fn from_millis(base_ms: u64, debounce_ms: u64, max_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(debounce_ms),
            Duration::from_millis(max_ms),
        )
    }

    /// Replace the base interval and drop any backoff.
    pub fn set_base(&mut self, base: Duration) {
        self.base = base;
        self.max = self.max.max(base);
        self.current = base;
        self.consecutive_failures = 0;
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Wait before the next cycle.
    pub fn interval(&self) -> Duration {
        self.current
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!("Poll interval reset to {:?}", self.base);
        }
        self.consecutive_failures = 0;
        self.current = self.base;
    }

    /// Double the interval, capped at the maximum.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.current = (self.current * 2).min(self.max);
        debug!(
            "{} consecutive empty cycle(s), poll interval {:?}",
            self.consecutive_failures, self.current
        );
    }

    /// Time still to wait at `now` before another capture may start.
    pub fn debounce_remaining(&self, now: Instant) -> Duration {
        match self.last_started {
            Some(last) => self.debounce.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn mark_started(&mut self, now: Instant) {
        self.last_started = Some(now);
    }
}
