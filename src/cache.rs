use arena_capture::PixelRect;
use arena_vision::RegionIdentification;
use image::RgbaImage;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Samples per axis when fingerprinting a region.
const FINGERPRINT_GRID: u32 = 32;

/// Cheap content fingerprint over a sparse pixel grid.
pub fn fingerprint(image: &RgbaImage) -> u64 {
    let (w, h) = image.dimensions();
    let mut hasher = DefaultHasher::new();
    (w, h).hash(&mut hasher);
    if w > 0 && h > 0 {
        let step_x = (w / FINGERPRINT_GRID).max(1);
        let step_y = (h / FINGERPRINT_GRID).max(1);
        for y in (0..h).step_by(step_y as usize) {
            for x in (0..w).step_by(step_x as usize) {
                image.get_pixel(x, y).0.hash(&mut hasher);
            }
        }
    }
    hasher.finish()
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub image: Arc<RgbaImage>,
    pub captured_at: Instant,
    pub fingerprint: u64,
    pub identification: RegionIdentification,
}

/// Recent per-region results keyed by region geometry. Entries expire after a short
/// TTL; at capacity the oldest entry is evicted.
#[derive(Debug)]
pub struct DetectionCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<PixelRect, CacheEntry>,
}

impl DetectionCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.captured_at) <= self.ttl
    }

    /// A fresh entry for this geometry, regardless of content.
    pub fn get(&self, rect: &PixelRect, now: Instant) -> Option<&CacheEntry> {
        self.entries.get(rect).filter(|e| self.is_fresh(e, now))
    }

    /// The cached identification if the region content is unchanged.
    pub fn lookup(&self, rect: &PixelRect, fingerprint: u64, now: Instant) -> Option<&RegionIdentification> {
        self.get(rect, now)
            .filter(|e| e.fingerprint == fingerprint)
            .map(|e| &e.identification)
    }

    pub fn insert(&mut self, rect: PixelRect, entry: CacheEntry) {
        self.purge_expired(entry.captured_at);
        if !self.entries.contains_key(&rect) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.captured_at)
                .map(|(k, _)| *k);
            if let Some(key) = oldest {
                debug!("Cache full, evicting {:?}", key);
                self.entries.remove(&key);
            }
        }
        self.entries.insert(rect, entry);
    }

    pub fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.captured_at) <= ttl);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
