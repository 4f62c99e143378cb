use arena_data::ReferenceStore;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::candidate::{MatchCandidate, MatchSource};
use crate::preprocess::{prepare_for_hash, HashVariant};

/// Side of the difference-hash grid; 16x16 bits render as 64 hex characters.
const HASH_SIZE: u32 = 16;
/// Length of the aligned substrings compared in the second similarity term.
const CHUNK_LEN: usize = 4;
const POSITIONAL_WEIGHT: f64 = 0.7;
const CHUNK_WEIGHT: f64 = 0.3;

pub const THRESHOLD_FLOOR: f64 = 0.1;
pub const THRESHOLD_CEILING: f64 = 0.6;
const DEFAULT_THRESHOLD: f64 = 0.35;
const WINDOW_LEN: usize = 20;
const MIN_SAMPLES: usize = 10;
const THRESHOLD_STEP: f64 = 0.05;
/// Every sample this far above the threshold means we can afford more precision.
const HIGH_MARGIN: f64 = 0.2;

/// Difference hash of an already prepared grey image, as lowercase hex.
pub fn perceptual_hash(gray: &GrayImage) -> String {
    let small = imageops::resize(gray, HASH_SIZE + 1, HASH_SIZE, FilterType::Triangle);
    let mut hex = String::with_capacity((HASH_SIZE * HASH_SIZE / 4) as usize);
    let mut nibble = 0u8;
    let mut bits = 0;

    for y in 0..HASH_SIZE {
        for x in 0..HASH_SIZE {
            let left = small.get_pixel(x, y)[0];
            let right = small.get_pixel(x + 1, y)[0];
            nibble = (nibble << 1) | u8::from(left < right);
            bits += 1;
            if bits == 4 {
                hex.push(char::from_digit(nibble as u32, 16).unwrap_or('0'));
                nibble = 0;
                bits = 0;
            }
        }
    }
    hex
}

/// Hash of a region image using the baseline variant. Reference tables are built with this.
pub fn reference_hash(image: &RgbaImage) -> String {
    perceptual_hash(&prepare_for_hash(image, &HashVariant::BASELINE))
}

/// Blend of positional character agreement and exact aligned-chunk agreement.
///
/// Symmetric, `hash_similarity(h, h) == 1.0` for any non-empty `h`, and 0.0 when the
/// lengths differ.
pub fn hash_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let same = a.iter().zip(b).filter(|(x, y)| x == y).count();
    let positional = same as f64 / a.len() as f64;

    let chunks = a.chunks(CHUNK_LEN).zip(b.chunks(CHUNK_LEN));
    let total_chunks = a.len().div_ceil(CHUNK_LEN);
    let same_chunks = chunks.filter(|(x, y)| x == y).count();
    let chunk = same_chunks as f64 / total_chunks as f64;

    POSITIONAL_WEIGHT * positional + CHUNK_WEIGHT * chunk
}

#[derive(Debug)]
struct ThresholdState {
    threshold: f64,
    window: VecDeque<f64>,
}

/// Acceptance threshold that follows recent match quality, bounded to
/// [`THRESHOLD_FLOOR`, `THRESHOLD_CEILING`].
#[derive(Debug)]
pub struct ThresholdController {
    state: Mutex<ThresholdState>,
}

impl Default for ThresholdController {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl ThresholdController {
    pub fn new(initial: f64) -> Self {
        Self {
            state: Mutex::new(ThresholdState {
                threshold: initial.clamp(THRESHOLD_FLOOR, THRESHOLD_CEILING),
                window: VecDeque::with_capacity(WINDOW_LEN),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThresholdState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self) -> f64 {
        self.lock().threshold
    }

    /// Override the threshold (clamped) and forget the recent history.
    pub fn set(&self, threshold: f64) {
        let mut state = self.lock();
        state.threshold = threshold.clamp(THRESHOLD_FLOOR, THRESHOLD_CEILING);
        state.window.clear();
    }

    /// Record the best similarity of one lookup, accepted or not. Returns the threshold
    /// in effect afterwards.
    pub fn record(&self, confidence: f64) -> f64 {
        let mut state = self.lock();
        if state.window.len() == WINDOW_LEN {
            state.window.pop_front();
        }
        state.window.push_back(confidence);

        if state.window.len() < MIN_SAMPLES {
            return state.threshold;
        }

        let n = state.window.len() as f64;
        let avg = state.window.iter().sum::<f64>() / n;
        let max = state.window.iter().copied().fold(f64::MIN, f64::max);
        let min = state.window.iter().copied().fold(f64::MAX, f64::min);
        let current = state.threshold;

        let adjusted = if avg < current && max < current {
            (current - THRESHOLD_STEP).max(THRESHOLD_FLOOR)
        } else if min > current + HIGH_MARGIN {
            (current + THRESHOLD_STEP).min(THRESHOLD_CEILING)
        } else {
            current
        };

        if (adjusted - current).abs() > f64::EPSILON {
            debug!("Hash threshold {:.2} -> {:.2} (avg {:.2})", current, adjusted, avg);
            state.threshold = adjusted;
            state.window.clear();
        }
        state.threshold
    }
}

/// Identifies a card from its region image by perceptual-hash lookup.
pub struct HashMatcher {
    references: Vec<(String, String)>,
    variants: Vec<HashVariant>,
    threshold: ThresholdController,
}

impl HashMatcher {
    pub fn new(references: Vec<(String, String)>, variants: Vec<HashVariant>) -> Self {
        Self {
            references,
            variants,
            threshold: ThresholdController::default(),
        }
    }

    pub fn from_store(store: &ReferenceStore) -> Self {
        let matcher = Self::new(store.hash_table(), HashVariant::defaults());
        info!("HashMatcher loaded {} reference hashes", matcher.reference_count());
        matcher
    }

    pub fn is_ready(&self) -> bool {
        !self.references.is_empty() && !self.variants.is_empty()
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn threshold(&self) -> &ThresholdController {
        &self.threshold
    }

    /// Hashes of the image under every configured variant.
    pub fn variant_hashes(&self, image: &RgbaImage) -> Vec<String> {
        self.variants
            .iter()
            .map(|v| perceptual_hash(&prepare_for_hash(image, v)))
            .collect()
    }

    pub fn identify(&self, image: &RgbaImage, region: usize) -> MatchCandidate {
        if !self.is_ready() || image.width() == 0 || image.height() == 0 {
            return MatchCandidate::unmatched(region, MatchSource::Hash, 0.0);
        }

        let hashes = self.variant_hashes(image);
        let mut best: Option<(&str, f64)> = None;
        for (id, reference) in &self.references {
            let score = hashes
                .iter()
                .map(|h| hash_similarity(h, reference))
                .fold(0.0, f64::max);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((id, score));
            }
        }

        let Some((id, score)) = best else {
            return MatchCandidate::unmatched(region, MatchSource::Hash, 0.0);
        };
        let threshold = self.threshold.get();
        self.threshold.record(score);

        if score >= threshold {
            debug!("Region {}: hash match {} ({:.2})", region, id, score);
            MatchCandidate::matched(region, MatchSource::Hash, id.to_string(), score)
        } else {
            debug!(
                "Region {}: best hash {} ({:.2}) below threshold {:.2}",
                region, id, score, threshold
            );
            MatchCandidate::unmatched(region, MatchSource::Hash, score)
        }
    }
}
