use arena_data::ReferenceStore;
use std::collections::HashSet;
use strsim::{normalized_levenshtein, sorensen_dice};
use tracing::{debug, info};

use crate::candidate::{MatchCandidate, MatchSource};
use crate::text_reader::RecognizedText;

/// A variant match at or above this ends the search.
const EARLY_EXIT_SIMILARITY: f64 = 0.85;
const MIN_SIMILARITY: f64 = 0.55;
const SIMILARITY_WEIGHT: f64 = 0.7;
const RECOGNITION_WEIGHT: f64 = 0.3;

const STOP_WORDS: &[&str] = &["the", "of", "a", "an", "and", "to", "in", "for"];

/// Letters the recognizer commonly reads as something else, and what it reads.
const MISREADS: &[(&str, &str)] = &[
    ("o", "0"),
    ("l", "1"),
    ("i", "1"),
    ("s", "5"),
    ("b", "8"),
    ("e", "3"),
    ("m", "rn"),
];

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Confidence reduction for very short strings, which match almost anything.
fn length_penalty(normalized: &str) -> f64 {
    match normalized.chars().filter(|c| !c.is_whitespace()).count() {
        0..=3 => 0.3,
        4..=5 => 0.15,
        _ => 0.0,
    }
}

struct NameEntry {
    id: String,
    normalized: String,
    variants: Vec<String>,
}

/// Name variants compared against recognized text.
pub fn name_variants(name: &str) -> Vec<String> {
    let original = name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let stripped = normalize(name);
    let without_stop_words = stripped
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ");

    let mut variants = vec![original, stripped.clone()];
    if !without_stop_words.is_empty() {
        variants.push(without_stop_words);
    }

    let mut all_misreads = stripped.clone();
    for (from, to) in MISREADS {
        if stripped.contains(from) {
            variants.push(stripped.replace(from, to));
            all_misreads = all_misreads.replace(from, to);
        }
    }
    variants.push(all_misreads);

    let mut seen = HashSet::new();
    variants.retain(|v| !v.is_empty() && seen.insert(v.clone()));
    variants
}

/// Fuzzy-matches recognized card-name text against the corpus.
pub struct TextMatcher {
    entries: Vec<NameEntry>,
}

impl TextMatcher {
    pub fn new<'a>(cards: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut entries: Vec<NameEntry> = cards
            .into_iter()
            .map(|(id, name)| NameEntry {
                id: id.to_string(),
                normalized: normalize(name),
                variants: name_variants(name),
            })
            .filter(|e| !e.normalized.is_empty())
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Self { entries }
    }

    pub fn from_store(store: &ReferenceStore) -> Self {
        let matcher = Self::new(
            store
                .cards
                .values()
                .map(|c| (c.id.as_str(), c.name.as_str())),
        );
        info!("TextMatcher indexed {} card names", matcher.entries.len());
        matcher
    }

    pub fn is_ready(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Best (entry index, similarity) in two phases: name variants with early exit,
    /// then the raw normalized names.
    fn best_match(&self, query: &str) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;

        'direct: for (i, entry) in self.entries.iter().enumerate() {
            for variant in &entry.variants {
                let sim = normalized_levenshtein(query, variant);
                if best.map_or(true, |(_, s)| sim > s) {
                    best = Some((i, sim));
                }
                if sim >= EARLY_EXIT_SIMILARITY {
                    break 'direct;
                }
            }
        }

        if best.map_or(true, |(_, s)| s < EARLY_EXIT_SIMILARITY) {
            for (i, entry) in self.entries.iter().enumerate() {
                let sim = sorensen_dice(query, &entry.normalized);
                if best.map_or(true, |(_, s)| sim > s) {
                    best = Some((i, sim));
                }
            }
        }
        best
    }

    pub fn identify(&self, recognized: &RecognizedText, region: usize) -> MatchCandidate {
        let query = normalize(&recognized.text);
        if query.is_empty() || !self.is_ready() {
            return MatchCandidate::unmatched(region, MatchSource::Text, 0.0);
        }

        let penalty = length_penalty(&query);
        let Some((idx, similarity)) = self.best_match(&query) else {
            return MatchCandidate::unmatched(region, MatchSource::Text, 0.0);
        };
        let confidence = SIMILARITY_WEIGHT * similarity
            + RECOGNITION_WEIGHT * recognized.confidence.clamp(0.0, 1.0)
            - penalty;
        let entry = &self.entries[idx];

        if similarity < MIN_SIMILARITY + penalty {
            debug!(
                "Region {}: '{}' closest to {} ({:.2}), below {:.2}",
                region,
                query,
                entry.id,
                similarity,
                MIN_SIMILARITY + penalty
            );
            return MatchCandidate::unmatched(region, MatchSource::Text, confidence);
        }

        debug!(
            "Region {}: '{}' -> {} (similarity {:.2}, confidence {:.2})",
            region, query, entry.id, similarity, confidence
        );
        MatchCandidate::matched(region, MatchSource::Text, entry.id.clone(), confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> TextMatcher {
        TextMatcher::new([
            ("CS2_029", "Fireball"),
            ("CS2_022", "Polymorph"),
            ("EX1_298", "Ragnaros the Firelord"),
            ("NEW1_021", "Doomsayer"),
            ("EX1_561", "Alexstrasza"),
            ("CS2_231", "Wisp"),
            ("FP1_013", "Kel'Thuzad"),
        ])
    }

    fn text(t: &str, confidence: f64) -> RecognizedText {
        RecognizedText {
            text: t.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Kel'Thuzad!!  "), "kelthuzad");
        assert_eq!(normalize("Ragnaros,   the\tFirelord"), "ragnaros the firelord");
        assert_eq!(normalize("...."), "");
    }

    #[test]
    fn test_variants() {
        let v = name_variants("Ragnaros the Firelord");
        assert!(v.contains(&"ragnaros the firelord".to_string()));
        assert!(v.contains(&"ragnaros firelord".to_string()));
        assert!(v.contains(&"ragnar0s the firel0rd".to_string()));
        assert!(v.contains(&"ragnar05 th3 f1r310rd".to_string()));
        let unique: HashSet<&String> = v.iter().collect();
        assert_eq!(unique.len(), v.len());
    }

    #[test]
    fn test_exact_name() {
        let c = matcher().identify(&text("Fireball", 0.9), 0);
        assert_eq!(c.card_id.as_deref(), Some("CS2_029"));
        assert!((c.confidence - (0.7 + 0.27)).abs() < 1e-9);
    }

    #[test]
    fn test_digit_misreads() {
        let m = matcher();
        assert_eq!(
            m.identify(&text("P0lym0rph", 0.6), 0).card_id.as_deref(),
            Some("CS2_022")
        );
        assert_eq!(
            m.identify(&text("Doorn5ayer", 0.6), 1).card_id.as_deref(),
            Some("NEW1_021")
        );
    }

    #[test]
    fn test_stop_words_dropped() {
        let c = matcher().identify(&text("Ragnaros Firelord", 0.7), 2);
        assert_eq!(c.card_id.as_deref(), Some("EX1_298"));
    }

    #[test]
    fn test_word_order_falls_back_to_bigrams() {
        let m = matcher();
        let query = normalize("Firelord Ragnaros");
        // no variant is close by edit distance
        let closest = m
            .entries
            .iter()
            .flat_map(|e| e.variants.iter())
            .map(|v| normalized_levenshtein(&query, v))
            .fold(0.0, f64::max);
        assert!(closest < MIN_SIMILARITY);

        let c = m.identify(&text("Firelord Ragnaros", 0.8), 2);
        assert_eq!(c.card_id.as_deref(), Some("EX1_298"));
        let expected = 0.7 * (28.0 / 33.0) + 0.3 * 0.8;
        assert!((c.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn test_garbage_unmatched() {
        let c = matcher().identify(&text("zzqx vvkj", 0.9), 0);
        assert!(!c.is_match());
        assert!(!matcher().identify(&text("", 1.0), 0).is_match());
    }

    #[test]
    fn test_short_text_penalized() {
        let m = matcher();
        // "wisp" is an exact name but short; still matched, with lower confidence
        let c = m.identify(&text("Wisp", 1.0), 0);
        assert_eq!(c.card_id.as_deref(), Some("CS2_231"));
        assert!((c.confidence - 0.85).abs() < 1e-9);

        // a near-miss short string is rejected by the raised bar
        assert!(!m.identify(&text("wip", 1.0), 0).is_match());
    }

    #[test]
    fn test_not_ready_without_names() {
        let m = TextMatcher::new(std::iter::empty::<(&str, &str)>());
        assert!(!m.is_ready());
        assert!(!m.identify(&text("Fireball", 1.0), 0).is_match());
    }
}
