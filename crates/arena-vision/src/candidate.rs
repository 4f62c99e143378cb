use serde::{Deserialize, Serialize};
use std::fmt;

/// Which matcher produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Hash,
    Template,
    Text,
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchSource::Hash => "hash",
            MatchSource::Template => "template",
            MatchSource::Text => "text",
        })
    }
}

/// One matcher's opinion about one region for one detection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub region: usize,
    /// `None` is the no-match sentinel.
    pub card_id: Option<String>,
    /// Always within [0, 1].
    pub confidence: f64,
    pub source: MatchSource,
}

impl MatchCandidate {
    pub fn matched(region: usize, source: MatchSource, card_id: String, confidence: f64) -> Self {
        Self {
            region,
            card_id: Some(card_id),
            confidence: clamp_unit(confidence),
            source,
        }
    }

    /// A no-match result. `confidence` keeps the best rejected score for diagnostics.
    pub fn unmatched(region: usize, source: MatchSource, confidence: f64) -> Self {
        Self {
            region,
            card_id: None,
            confidence: clamp_unit(confidence),
            source,
        }
    }

    pub fn is_match(&self) -> bool {
        self.card_id.is_some()
    }
}

pub(crate) fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamped() {
        let c = MatchCandidate::matched(0, MatchSource::Hash, "X".into(), 1.7);
        assert_eq!(c.confidence, 1.0);
        let u = MatchCandidate::unmatched(0, MatchSource::Text, -0.2);
        assert_eq!(u.confidence, 0.0);
        assert!(!u.is_match());
        assert_eq!(MatchCandidate::unmatched(0, MatchSource::Text, f64::NAN).confidence, 0.0);
    }
}
