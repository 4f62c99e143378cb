//! Fuses the per-matcher candidates for one region into a single identification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::candidate::{clamp_unit, MatchCandidate, MatchSource};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimum confidence reported when every matcher agrees.
    pub agreement_floor: f64,
    /// Hash confidence above which the hash result is taken outright.
    pub hash_trust: f64,
    /// How far template+text must beat the hash to override it.
    pub override_margin: f64,
    pub min_acceptance: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            agreement_floor: 0.95,
            hash_trust: 0.85,
            override_margin: 0.15,
            min_acceptance: 0.3,
        }
    }
}

/// Which precedence rule decided an identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRule {
    Unanimous,
    TrustedHash,
    SecondaryAgreement,
    WeightedVote,
    Unidentified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub region: usize,
    pub card_id: Option<String>,
    pub confidence: f64,
    pub rule: ConsensusRule,
}

impl Identification {
    fn new(region: usize, card_id: &str, confidence: f64, rule: ConsensusRule) -> Self {
        Self {
            region,
            card_id: Some(card_id.to_string()),
            confidence: clamp_unit(confidence),
            rule,
        }
    }

    fn unidentified(region: usize, confidence: f64) -> Self {
        Self {
            region,
            card_id: None,
            confidence: clamp_unit(confidence),
            rule: ConsensusRule::Unidentified,
        }
    }

    pub fn is_identified(&self) -> bool {
        self.card_id.is_some()
    }
}

fn by_source(candidates: &[MatchCandidate], source: MatchSource) -> Option<&MatchCandidate> {
    candidates.iter().find(|c| c.source == source)
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Combine the candidates of the ready matchers for `region`.
///
/// Rules in precedence order: unanimous agreement, trusted hash, template+text
/// overriding the hash, confidence-weighted vote. Nothing at or above
/// `min_acceptance` means unidentified.
pub fn combine(
    region: usize,
    candidates: &[MatchCandidate],
    config: &ConsensusConfig,
) -> Identification {
    let best_seen = candidates.iter().map(|c| c.confidence).fold(0.0, f64::max);

    // agreement only counts across different matchers
    let independent = candidates.iter().any(|c| c.source != candidates[0].source);
    if independent {
        if let Some(first) = candidates[0].card_id.as_deref() {
            if candidates.iter().all(|c| c.card_id.as_deref() == Some(first)) {
                let confidence = mean(candidates.iter().map(|c| c.confidence))
                    .max(config.agreement_floor)
                    .min(1.0);
                debug!("Region {}: unanimous {} ({:.2})", region, first, confidence);
                return Identification::new(region, first, confidence, ConsensusRule::Unanimous);
            }
        }
    }

    let voters: Vec<&MatchCandidate> = candidates
        .iter()
        .filter(|c| c.is_match() && c.confidence >= config.min_acceptance)
        .collect();
    if voters.is_empty() {
        return Identification::unidentified(region, best_seen);
    }

    let hash = by_source(candidates, MatchSource::Hash).filter(|c| c.is_match());
    if let Some(h) = hash {
        if h.confidence > config.hash_trust {
            if let Some(id) = h.card_id.as_deref() {
                return Identification::new(region, id, h.confidence, ConsensusRule::TrustedHash);
            }
        }
    }

    let matched = |source| {
        by_source(candidates, source).and_then(|c| Some((c.card_id.as_deref()?, c.confidence)))
    };
    let template = matched(MatchSource::Template);
    let text = matched(MatchSource::Text);
    if let (Some((template_id, template_conf)), Some((text_id, text_conf))) = (template, text) {
        let hash_id = hash.and_then(|h| h.card_id.as_deref());
        let hash_conf = hash.map_or(0.0, |h| h.confidence);
        let pair_conf = (template_conf + text_conf) / 2.0;
        if template_id == text_id
            && hash_id != Some(template_id)
            && pair_conf > hash_conf + config.override_margin
        {
            debug!(
                "Region {}: template+text {} ({:.2}) over hash ({:.2})",
                region, template_id, pair_conf, hash_conf
            );
            return Identification::new(
                region,
                template_id,
                pair_conf,
                ConsensusRule::SecondaryAgreement,
            );
        }
    }

    // id -> (vote total, supporting confidences)
    let mut tally: BTreeMap<&str, (f64, Vec<f64>)> = BTreeMap::new();
    for c in &voters {
        if let Some(id) = c.card_id.as_deref() {
            let entry = tally.entry(id).or_default();
            entry.0 += c.confidence;
            entry.1.push(c.confidence);
        }
    }

    // BTreeMap iteration is lexical, so the first of several exact ties wins
    let mut winner: Option<(&str, f64, f64)> = None;
    for (id, (votes, confs)) in &tally {
        let avg = mean(confs.iter().copied());
        let better = match winner {
            None => true,
            Some((_, best_votes, best_avg)) => {
                *votes > best_votes || (*votes == best_votes && avg > best_avg)
            }
        };
        if better {
            winner = Some((id, *votes, avg));
        }
    }

    match winner {
        Some((id, votes, avg)) => {
            debug!("Region {}: vote {} ({:.2} total, {:.2} avg)", region, id, votes, avg);
            Identification::new(region, id, avg, ConsensusRule::WeightedVote)
        }
        None => Identification::unidentified(region, best_seen),
    }
}
