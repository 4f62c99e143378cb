use anyhow::Result;
use arena_capture::{crop_region, PixelRect};
use arena_data::ReferenceStore;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::candidate::{MatchCandidate, MatchSource};
use crate::consensus::{combine, ConsensusConfig, Identification};
use crate::hash_matcher::HashMatcher;
use crate::template_matcher::{IconMatcher, IconReading};
use crate::text_matcher::TextMatcher;
use crate::text_reader::TextRecognizer;

/// Card face areas as (x, y, width, height) fractions of the card region.
pub const COST_CRYSTAL: (f64, f64, f64, f64) = (0.0, 0.0, 0.25, 0.18);
pub const RARITY_GEM: (f64, f64, f64, f64) = (0.42, 0.55, 0.16, 0.08);
pub const NAME_BANNER: (f64, f64, f64, f64) = (0.08, 0.46, 0.84, 0.10);

fn crop_fraction(card: &RgbaImage, (fx, fy, fw, fh): (f64, f64, f64, f64)) -> RgbaImage {
    let whole = PixelRect::new(0, 0, card.width(), card.height());
    crop_region(card, &whole.sub_rect(fx, fy, fw, fh))
}

/// Which matchers have the reference data they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherReadiness {
    pub hash: bool,
    pub template: bool,
    pub text: bool,
}

impl MatcherReadiness {
    pub fn any(&self) -> bool {
        self.hash || self.template || self.text
    }
}

/// Consensus result for one region plus the candidates it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionIdentification {
    pub identification: Identification,
    pub candidates: Vec<MatchCandidate>,
}

/// Runs every ready matcher on a card image and combines their answers.
pub struct CardIdentifier {
    store: Arc<ReferenceStore>,
    hash: HashMatcher,
    icons: IconMatcher,
    text: TextMatcher,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    consensus: ConsensusConfig,
}

impl CardIdentifier {
    pub fn new(
        store: Arc<ReferenceStore>,
        icons: IconMatcher,
        recognizer: Option<Arc<dyn TextRecognizer>>,
    ) -> Self {
        Self {
            hash: HashMatcher::from_store(&store),
            text: TextMatcher::from_store(&store),
            store,
            icons,
            recognizer,
            consensus: ConsensusConfig::default(),
        }
    }

    /// Load the card corpus, hash table and icon templates from `data_dir`.
    pub fn load(data_dir: &Path, recognizer: Option<Arc<dyn TextRecognizer>>) -> Result<Self> {
        let store = Arc::new(ReferenceStore::load(data_dir));
        let icons = IconMatcher::load(data_dir)?;
        let identifier = Self::new(store, icons, recognizer);
        info!("Card identifier ready: {:?}", identifier.readiness());
        Ok(identifier)
    }

    pub fn with_consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    pub fn store(&self) -> &ReferenceStore {
        &self.store
    }

    pub fn hash_matcher(&self) -> &HashMatcher {
        &self.hash
    }

    pub fn readiness(&self) -> MatcherReadiness {
        MatcherReadiness {
            hash: self.hash.is_ready(),
            template: self.icons.is_ready(),
            text: self.text.is_ready()
                && self.recognizer.as_ref().is_some_and(|r| r.is_available()),
        }
    }

    fn read_name(&self, card: &RgbaImage, region: usize) -> MatchCandidate {
        let banner = crop_fraction(card, NAME_BANNER);
        match self.recognizer.as_ref().and_then(|r| r.recognize(&banner)) {
            Some(recognized) => self.text.identify(&recognized, region),
            None => MatchCandidate::unmatched(region, MatchSource::Text, 0.0),
        }
    }

    /// Identify the card shown in one region image.
    pub fn identify(&self, card: &RgbaImage, region: usize) -> RegionIdentification {
        let ready = self.readiness();
        let hash = ready.hash.then(|| self.hash.identify(card, region));
        let text = ready.text.then(|| self.read_name(card, region));
        let reading = ready.template.then(|| {
            self.icons.read(
                &crop_fraction(card, COST_CRYSTAL),
                &crop_fraction(card, RARITY_GEM),
            )
        });
        self.fuse(region, hash, reading, text)
    }

    /// The icons resolve a card on their own and check the hash and text answers;
    /// they never repeat those answers as a vote.
    fn fuse(
        &self,
        region: usize,
        mut hash: Option<MatchCandidate>,
        reading: Option<IconReading>,
        mut text: Option<MatchCandidate>,
    ) -> RegionIdentification {
        let template = reading.as_ref().map(|reading| {
            for hint in hash.iter_mut().chain(text.iter_mut()) {
                reading.verify(hint, &self.store);
            }
            self.icons.resolve(reading, region, &self.store)
        });

        let candidates: Vec<MatchCandidate> = [hash, template, text].into_iter().flatten().collect();
        let identification = combine(region, &candidates, &self.consensus);
        debug!(
            "Region {}: {:?} ({:.2}, {:?})",
            region, identification.card_id, identification.confidence, identification.rule
        );
        RegionIdentification {
            identification,
            candidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusRule;
    use crate::hash_matcher::reference_hash;
    use crate::template_matcher::{IconKind, IconSet};
    use crate::text_reader::RecognizedText;
    use arena_data::{CardRecord, Rarity};

    struct FixedText(&'static str);

    impl TextRecognizer for FixedText {
        fn recognize(&self, _image: &RgbaImage) -> Option<RecognizedText> {
            Some(RecognizedText {
                text: self.0.to_string(),
                confidence: 0.9,
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn horizontal() -> RgbaImage {
        RgbaImage::from_fn(250, 380, |x, _| {
            let v = (x * 255 / 250) as u8;
            image::Rgba([v, v, v, 255])
        })
    }

    fn vertical() -> RgbaImage {
        RgbaImage::from_fn(250, 380, |_, y| {
            let v = (y * 255 / 380) as u8;
            image::Rgba([v, 255 - v, v, 255])
        })
    }

    fn card(id: &str, name: &str, image: &RgbaImage) -> CardRecord {
        CardRecord {
            id: id.to_string(),
            name: name.to_string(),
            cost: 4,
            rarity: Rarity::Common,
            hash: Some(reference_hash(image)),
        }
    }

    fn store() -> Arc<ReferenceStore> {
        Arc::new(ReferenceStore::from_cards(vec![
            card("CS2_029", "Fireball", &horizontal()),
            card("CS2_022", "Polymorph", &vertical()),
        ]))
    }

    fn no_icons() -> IconMatcher {
        IconMatcher::new(
            IconSet::new(IconKind::Cost, Vec::new()),
            IconSet::new(IconKind::Rarity, Vec::new()),
        )
    }

    #[test]
    fn test_hash_only() {
        let identifier = CardIdentifier::new(store(), no_icons(), None);
        let ready = identifier.readiness();
        assert!(ready.hash);
        assert!(!ready.template);
        assert!(!ready.text);

        let result = identifier.identify(&vertical(), 1);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.identification.card_id.as_deref(), Some("CS2_022"));
        assert_eq!(result.identification.region, 1);
        assert_eq!(result.identification.rule, ConsensusRule::TrustedHash);
    }

    #[test]
    fn test_hash_and_text_agree() {
        let recognizer: Arc<dyn TextRecognizer> = Arc::new(FixedText("Fireball"));
        let identifier = CardIdentifier::new(store(), no_icons(), Some(recognizer));
        assert!(identifier.readiness().text);

        let result = identifier.identify(&horizontal(), 0);
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.identification.card_id.as_deref(), Some("CS2_029"));
        assert_eq!(result.identification.rule, ConsensusRule::Unanimous);
        assert!(result.identification.confidence >= 0.95);
    }

    #[test]
    fn test_nothing_ready() {
        let identifier = CardIdentifier::new(
            Arc::new(ReferenceStore::default()),
            no_icons(),
            Some(Arc::new(FixedText("Fireball"))),
        );
        assert!(!identifier.readiness().any());
        let result = identifier.identify(&horizontal(), 2);
        assert!(result.candidates.is_empty());
        assert!(!result.identification.is_identified());
    }

    fn icons_read(cost: u8) -> IconReading {
        IconReading {
            cost: Some((cost, 0.9)),
            rarity: Some((Rarity::Common, 0.9)),
        }
    }

    #[test]
    fn test_weak_hash_with_ambiguous_icons_not_unanimous() {
        // Fireball and Polymorph both cost 4 and are common
        let identifier = CardIdentifier::new(store(), no_icons(), None);
        let weak = MatchCandidate::matched(0, MatchSource::Hash, "CS2_029".into(), 0.40);
        let result = identifier.fuse(0, Some(weak), Some(icons_read(4)), None);

        let template = &result.candidates[1];
        assert_eq!(template.source, MatchSource::Template);
        assert!(!template.is_match());
        assert_ne!(result.identification.rule, ConsensusRule::Unanimous);
        assert_eq!(result.identification.rule, ConsensusRule::WeightedVote);
        assert!((result.identification.confidence - 0.40).abs() < 1e-9);
    }

    #[test]
    fn test_icons_demote_contradicting_hash() {
        let identifier = CardIdentifier::new(store(), no_icons(), None);
        let weak = MatchCandidate::matched(0, MatchSource::Hash, "CS2_029".into(), 0.50);
        let result = identifier.fuse(0, Some(weak), Some(icons_read(7)), None);

        assert!((result.candidates[0].confidence - 0.25).abs() < 1e-9);
        assert!(!result.identification.is_identified());
    }

    #[test]
    fn test_load_with_malformed_corpus_degrades() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cards.json"), "{ not json").unwrap();
        let identifier = CardIdentifier::load(dir.path(), None).unwrap();
        assert!(!identifier.readiness().any());
        assert!(!identifier.identify(&horizontal(), 0).identification.is_identified());
    }

    #[test]
    fn test_crop_fraction() {
        let img = RgbaImage::new(200, 400);
        let banner = crop_fraction(&img, NAME_BANNER);
        assert_eq!(banner.dimensions(), (168, 40));
    }
}
