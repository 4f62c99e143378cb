use anyhow::{Context, Result};
use arena_data::{Rarity, ReferenceStore};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::candidate::{MatchCandidate, MatchSource};

/// Minimum similarity for an icon class to be accepted
const MIN_SIMILARITY: f64 = 0.7;

/// Per-pixel RGB distance still counted as matching
const PIXEL_TOLERANCE: f64 = 60.0;

/// Confidence multiplier for a hash/text candidate the icons contradict
const CONTRADICTION_PENALTY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconKind {
    Cost,
    Rarity,
}

/// Reference bitmap for one discrete class
#[derive(Debug, Clone)]
pub struct IconTemplate {
    pub label: String,
    pub image: RgbaImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IconMatch {
    pub label: String,
    pub similarity: f64,
}

/// All reference bitmaps of one icon kind.
#[derive(Debug, Clone)]
pub struct IconSet {
    pub kind: IconKind,
    templates: Vec<IconTemplate>,
}

impl IconSet {
    pub fn new(kind: IconKind, templates: Vec<IconTemplate>) -> Self {
        Self { kind, templates }
    }

    /// Load every PNG in `dir`; the file stem is the class label.
    /// A missing directory yields an empty (not ready) set.
    pub fn load(kind: IconKind, dir: &Path) -> Result<Self> {
        let mut templates = Vec::new();
        if !dir.exists() {
            warn!("No icon templates at {}", dir.display());
            return Ok(Self::new(kind, templates));
        }

        let entries =
            std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let Some(label) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match image::open(&path) {
                Ok(img) => templates.push(IconTemplate {
                    label: label.to_string(),
                    image: img.to_rgba8(),
                }),
                Err(e) => warn!("Failed to load icon {}: {}", path.display(), e),
            }
        }
        templates.sort_by(|a, b| a.label.cmp(&b.label));

        info!(
            "Loaded {} {:?} icon template(s) from {}",
            templates.len(),
            kind,
            dir.display()
        );
        Ok(Self::new(kind, templates))
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Best-matching class, if its similarity reaches the acceptance threshold.
    pub fn classify(&self, image: &RgbaImage) -> Option<IconMatch> {
        if image.width() == 0 || image.height() == 0 {
            return None;
        }

        let mut best: Option<IconMatch> = None;
        for tmpl in &self.templates {
            let (tw, th) = tmpl.image.dimensions();
            let resized = if image.dimensions() == (tw, th) {
                image.clone()
            } else {
                imageops::resize(image, tw, th, FilterType::Triangle)
            };
            let similarity = pixel_similarity(&resized, &tmpl.image);
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(IconMatch {
                    label: tmpl.label.clone(),
                    similarity,
                });
            }
        }

        let best = best?;
        if best.similarity >= MIN_SIMILARITY {
            Some(best)
        } else {
            debug!(
                "{:?} icon: best {} at {:.2} below {:.2}",
                self.kind, best.label, best.similarity, MIN_SIMILARITY
            );
            None
        }
    }
}

/// What the cost crystal and rarity gem were read as.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IconReading {
    pub cost: Option<(u8, f64)>,
    pub rarity: Option<(Rarity, f64)>,
}

impl IconReading {
    fn agrees_with(&self, cost: u8, rarity: Rarity) -> bool {
        self.cost.map_or(true, |(c, _)| c == cost) && self.rarity.map_or(true, |(r, _)| r == rarity)
    }

    /// Check another matcher's candidate against the read icons. A card whose cost or
    /// rarity contradicts the reading has its confidence halved; agreement leaves the
    /// candidate unchanged and adds no vote of its own.
    pub fn verify(&self, candidate: &mut MatchCandidate, corpus: &ReferenceStore) {
        let Some(card) = candidate.card_id.as_deref().and_then(|id| corpus.card(id)) else {
            return;
        };
        if !self.agrees_with(card.cost, card.rarity) {
            debug!(
                "{} candidate {} contradicts icons {:?}",
                candidate.source, card.id, self
            );
            candidate.confidence *= CONTRADICTION_PENALTY;
        }
    }

    fn mean_similarity(&self) -> f64 {
        let values: Vec<f64> = self
            .cost
            .map(|(_, s)| s)
            .into_iter()
            .chain(self.rarity.map(|(_, s)| s))
            .collect();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }
}

/// Reads the small fixed icons on a card and turns them into a card candidate.
pub struct IconMatcher {
    cost: IconSet,
    rarity: IconSet,
}

impl IconMatcher {
    pub fn new(cost: IconSet, rarity: IconSet) -> Self {
        Self { cost, rarity }
    }

    /// Expects `data_dir/templates/cost/<0..10>.png` and `data_dir/templates/rarity/<tier>.png`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let root = data_dir.join("templates");
        Ok(Self::new(
            IconSet::load(IconKind::Cost, &root.join("cost"))?,
            IconSet::load(IconKind::Rarity, &root.join("rarity"))?,
        ))
    }

    pub fn is_ready(&self) -> bool {
        !self.cost.is_empty() || !self.rarity.is_empty()
    }

    pub fn read(&self, cost_icon: &RgbaImage, rarity_icon: &RgbaImage) -> IconReading {
        let cost = self
            .cost
            .classify(cost_icon)
            .and_then(|m| m.label.parse::<u8>().ok().filter(|c| *c <= 10).map(|c| (c, m.similarity)));
        let rarity = self
            .rarity
            .classify(rarity_icon)
            .and_then(|m| Rarity::from_label(&m.label).map(|r| (r, m.similarity)));
        IconReading { cost, rarity }
    }

    /// Resolve an icon reading on its own: the only corpus card with exactly the read
    /// cost and rarity, else no match. Hash and text answers never feed in here, so a
    /// template match is always independent evidence.
    pub fn resolve(
        &self,
        reading: &IconReading,
        region: usize,
        corpus: &ReferenceStore,
    ) -> MatchCandidate {
        if reading.cost.is_none() && reading.rarity.is_none() {
            return MatchCandidate::unmatched(region, MatchSource::Template, 0.0);
        }
        let confidence = reading.mean_similarity();

        if let (Some((cost, _)), Some((rarity, _))) = (reading.cost, reading.rarity) {
            if let [only] = corpus.cards_with(cost, rarity).as_slice() {
                return MatchCandidate::matched(
                    region,
                    MatchSource::Template,
                    only.id.clone(),
                    confidence,
                );
            }
        }
        MatchCandidate::unmatched(region, MatchSource::Template, confidence)
    }
}

/// 1 - (mismatched pixels / total) for two same-sized images.
fn pixel_similarity(a: &RgbaImage, b: &RgbaImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let total = (a.width() * a.height()) as f64;
    if total == 0.0 {
        return 0.0;
    }
    let tol_sq = PIXEL_TOLERANCE * PIXEL_TOLERANCE;
    let mismatched = a
        .pixels()
        .zip(b.pixels())
        .filter(|(p, q)| {
            let dr = p[0] as f64 - q[0] as f64;
            let dg = p[1] as f64 - q[1] as f64;
            let db = p[2] as f64 - q[2] as f64;
            dr * dr + dg * dg + db * db > tol_sq
        })
        .count();
    1.0 - mismatched as f64 / total
}
