use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Free,
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub const ALL: [Rarity; 5] = [
        Rarity::Free,
        Rarity::Common,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Free => "free",
            Rarity::Common => "common",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(label.trim()))
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collectible card as it appears in the reference corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: String,
    pub name: String,
    pub cost: u8,
    pub rarity: Rarity,
    /// Reference perceptual hash, filled from hashes.json.
    #[serde(default)]
    pub hash: Option<String>,
}

/// Raw cards.json file format
#[derive(Debug, Deserialize)]
struct CardsFile {
    #[allow(dead_code)]
    #[serde(default)]
    version: Option<String>,
    cards: Vec<CardRecord>,
}

/// `None` when the file does not exist.
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(parsed))
}

/// Read-only card registry shared by all matchers.
#[derive(Debug, Clone, Default)]
pub struct ReferenceStore {
    pub cards: HashMap<String, CardRecord>,
    pub cards_by_name: HashMap<String, String>,
}

impl ReferenceStore {
    /// Load the card corpus and hash table from the data directory.
    ///
    /// Expects `data_dir/cards.json` and `data_dir/hashes.json` (id → hash string).
    /// A missing or unreadable file is logged and leaves the store (partially) empty,
    /// so the matchers that need it report not-ready instead of failing.
    pub fn load(data_dir: &Path) -> Self {
        let mut store = Self::default();

        match read_json::<CardsFile>(&data_dir.join("cards.json")) {
            Ok(Some(file)) => {
                store.insert_all(file.cards);
                tracing::info!("Loaded {} cards", store.cards.len());
            }
            Ok(None) => tracing::warn!("No cards.json found in {}", data_dir.display()),
            Err(e) => tracing::warn!("Card corpus unavailable: {:#}", e),
        }

        match read_json::<HashMap<String, String>>(&data_dir.join("hashes.json")) {
            Ok(Some(hashes)) => {
                let attached = store.attach_hashes(hashes);
                tracing::info!("Attached {} reference hashes", attached);
            }
            Ok(None) => tracing::warn!("No hashes.json found in {}", data_dir.display()),
            Err(e) => tracing::warn!("Reference hashes unavailable: {:#}", e),
        }

        store
    }

    pub fn from_cards(cards: Vec<CardRecord>) -> Self {
        let mut store = Self::default();
        store.insert_all(cards);
        store
    }

    fn insert_all(&mut self, cards: Vec<CardRecord>) {
        for card in cards {
            self.cards_by_name
                .insert(card.name.to_lowercase(), card.id.clone());
            self.cards.insert(card.id.clone(), card);
        }
    }

    /// Attach hashes to known cards; hashes for unknown ids are dropped.
    fn attach_hashes(&mut self, hashes: HashMap<String, String>) -> usize {
        let mut attached = 0;
        for (id, hash) in hashes {
            match self.cards.get_mut(&id) {
                Some(card) => {
                    card.hash = Some(hash);
                    attached += 1;
                }
                None => tracing::debug!("Hash for unknown card {}", id),
            }
        }
        attached
    }

    pub fn card(&self, id: &str) -> Option<&CardRecord> {
        self.cards.get(id)
    }

    pub fn card_by_name(&self, name: &str) -> Option<&CardRecord> {
        self.cards_by_name
            .get(&name.to_lowercase())
            .and_then(|id| self.cards.get(id))
    }

    /// id → hash pairs for all cards carrying a reference hash, sorted by id.
    pub fn hash_table(&self) -> Vec<(String, String)> {
        let mut table: Vec<(String, String)> = self
            .cards
            .values()
            .filter_map(|c| c.hash.as_ref().map(|h| (c.id.clone(), h.clone())))
            .collect();
        table.sort();
        table
    }

    /// Cards with the given cost and rarity, sorted by id.
    pub fn cards_with(&self, cost: u8, rarity: Rarity) -> Vec<&CardRecord> {
        let mut cards: Vec<&CardRecord> = self
            .cards
            .values()
            .filter(|c| c.cost == cost && c.rarity == rarity)
            .collect();
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        cards
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, name: &str, cost: u8, rarity: Rarity) -> CardRecord {
        CardRecord {
            id: id.to_string(),
            name: name.to_string(),
            cost,
            rarity,
            hash: None,
        }
    }

    #[test]
    fn test_load_nonexistent() {
        let store = ReferenceStore::load(Path::new("/nonexistent"));
        assert!(store.is_empty());
        assert!(store.hash_table().is_empty());
    }

    #[test]
    fn test_load_cards_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cards.json"),
            r#"{"version": "31.0", "cards": [
                {"id": "CS2_029", "name": "Fireball", "cost": 4, "rarity": "free"},
                {"id": "EX1_279", "name": "Pyroblast", "cost": 10, "rarity": "epic"}
            ]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("hashes.json"),
            r#"{"CS2_029": "ffee", "UNKNOWN": "0000"}"#,
        )
        .unwrap();

        let store = ReferenceStore::load(dir.path());
        assert_eq!(store.cards.len(), 2);
        assert_eq!(store.card_by_name("FIREBALL").unwrap().id, "CS2_029");
        assert_eq!(
            store.hash_table(),
            vec![("CS2_029".to_string(), "ffee".to_string())]
        );
        assert_eq!(store.card("EX1_279").unwrap().rarity, Rarity::Epic);
    }

    #[test]
    fn test_malformed_cards_file_leaves_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cards.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("hashes.json"), r#"{"CS2_029": "ffee"}"#).unwrap();
        let store = ReferenceStore::load(dir.path());
        assert!(store.is_empty());
        assert!(store.hash_table().is_empty());
    }

    #[test]
    fn test_malformed_hashes_keep_cards() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cards.json"),
            r#"{"cards": [{"id": "CS2_029", "name": "Fireball", "cost": 4, "rarity": "common"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("hashes.json"), "[1, 2").unwrap();
        let store = ReferenceStore::load(dir.path());
        assert_eq!(store.cards.len(), 1);
        assert!(store.hash_table().is_empty());
    }

    #[test]
    fn test_cards_with_cost_and_rarity() {
        let store = ReferenceStore::from_cards(vec![
            card("B", "Bravo", 3, Rarity::Rare),
            card("A", "Alpha", 3, Rarity::Rare),
            card("C", "Charlie", 3, Rarity::Epic),
        ]);
        let ids: Vec<&str> = store
            .cards_with(3, Rarity::Rare)
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_rarity_labels() {
        assert_eq!(Rarity::from_label("Legendary"), Some(Rarity::Legendary));
        assert_eq!(Rarity::from_label("mythic"), None);
        assert_eq!(Rarity::Epic.to_string(), "epic");
    }
}
