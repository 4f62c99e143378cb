use anyhow::{Context, Result};
use arena_capture::{resolution_matches, CaptureRegion, RegionBounds};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::region_locator::REGION_COUNT;

/// Persisted form of one card region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRegion {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Fractions of the screen when true, pixels otherwise.
    pub relative: bool,
}

impl StoredRegion {
    fn from_region(region: &CaptureRegion) -> Self {
        match region.bounds {
            RegionBounds::Relative {
                x,
                y,
                width,
                height,
            } => Self {
                index: region.index,
                x,
                y,
                width,
                height,
                relative: true,
            },
            RegionBounds::Absolute {
                x,
                y,
                width,
                height,
            } => Self {
                index: region.index,
                x: x as f64,
                y: y as f64,
                width: width as f64,
                height: height as f64,
                relative: false,
            },
        }
    }

    fn to_region(&self, screen: usize) -> CaptureRegion {
        let bounds = if self.relative {
            RegionBounds::Relative {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
            }
        } else {
            RegionBounds::Absolute {
                x: self.x.max(0.0) as u32,
                y: self.y.max(0.0) as u32,
                width: self.width.max(0.0) as u32,
                height: self.height.max(0.0) as u32,
            }
        };
        CaptureRegion::new(self.index, bounds, screen)
    }
}

/// Region geometry keyed by screen resolution (`"<w>x<h>"`), persisted as JSON.
#[derive(Debug, Clone, Default)]
pub struct RegionGeometryStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, Vec<StoredRegion>>,
}

impl RegionGeometryStore {
    /// An in-memory store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing or unreadable file yields an empty store bound to
    /// the same path.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring malformed region geometry {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: Some(path.to_path_buf()),
            entries,
        }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Saved region geometry to {}", path.display());
        Ok(())
    }

    /// Stored regions for a resolution within the ±50px tolerance, exact key first.
    pub fn lookup(&self, width: u32, height: u32, screen: usize) -> Option<Vec<CaptureRegion>> {
        let exact = self.entries.get(&key(width, height));
        let stored = exact.or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| parse_key(k).is_some_and(|res| resolution_matches(res, (width, height))))
                .map(|(_, v)| v)
        })?;

        if stored.len() != REGION_COUNT {
            return None;
        }
        let mut regions: Vec<CaptureRegion> = stored.iter().map(|s| s.to_region(screen)).collect();
        regions.sort_by_key(|r| r.index);
        Some(regions)
    }

    pub fn insert(&mut self, width: u32, height: u32, regions: &[CaptureRegion]) {
        self.entries.insert(
            key(width, height),
            regions.iter().map(StoredRegion::from_region).collect(),
        );
    }

    /// Drop geometry stored for a resolution (and any within tolerance of it).
    pub fn invalidate(&mut self, width: u32, height: u32) {
        self.entries.retain(|k, _| {
            !parse_key(k).is_some_and(|res| resolution_matches(res, (width, height)))
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key(width: u32, height: u32) -> String {
    format!("{}x{}", width, height)
}

fn parse_key(key: &str) -> Option<(u32, u32)> {
    let (w, h) = key.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_capture::layout;

    #[test]
    fn test_lookup_tolerance() {
        let mut store = RegionGeometryStore::in_memory();
        store.insert(1920, 1080, &layout::card_slots(1920, 1080, 0));

        assert!(store.lookup(1920, 1080, 0).is_some());
        assert!(store.lookup(1900, 1050, 0).is_some());
        assert!(store.lookup(2560, 1440, 0).is_none());
        assert!(store.lookup(1920, 1131, 0).is_none());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("regions.json");
        let regions = vec![
            CaptureRegion::new(
                0,
                RegionBounds::Relative {
                    x: 0.1,
                    y: 0.2,
                    width: 0.1,
                    height: 0.3,
                },
                0,
            ),
            CaptureRegion::new(
                1,
                RegionBounds::Absolute {
                    x: 800,
                    y: 300,
                    width: 250,
                    height: 380,
                },
                0,
            ),
            CaptureRegion::new(
                2,
                RegionBounds::Absolute {
                    x: 1150,
                    y: 300,
                    width: 250,
                    height: 380,
                },
                0,
            ),
        ];

        let mut store = RegionGeometryStore::load(&path);
        store.insert(1920, 1080, &regions);
        store.save().unwrap();

        let loaded = RegionGeometryStore::load(&path);
        assert_eq!(loaded.lookup(1920, 1080, 0).unwrap(), regions);
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(RegionGeometryStore::load(&path).is_empty());
    }

    #[test]
    fn test_invalidate() {
        let mut store = RegionGeometryStore::in_memory();
        store.insert(1920, 1080, &layout::card_slots(1920, 1080, 0));
        store.insert(2560, 1440, &layout::card_slots(2560, 1440, 0));
        store.invalidate(1930, 1080);
        assert_eq!(store.len(), 1);
        assert!(store.lookup(2560, 1440, 0).is_some());
    }
}
