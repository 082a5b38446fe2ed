//! Persistence for stationed fighters (garrisons).
//!
//! The store keeps one [`GarrisonState`] per `(sector, owner)` pair in a
//! JSON snapshot on disk. Every mutation rewrites the snapshot through a
//! temporary sibling file followed by an atomic rename, so the file on disk
//! always parses to either the previous or the new state.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::voidlane::error::GameError;

use super::models::{GarrisonMode, GarrisonState};

#[derive(Serialize, Deserialize)]
struct SnapshotMeta {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct SectorEntry {
    sector: i64,
    garrisons: Vec<GarrisonState>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    meta: SnapshotMeta,
    sectors: Vec<SectorEntry>,
}

/// File-backed store for sector garrisons.
pub struct GarrisonStore {
    path: PathBuf,
    state: Mutex<BTreeMap<i64, Vec<GarrisonState>>>,
}

impl GarrisonStore {
    /// Open (or bootstrap) the store at `path`.
    ///
    /// A missing file is created with an empty snapshot; a present file is
    /// parsed and loaded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GameError> {
        let path = path.into();
        let mut by_sector: BTreeMap<i64, Vec<GarrisonState>> = BTreeMap::new();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_snapshot(&path, &by_sector)?;
        } else {
            let raw = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)
                .map_err(|err| GameError::Internal(format!("garrison snapshot parse: {}", err)))?;
            for entry in snapshot.sectors {
                if !entry.garrisons.is_empty() {
                    by_sector.insert(entry.sector, entry.garrisons);
                }
            }
        }

        Ok(Self {
            path,
            state: Mutex::new(by_sector),
        })
    }

    /// Garrisons stationed in a sector (defensive copies).
    pub fn list_sector(&self, sector_id: i64) -> Vec<GarrisonState> {
        let state = lock_or_recover(&self.state);
        state.get(&sector_id).cloned().unwrap_or_default()
    }

    /// All sectors with their garrisons (defensive copies).
    pub fn sector_summary(&self) -> BTreeMap<i64, Vec<GarrisonState>> {
        let state = lock_or_recover(&self.state);
        state.clone()
    }

    /// Deploy (or replace) a garrison for `owner_id` in `sector_id`.
    pub fn deploy(
        &self,
        sector_id: i64,
        owner_id: &str,
        fighters: u32,
        mode: GarrisonMode,
        toll_amount: i64,
    ) -> Result<GarrisonState, GameError> {
        let mut state = lock_or_recover(&self.state);
        let garrisons = state.entry(sector_id).or_insert_with(Vec::new);
        let garrison = match garrisons.iter_mut().find(|g| g.owner_id == owner_id) {
            Some(existing) => {
                existing.fighters = fighters;
                existing.mode = mode;
                existing.toll_amount = toll_amount;
                existing.clone()
            }
            None => {
                let garrison = GarrisonState::new(owner_id, fighters, mode, toll_amount);
                garrisons.push(garrison.clone());
                garrison
            }
        };
        write_snapshot(&self.path, &state)?;
        Ok(garrison)
    }

    /// Apply a fighter delta; garrisons hitting zero are removed.
    ///
    /// Returns the updated record while the garrison survives, `None` when
    /// it was removed or never existed.
    pub fn adjust_fighters(
        &self,
        sector_id: i64,
        owner_id: &str,
        delta: i64,
    ) -> Result<Option<GarrisonState>, GameError> {
        let mut state = lock_or_recover(&self.state);
        let garrisons = match state.get_mut(&sector_id) {
            Some(g) => g,
            None => return Ok(None),
        };
        let index = match garrisons.iter().position(|g| g.owner_id == owner_id) {
            Some(i) => i,
            None => return Ok(None),
        };

        let updated = {
            let garrison = &mut garrisons[index];
            let fighters = i64::from(garrison.fighters) + delta;
            garrison.fighters = fighters.max(0) as u32;
            garrison.clone()
        };
        if updated.fighters == 0 {
            garrisons.remove(index);
            if garrisons.is_empty() {
                state.remove(&sector_id);
            }
        }
        write_snapshot(&self.path, &state)?;
        Ok(if updated.fighters > 0 { Some(updated) } else { None })
    }

    /// Change the mode / toll of an existing garrison.
    ///
    /// Returns `None` (and creates nothing) when no garrison exists for the
    /// `(sector, owner)` pair.
    pub fn set_mode(
        &self,
        sector_id: i64,
        owner_id: &str,
        mode: GarrisonMode,
        toll_amount: i64,
    ) -> Result<Option<GarrisonState>, GameError> {
        let mut state = lock_or_recover(&self.state);
        let garrison = match state
            .get_mut(&sector_id)
            .and_then(|garrisons| garrisons.iter_mut().find(|g| g.owner_id == owner_id))
        {
            Some(g) => {
                g.mode = mode;
                g.toll_amount = toll_amount;
                g.clone()
            }
            None => return Ok(None),
        };
        write_snapshot(&self.path, &state)?;
        Ok(Some(garrison))
    }

    /// Remove a garrison outright. Returns whether one was removed.
    pub fn remove(&self, sector_id: i64, owner_id: &str) -> Result<bool, GameError> {
        Ok(self.take(sector_id, owner_id)?.is_some())
    }

    /// Remove and return a garrison (read-and-remove).
    pub fn pop(&self, sector_id: i64, owner_id: &str) -> Result<Option<GarrisonState>, GameError> {
        self.take(sector_id, owner_id)
    }

    fn take(&self, sector_id: i64, owner_id: &str) -> Result<Option<GarrisonState>, GameError> {
        let mut state = lock_or_recover(&self.state);
        let garrisons = match state.get_mut(&sector_id) {
            Some(g) => g,
            None => return Ok(None),
        };
        let index = match garrisons.iter().position(|g| g.owner_id == owner_id) {
            Some(i) => i,
            None => return Ok(None),
        };
        let garrison = garrisons.remove(index);
        if garrisons.is_empty() {
            state.remove(&sector_id);
        }
        write_snapshot(&self.path, &state)?;
        Ok(Some(garrison))
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_snapshot(
    path: &PathBuf,
    by_sector: &BTreeMap<i64, Vec<GarrisonState>>,
) -> Result<(), GameError> {
    let snapshot = Snapshot {
        meta: SnapshotMeta { version: 1 },
        sectors: by_sector
            .iter()
            .map(|(sector, garrisons)| SectorEntry {
                sector: *sector,
                garrisons: garrisons.clone(),
            })
            .collect(),
    };
    let serialized = serde_json::to_string_pretty(&snapshot)?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, serialized)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, GarrisonStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = GarrisonStore::open(dir.path().join("garrisons.json")).expect("open");
        (dir, store)
    }

    #[test]
    fn test_deploy_upserts_per_owner() {
        let (_dir, store) = temp_store();
        store
            .deploy(3, "zara", 100, GarrisonMode::Offensive, 0)
            .unwrap();
        store.deploy(3, "zara", 40, GarrisonMode::Toll, 25).unwrap();
        let garrisons = store.list_sector(3);
        assert_eq!(garrisons.len(), 1);
        assert_eq!(garrisons[0].fighters, 40);
        assert_eq!(garrisons[0].mode, GarrisonMode::Toll);
        assert_eq!(garrisons[0].toll_amount, 25);
    }

    #[test]
    fn test_adjust_to_zero_removes_sector_entry() {
        let (_dir, store) = temp_store();
        store
            .deploy(3, "zara", 10, GarrisonMode::Defensive, 0)
            .unwrap();
        let remaining = store.adjust_fighters(3, "zara", -10).unwrap();
        assert!(remaining.is_none());
        assert!(store.list_sector(3).is_empty());
        assert!(store.sector_summary().is_empty());
    }

    #[test]
    fn test_set_mode_on_missing_garrison_creates_nothing() {
        let (_dir, store) = temp_store();
        let result = store.set_mode(9, "nobody", GarrisonMode::Toll, 50).unwrap();
        assert!(result.is_none());
        assert!(store.list_sector(9).is_empty());
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garrisons.json");
        {
            let store = GarrisonStore::open(&path).unwrap();
            store.deploy(7, "kel", 60, GarrisonMode::Toll, 15).unwrap();
            store
                .deploy(2, "zara", 30, GarrisonMode::Defensive, 0)
                .unwrap();
        }
        let store = GarrisonStore::open(&path).unwrap();
        assert_eq!(store.list_sector(7)[0].owner_id, "kel");
        assert_eq!(store.list_sector(2)[0].fighters, 30);

        // Sectors are serialized ascending.
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["meta"]["version"], 1);
        let sectors = parsed["sectors"].as_array().unwrap();
        assert_eq!(sectors[0]["sector"], 2);
        assert_eq!(sectors[1]["sector"], 7);
    }

    #[test]
    fn test_pop_reads_and_removes() {
        let (_dir, store) = temp_store();
        store
            .deploy(4, "zara", 12, GarrisonMode::Offensive, 0)
            .unwrap();
        let popped = store.pop(4, "zara").unwrap().unwrap();
        assert_eq!(popped.fighters, 12);
        assert!(store.pop(4, "zara").unwrap().is_none());
    }
}
