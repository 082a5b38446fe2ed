//! In-memory salvage container store.
//!
//! Containers are keyed by sector and expire after a TTL; expired entries
//! are pruned lazily on any access. There is no persistence; salvage that
//! outlives the process is gone, like everything else adrift in space.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::voidlane::config::SalvageConfig;

/// A loot container dropped into a sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalvageContainer {
    pub salvage_id: String,
    pub sector: i64,
    pub victor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cargo: BTreeMap<String, u32>,
    pub scrap: u32,
    pub credits: i64,
    #[serde(default)]
    pub claimed: bool,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Sector-indexed TTL store of [`SalvageContainer`]s.
pub struct SalvageManager {
    default_ttl: Duration,
    by_sector: Mutex<HashMap<i64, HashMap<String, SalvageContainer>>>,
}

impl SalvageManager {
    pub fn new(config: SalvageConfig) -> Self {
        Self {
            default_ttl: config.default_ttl,
            by_sector: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a new container. `ttl` falls back to the configured default
    /// and is floored at one second.
    pub fn create(
        &self,
        sector: i64,
        victor_id: Option<String>,
        cargo: BTreeMap<String, u32>,
        scrap: u32,
        credits: i64,
        metadata: BTreeMap<String, serde_json::Value>,
        ttl: Option<Duration>,
    ) -> SalvageContainer {
        let now = Utc::now();
        let ttl = ttl.unwrap_or(self.default_ttl).max(Duration::from_secs(1));
        let expires = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(900));
        let container = SalvageContainer {
            salvage_id: Uuid::new_v4().simple().to_string(),
            sector,
            victor_id,
            created_at: now,
            expires_at: expires,
            cargo,
            scrap,
            credits,
            claimed: false,
            claimed_by: None,
            metadata,
        };
        let mut state = lock(&self.by_sector);
        state
            .entry(sector)
            .or_insert_with(HashMap::new)
            .insert(container.salvage_id.clone(), container.clone());
        container
    }

    /// Atomically claim an unclaimed, unexpired container.
    ///
    /// Returns `None` when the container is missing, expired, or already
    /// claimed; claiming is first-come-first-served and final.
    pub fn claim(&self, salvage_id: &str, claimer_id: &str) -> Option<SalvageContainer> {
        let mut state = lock(&self.by_sector);
        prune_locked(&mut state);
        for sector_map in state.values_mut() {
            if let Some(container) = sector_map.get_mut(salvage_id) {
                if container.claimed {
                    return None;
                }
                container.claimed = true;
                container.claimed_by = Some(claimer_id.to_string());
                return Some(container.clone());
            }
        }
        None
    }

    /// Unexpired containers in a sector.
    pub fn list_sector(&self, sector: i64) -> Vec<SalvageContainer> {
        let mut state = lock(&self.by_sector);
        prune_locked(&mut state);
        let mut containers: Vec<SalvageContainer> = state
            .get(&sector)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        containers.sort_by(|a, b| a.salvage_id.cmp(&b.salvage_id));
        containers
    }

    /// Look up a container by id regardless of sector.
    pub fn get(&self, salvage_id: &str) -> Option<SalvageContainer> {
        let mut state = lock(&self.by_sector);
        prune_locked(&mut state);
        state
            .values()
            .find_map(|sector_map| sector_map.get(salvage_id).cloned())
    }

    /// Delete a container by id from whichever sector holds it.
    pub fn remove(&self, salvage_id: &str) {
        let mut state = lock(&self.by_sector);
        let mut empty_sector = None;
        for (sector, sector_map) in state.iter_mut() {
            if sector_map.remove(salvage_id).is_some() {
                if sector_map.is_empty() {
                    empty_sector = Some(*sector);
                }
                break;
            }
        }
        if let Some(sector) = empty_sector {
            state.remove(&sector);
        }
    }

    /// Sweep every sector, dropping expired containers and empty buckets.
    pub fn prune_expired(&self) {
        let mut state = lock(&self.by_sector);
        prune_locked(&mut state);
    }
}

fn lock(
    mutex: &Mutex<HashMap<i64, HashMap<String, SalvageContainer>>>,
) -> std::sync::MutexGuard<'_, HashMap<i64, HashMap<String, SalvageContainer>>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn prune_locked(state: &mut HashMap<i64, HashMap<String, SalvageContainer>>) {
    let now = Utc::now();
    state.retain(|_, sector_map| {
        sector_map.retain(|_, container| container.expires_at > now);
        !sector_map.is_empty()
    });
}
