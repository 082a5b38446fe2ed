//! Runtime coordinator for active combat encounters.
//!
//! The [`CombatManager`] exclusively owns every [`CombatEncounter`]: callers
//! and hooks only ever see cloned snapshots. One lock guards the active and
//! completed tables plus the per-encounter deadline timers; hooks always run
//! after the lock is released so they may call back into the manager.
//!
//! # Hooks
//!
//! Attach a [`CombatHooks`] implementation to observe lifecycle callbacks.
//! For one encounter the callback order is strict:
//! `round_waiting(r)` → `round_resolved(r)` → `round_waiting(r+1)` …
//! → `round_resolved(n)` → `combat_ended`. The `combat_ended` hook is
//! dispatched on a detached task so slow ledger writes cannot stall the
//! next encounter.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use voidlane::combat::manager::CombatManager;
//! use voidlane::combat::models::{CombatEncounter, CombatantAction};
//! use voidlane::config::CombatManagerConfig;
//!
//! # async {
//! let manager = CombatManager::new(CombatManagerConfig::default());
//! let encounter = CombatEncounter::new("c1", 42, BTreeMap::new());
//! manager.start_encounter(encounter, true).await.unwrap();
//! manager
//!     .submit_action("c1", "alpha", CombatantAction::Brace, 0, None, None)
//!     .await
//!     .unwrap();
//! # };
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::voidlane::config::CombatManagerConfig;
use crate::voidlane::error::GameError;

use super::engine::{is_terminal_state, resolve_round, seed_from_combat_id};
use super::models::{
    CombatEncounter, CombatRoundLog, CombatRoundOutcome, CombatantAction, CombatantState,
    RoundAction,
};

/// Lifecycle callbacks fired by the [`CombatManager`].
///
/// All methods have no-op defaults, so implementors only override what they
/// care about. Handlers receive snapshots and may re-enter the manager.
#[async_trait]
pub trait CombatHooks: Send + Sync {
    /// A round is open for submissions (fired on start, participant joins,
    /// and after every non-terminal resolution).
    async fn on_round_waiting(&self, _encounter: &CombatEncounter) {}

    /// A round was resolved; the encounter snapshot already reflects the
    /// outcome.
    async fn on_round_resolved(&self, _encounter: &CombatEncounter, _outcome: &CombatRoundOutcome) {
    }

    /// The encounter reached a terminal state. Dispatched fire-and-forget.
    async fn on_combat_ended(&self, _encounter: &CombatEncounter, _outcome: &CombatRoundOutcome) {}
}

enum PreparedCallback {
    Waiting(CombatEncounter),
    Resolved(CombatEncounter, CombatRoundOutcome),
    Ended(CombatEncounter, CombatRoundOutcome),
}

struct ManagerState {
    active: HashMap<String, CombatEncounter>,
    completed: HashMap<String, CombatEncounter>,
    timers: HashMap<String, JoinHandle<()>>,
}

struct ManagerInner {
    state: Mutex<ManagerState>,
    round_timeout: Duration,
    hooks: std::sync::RwLock<Option<Arc<dyn CombatHooks>>>,
}

/// Coordinates active combats and round deadlines.
#[derive(Clone)]
pub struct CombatManager {
    inner: Arc<ManagerInner>,
}

impl CombatManager {
    /// Create a manager with the supplied tuning and no hooks.
    pub fn new(config: CombatManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ManagerState {
                    active: HashMap::new(),
                    completed: HashMap::new(),
                    timers: HashMap::new(),
                }),
                round_timeout: config.round_timeout,
                hooks: std::sync::RwLock::new(None),
            }),
        }
    }

    /// Attach hooks at construction time (builder pattern).
    pub fn with_hooks(self, hooks: Arc<dyn CombatHooks>) -> Self {
        self.set_hooks(hooks);
        self
    }

    /// Replace the hooks on a live manager.
    pub fn set_hooks(&self, hooks: Arc<dyn CombatHooks>) {
        if let Ok(mut slot) = self.inner.hooks.write() {
            *slot = Some(hooks);
        }
    }

    /// Register a new encounter and begin waiting for round 1 actions.
    ///
    /// Fails with [`GameError::State`] when the combat id is already active.
    /// Any completed encounter with the same id is dropped first. When the
    /// encounter has no base seed, one is derived from the combat id.
    pub async fn start_encounter(
        &self,
        mut encounter: CombatEncounter,
        emit_waiting: bool,
    ) -> Result<CombatEncounter, GameError> {
        let snapshot;
        {
            let mut state = self.inner.state.lock().await;
            if state.active.contains_key(&encounter.combat_id) {
                return Err(GameError::state(format!(
                    "Combat ID already exists: {}",
                    encounter.combat_id
                )));
            }
            state.completed.remove(&encounter.combat_id);
            if encounter.base_seed.is_none() {
                encounter.base_seed = Some(seed_from_combat_id(&encounter.combat_id));
            }
            encounter.round_number = 1;
            encounter.pending_actions.clear();
            encounter.ended = false;
            encounter.end_state = None;
            encounter.deadline = Some(Utc::now() + chrono::Duration::from_std(self.inner.round_timeout).unwrap_or_else(|_| chrono::Duration::seconds(15)));
            snapshot = encounter.clone();
            let combat_id = encounter.combat_id.clone();
            let round_number = encounter.round_number;
            state.active.insert(combat_id.clone(), encounter);
            self.schedule_timeout_locked(&mut state, &combat_id, round_number);
        }

        if emit_waiting {
            self.emit_waiting(&snapshot).await;
        }
        Ok(snapshot)
    }

    /// Submit or replace an action for the current round.
    ///
    /// Returns the [`CombatRoundOutcome`] when this submission completes the
    /// quorum and resolves the round immediately, `None` otherwise.
    pub async fn submit_action(
        &self,
        combat_id: &str,
        combatant_id: &str,
        action: CombatantAction,
        commit: u32,
        target_id: Option<String>,
        destination_sector: Option<i64>,
    ) -> Result<Option<CombatRoundOutcome>, GameError> {
        let quorum_complete;
        {
            let mut state = self.inner.state.lock().await;
            let encounter = state
                .active
                .get_mut(combat_id)
                .ok_or_else(|| GameError::not_found(format!("Unknown combat encounter: {}", combat_id)))?;
            if encounter.ended {
                return Err(GameError::state("Combat encounter already ended"));
            }
            if !encounter.participants.contains_key(combatant_id) {
                return Err(GameError::validation(format!(
                    "Combatant {} not part of encounter {}",
                    combatant_id, combat_id
                )));
            }
            let target_id = if action == CombatantAction::Attack {
                let target = target_id
                    .ok_or_else(|| GameError::validation("Attack action requires target_id"))?;
                if !encounter.participants.contains_key(&target) {
                    return Err(GameError::validation(format!(
                        "Target {} not part of encounter {}",
                        target, combat_id
                    )));
                }
                Some(target)
            } else {
                None
            };

            encounter.pending_actions.insert(
                combatant_id.to_string(),
                RoundAction {
                    action,
                    commit,
                    submitted_at: Utc::now(),
                    timed_out: false,
                    target_id,
                    destination_sector,
                },
            );
            quorum_complete = encounter.pending_actions.len() == encounter.participants.len();
        }

        if quorum_complete {
            return self.resolve_round(combat_id).await;
        }
        Ok(None)
    }

    /// Snapshot of an encounter, looking at active then completed tables.
    pub async fn get_encounter(&self, combat_id: &str) -> Option<CombatEncounter> {
        let state = self.inner.state.lock().await;
        state
            .active
            .get(combat_id)
            .or_else(|| state.completed.get(combat_id))
            .cloned()
    }

    /// Find the live encounter a combatant participates in.
    pub async fn find_encounter_for(&self, combatant_id: &str) -> Option<CombatEncounter> {
        let state = self.inner.state.lock().await;
        state
            .active
            .values()
            .find(|enc| !enc.ended && enc.participants.contains_key(combatant_id))
            .cloned()
    }

    /// Find the live encounter in a sector, if any.
    pub async fn find_encounter_in_sector(&self, sector_id: i64) -> Option<CombatEncounter> {
        let state = self.inner.state.lock().await;
        state
            .active
            .values()
            .find(|enc| !enc.ended && enc.sector_id == sector_id)
            .cloned()
    }

    /// Add a participant to a live encounter and re-emit `round_waiting`.
    pub async fn add_participant(
        &self,
        combat_id: &str,
        combatant: CombatantState,
    ) -> Result<CombatEncounter, GameError> {
        let snapshot;
        {
            let mut state = self.inner.state.lock().await;
            let encounter = state
                .active
                .get_mut(combat_id)
                .ok_or_else(|| GameError::not_found(format!("Unknown combat encounter: {}", combat_id)))?;
            if encounter.ended {
                return Err(GameError::state(
                    "Cannot add participant to completed encounter",
                ));
            }
            if !encounter.participants.contains_key(&combatant.combatant_id) {
                encounter
                    .participants
                    .insert(combatant.combatant_id.clone(), combatant);
            }
            snapshot = encounter.clone();
        }
        self.emit_waiting(&snapshot).await;
        Ok(snapshot)
    }

    /// Drop an encounter from both tables and cancel its deadline timer.
    pub async fn cancel_encounter(&self, combat_id: &str) {
        let mut state = self.inner.state.lock().await;
        let existed = state.active.remove(combat_id).is_some()
            || state.completed.remove(combat_id).is_some();
        if existed {
            if let Some(handle) = state.timers.remove(combat_id) {
                handle.abort();
            }
        }
    }

    /// Mark a toll garrison's ledger entry paid for the current encounter.
    ///
    /// The garrison AI reads the ledger next round and stands down.
    pub async fn mark_toll_paid(
        &self,
        combat_id: &str,
        garrison_id: &str,
        payer_id: &str,
    ) -> Result<(), GameError> {
        let mut state = self.inner.state.lock().await;
        let encounter = state
            .active
            .get_mut(combat_id)
            .ok_or_else(|| GameError::not_found(format!("Unknown combat encounter: {}", combat_id)))?;
        let round_number = encounter.round_number;
        let entry = encounter
            .context
            .toll_registry
            .get_mut(garrison_id)
            .ok_or_else(|| {
                GameError::not_found(format!("No toll ledger for garrison {}", garrison_id))
            })?;
        entry.paid = true;
        entry.paid_round = Some(round_number);
        entry.toll_balance = entry.toll_amount;
        entry.target_id = Some(payer_id.to_string());
        Ok(())
    }

    /// Re-emit `round_waiting` for a live encounter (used when late joiners
    /// need the current round broadcast again).
    pub async fn emit_round_waiting(&self, combat_id: &str) {
        let snapshot = {
            let state = self.inner.state.lock().await;
            state.active.get(combat_id).cloned()
        };
        if let Some(encounter) = snapshot {
            self.emit_waiting(&encounter).await;
        }
    }

    // ------------------------------------------------------------------
    // Internal mechanics
    // ------------------------------------------------------------------

    async fn resolve_round(&self, combat_id: &str) -> Result<Option<CombatRoundOutcome>, GameError> {
        let mut callbacks: Vec<PreparedCallback> = Vec::new();
        let outcome;
        {
            let mut state = self.inner.state.lock().await;
            let encounter = match state.active.get_mut(combat_id) {
                Some(enc) => enc,
                None => return Ok(None),
            };
            if encounter.ended {
                return Ok(None);
            }

            // Build the action map, defaulting absentees to timed-out braces.
            let mut action_map: BTreeMap<String, RoundAction> = BTreeMap::new();
            for pid in encounter.participants.keys() {
                let action = encounter
                    .pending_actions
                    .get(pid)
                    .cloned()
                    .unwrap_or_else(RoundAction::timed_out_brace);
                action_map.insert(pid.clone(), action);
            }

            if let Some(handle) = state
                .timers
                .remove(combat_id)
            {
                handle.abort();
            }

            let encounter = match state.active.get_mut(combat_id) {
                Some(enc) => enc,
                None => return Ok(None),
            };

            debug!(
                "Resolving round: combat_id={} round={}",
                combat_id, encounter.round_number
            );
            let mut resolved = resolve_round(encounter, &action_map);
            let round_result = resolved.end_state.clone();
            info!(
                "Round result computed: combat_id={} round={} result={:?}",
                combat_id, encounter.round_number, round_result
            );

            encounter.logs.push(CombatRoundLog {
                round_number: encounter.round_number,
                actions: resolved.effective_actions.clone(),
                hits: resolved.hits.clone(),
                offensive_losses: resolved.offensive_losses.clone(),
                defensive_losses: resolved.defensive_losses.clone(),
                shield_loss: resolved.shield_loss.clone(),
                result: round_result.clone(),
                timestamp: Utc::now(),
            });

            for (pid, fighters) in &resolved.fighters_remaining {
                if let Some(participant) = encounter.participants.get_mut(pid) {
                    participant.fighters = *fighters;
                    participant.shields = resolved
                        .shields_remaining
                        .get(pid)
                        .copied()
                        .unwrap_or(participant.shields);
                }
            }

            for (pid, fled) in &resolved.flee_results {
                if *fled {
                    encounter.participants.remove(pid);
                    encounter.pending_actions.remove(pid);
                }
            }
            encounter.pending_actions.clear();

            if is_terminal_state(round_result.as_deref()) {
                encounter.ended = true;
                encounter.end_state = round_result;
                let snapshot = encounter.clone();
                callbacks.push(PreparedCallback::Resolved(snapshot.clone(), resolved.clone()));
                callbacks.push(PreparedCallback::Ended(snapshot, resolved.clone()));
                if let Some(finished) = state.active.remove(combat_id) {
                    state.completed.insert(combat_id.to_string(), finished);
                }
            } else {
                resolved.end_state = None;
                encounter.round_number += 1;
                encounter.deadline = Some(
                    Utc::now()
                        + chrono::Duration::from_std(self.inner.round_timeout)
                            .unwrap_or_else(|_| chrono::Duration::seconds(15)),
                );
                let snapshot = encounter.clone();
                let round_number = encounter.round_number;
                callbacks.push(PreparedCallback::Resolved(snapshot.clone(), resolved.clone()));
                callbacks.push(PreparedCallback::Waiting(snapshot));
                self.schedule_timeout_locked(&mut state, combat_id, round_number);
            }
            outcome = resolved;
        }

        // Emit callbacks outside the lock, in the prepared order.
        for callback in callbacks {
            match callback {
                PreparedCallback::Resolved(encounter, outcome) => {
                    if let Some(hooks) = self.hooks() {
                        hooks.on_round_resolved(&encounter, &outcome).await;
                    }
                }
                PreparedCallback::Waiting(encounter) => {
                    self.emit_waiting(&encounter).await;
                }
                PreparedCallback::Ended(encounter, outcome) => {
                    if let Some(hooks) = self.hooks() {
                        tokio::spawn(async move {
                            hooks.on_combat_ended(&encounter, &outcome).await;
                        });
                    }
                }
            }
        }
        Ok(Some(outcome))
    }

    fn hooks(&self) -> Option<Arc<dyn CombatHooks>> {
        self.inner.hooks.read().ok().and_then(|slot| slot.clone())
    }

    async fn emit_waiting(&self, encounter: &CombatEncounter) {
        if let Some(hooks) = self.hooks() {
            hooks.on_round_waiting(encounter).await;
        }
    }

    fn schedule_timeout_locked(
        &self,
        state: &mut ManagerState,
        combat_id: &str,
        round_number: u32,
    ) {
        if let Some(previous) = state.timers.remove(combat_id) {
            previous.abort();
        }
        let deadline = state
            .active
            .get(combat_id)
            .and_then(|enc| enc.deadline);
        let delay = deadline
            .map(|d| {
                let millis = (d - Utc::now()).num_milliseconds();
                if millis > 0 {
                    Duration::from_millis(millis as u64)
                } else {
                    Duration::from_millis(0)
                }
            })
            .unwrap_or(self.inner.round_timeout);

        let manager = self.clone();
        let combat_id_owned = combat_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_current = {
                let state = manager.inner.state.lock().await;
                state
                    .active
                    .get(&combat_id_owned)
                    .map(|enc| !enc.ended && enc.round_number == round_number)
                    .unwrap_or(false)
            };
            if !still_current {
                return;
            }
            if let Err(err) = manager.resolve_round(&combat_id_owned).await {
                warn!(
                    "Deadline resolution failed: combat_id={} err={}",
                    combat_id_owned, err
                );
            }
        });
        state.timers.insert(combat_id.to_string(), handle);
    }
}
