//! Sector-level combat orchestration.
//!
//! The [`CombatDirector`] wires the [`CombatManager`] to the
//! [`GarrisonStore`] and [`SalvageManager`]: it assembles encounters from a
//! sector's occupants and stationed garrisons, drives the garrison AI each
//! round, writes garrison losses back to disk, and drops salvage when ships
//! are destroyed. Outbound event payloads are handed to an optional
//! [`EventSink`] (the RPC layer in production, a collector in tests).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use serde_json::Value;

use crate::voidlane::error::GameError;
use crate::voidlane::event::names;

use super::garrison_ai::auto_submit_garrison_actions;
use super::garrisons::GarrisonStore;
use super::manager::{CombatHooks, CombatManager};
use super::models::{
    garrison_combatant_id, CombatEncounter, CombatRoundOutcome, CombatantKind, CombatantState,
    EncounterContext, GarrisonSource, GarrisonState, TollStatus,
};
use super::payloads::{combat_ended_payload, round_resolved_payload, round_waiting_payload};
use super::salvage::SalvageManager;

/// Receiver for the combat event payloads the director produces.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event_name: &str, payload: Value);
}

/// Looks up the hold contents of a character's ship: `(cargo, credits)`.
/// Consulted when the ship is destroyed to fill its salvage container.
pub type CargoProvider = Arc<dyn Fn(&str) -> (BTreeMap<String, u32>, i64) + Send + Sync>;

/// Server-side glue between encounters, garrisons, and salvage.
pub struct CombatDirector {
    manager: CombatManager,
    garrisons: Arc<GarrisonStore>,
    salvage: Arc<SalvageManager>,
    corporations: std::sync::RwLock<HashMap<String, String>>,
    cargo_provider: std::sync::RwLock<Option<CargoProvider>>,
    sink: std::sync::RwLock<Option<Arc<dyn EventSink>>>,
}

impl CombatDirector {
    /// Build a director and install it as the manager's hooks.
    pub fn new(
        manager: CombatManager,
        garrisons: Arc<GarrisonStore>,
        salvage: Arc<SalvageManager>,
    ) -> Arc<Self> {
        let director = Arc::new(Self {
            manager: manager.clone(),
            garrisons,
            salvage,
            corporations: std::sync::RwLock::new(HashMap::new()),
            cargo_provider: std::sync::RwLock::new(None),
            sink: std::sync::RwLock::new(None),
        });
        manager.set_hooks(director.clone() as Arc<dyn CombatHooks>);
        director
    }

    /// Attach the event sink that broadcasts combat payloads.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = Some(sink);
        }
    }

    /// Attach the lookup used to fill destroyed ships' salvage.
    pub fn set_cargo_provider(&self, provider: CargoProvider) {
        if let Ok(mut slot) = self.cargo_provider.write() {
            *slot = Some(provider);
        }
    }

    /// Replace the character → corporation map the garrison AI consults.
    pub fn set_corporations(&self, corporations: HashMap<String, String>) {
        if let Ok(mut slot) = self.corporations.write() {
            *slot = corporations;
        }
    }

    pub fn manager(&self) -> &CombatManager {
        &self.manager
    }

    /// Start an encounter between `characters` and whatever garrisons are
    /// stationed in the sector.
    ///
    /// Toll garrisons get a ledger entry with the current round as the
    /// demand round, targeting the initiator (or the first character).
    pub async fn start_sector_encounter(
        &self,
        combat_id: &str,
        sector_id: i64,
        characters: Vec<CombatantState>,
        initiator: Option<String>,
    ) -> Result<CombatEncounter, GameError> {
        let default_target = initiator
            .clone()
            .or_else(|| characters.first().map(|c| c.combatant_id.clone()));

        let mut participants: BTreeMap<String, CombatantState> = characters
            .into_iter()
            .map(|c| (c.combatant_id.clone(), c))
            .collect();

        let mut context = EncounterContext {
            initiator,
            ..EncounterContext::default()
        };

        for garrison in self.garrisons.list_sector(sector_id) {
            let combatant = garrison_combatant(sector_id, &garrison);
            context.garrison_sources.push(GarrisonSource {
                owner_id: garrison.owner_id.clone(),
                mode: garrison.mode,
                toll_amount: garrison.toll_amount,
            });
            if garrison.mode == super::models::GarrisonMode::Toll {
                context.toll_registry.insert(
                    combatant.combatant_id.clone(),
                    TollStatus {
                        owner_id: garrison.owner_id.clone(),
                        toll_amount: garrison.toll_amount,
                        toll_balance: 0,
                        target_id: default_target.clone(),
                        paid: false,
                        paid_round: None,
                        demand_round: 1,
                    },
                );
            }
            participants.insert(combatant.combatant_id.clone(), combatant);
        }

        let mut encounter = CombatEncounter::new(combat_id, sector_id, participants);
        encounter.context = context;
        self.manager.start_encounter(encounter, true).await
    }

    /// Settle a toll: mark the ledger paid so the garrison stands down next
    /// round. Credit movement happens in the wallet layer before this call.
    pub async fn pay_toll(
        &self,
        combat_id: &str,
        garrison_id: &str,
        payer_id: &str,
    ) -> Result<(), GameError> {
        self.manager
            .mark_toll_paid(combat_id, garrison_id, payer_id)
            .await
    }

    async fn emit(&self, event_name: &str, payload: Value) {
        let sink = self.sink.read().ok().and_then(|slot| slot.clone());
        if let Some(sink) = sink {
            sink.emit(event_name, payload).await;
        }
    }

    /// Reconcile stored garrisons with the fighters they have left in the
    /// encounter; wiped garrisons are removed from disk.
    fn write_back_garrisons(&self, encounter: &CombatEncounter) {
        for participant in encounter.participants.values() {
            if participant.kind != CombatantKind::Garrison {
                continue;
            }
            let owner = match &participant.owner_character_id {
                Some(owner) => owner.clone(),
                None => continue,
            };
            let stored = self
                .garrisons
                .list_sector(encounter.sector_id)
                .into_iter()
                .find(|g| g.owner_id == owner);
            let stored_fighters = match stored {
                Some(g) => g.fighters,
                None => continue,
            };
            let delta = i64::from(participant.fighters) - i64::from(stored_fighters);
            if delta != 0 {
                if let Err(err) =
                    self.garrisons
                        .adjust_fighters(encounter.sector_id, &owner, delta)
                {
                    warn!(
                        "Garrison write-back failed: sector={} owner={} err={}",
                        encounter.sector_id, owner, err
                    );
                }
            }
        }
    }

    fn drop_salvage(
        &self,
        encounter: &CombatEncounter,
        outcome: &CombatRoundOutcome,
    ) -> Vec<super::salvage::SalvageContainer> {
        let victor = encounter
            .participants
            .values()
            .find(|p| p.fighters > 0)
            .map(|p| p.combatant_id.clone());

        let provider = self.cargo_provider.read().ok().and_then(|slot| slot.clone());
        let mut containers = Vec::new();
        for (pid, participant) in &encounter.participants {
            if participant.kind != CombatantKind::Character {
                continue;
            }
            if participant.fighters > 0 {
                continue;
            }
            if outcome.flee_results.get(pid).copied().unwrap_or(false) {
                continue;
            }
            let (cargo, credits) = provider
                .as_ref()
                .map(|lookup| lookup(pid))
                .unwrap_or_default();
            let mut metadata = BTreeMap::new();
            metadata.insert("source".to_string(), Value::from("ship_destroyed"));
            metadata.insert("victim".to_string(), Value::from(pid.clone()));
            containers.push(self.salvage.create(
                encounter.sector_id,
                victor.clone(),
                cargo,
                0,
                credits,
                metadata,
                None,
            ));
        }
        containers
    }
}

#[async_trait]
impl CombatHooks for CombatDirector {
    async fn on_round_waiting(&self, encounter: &CombatEncounter) {
        let garrisons = self.garrisons.list_sector(encounter.sector_id);
        self.emit(
            names::COMBAT_ROUND_WAITING,
            round_waiting_payload(encounter, &garrisons),
        )
        .await;

        let corporations = self
            .corporations
            .read()
            .map(|map| map.clone())
            .unwrap_or_default();
        let corporations = if corporations.is_empty() {
            None
        } else {
            Some(corporations)
        };
        if let Err(err) =
            auto_submit_garrison_actions(encounter, &self.manager, corporations.as_ref()).await
        {
            warn!(
                "Garrison auto-submit failed: combat_id={} err={}",
                encounter.combat_id, err
            );
        }
    }

    async fn on_round_resolved(&self, encounter: &CombatEncounter, outcome: &CombatRoundOutcome) {
        self.write_back_garrisons(encounter);
        let garrisons = self.garrisons.list_sector(encounter.sector_id);
        self.emit(
            names::COMBAT_ROUND_RESOLVED,
            round_resolved_payload(encounter, outcome, &garrisons, None),
        )
        .await;
    }

    async fn on_combat_ended(&self, encounter: &CombatEncounter, outcome: &CombatRoundOutcome) {
        self.write_back_garrisons(encounter);
        let containers = self.drop_salvage(encounter, outcome);
        let garrisons = self.garrisons.list_sector(encounter.sector_id);
        let logs: Vec<String> = encounter
            .logs
            .iter()
            .map(|log| {
                format!(
                    "round {}: {}",
                    log.round_number,
                    log.result.as_deref().unwrap_or("continues")
                )
            })
            .collect();
        self.emit(
            names::COMBAT_ENDED,
            combat_ended_payload(encounter, outcome, &garrisons, &containers, &logs),
        )
        .await;
    }
}

/// Combatant entry for a stationed garrison folded into an encounter.
pub fn garrison_combatant(sector_id: i64, garrison: &GarrisonState) -> CombatantState {
    CombatantState {
        combatant_id: garrison_combatant_id(sector_id, &garrison.owner_id),
        kind: CombatantKind::Garrison,
        name: format!("Garrison ({})", garrison.owner_id),
        fighters: garrison.fighters,
        shields: 0,
        turns_per_warp: 0,
        max_fighters: garrison.fighters,
        max_shields: 0,
        is_escape_pod: false,
        owner_character_id: Some(garrison.owner_id.clone()),
    }
}

/// Combatant entry for a character's ship.
pub fn character_combatant(
    character_id: &str,
    name: &str,
    fighters: u32,
    shields: u32,
    turns_per_warp: i32,
    max_fighters: u32,
    max_shields: u32,
    is_escape_pod: bool,
) -> CombatantState {
    CombatantState {
        combatant_id: character_id.to_string(),
        kind: CombatantKind::Character,
        name: name.to_string(),
        fighters,
        shields,
        turns_per_warp,
        max_fighters,
        max_shields,
        is_escape_pod,
        owner_character_id: Some(character_id.to_string()),
    }
}
