//! Data model for the combat subsystem.
//!
//! The [`CombatEncounter`] is exclusively owned by the
//! [`CombatManager`](crate::CombatManager); everything outside the manager
//! sees cloned snapshots. Per-participant tables are `BTreeMap`s so that
//! iteration order is the ascending combatant-id order the resolution rules
//! depend on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::voidlane::error::GameError;

/// Supported per-round actions for a combatant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatantAction {
    Attack,
    Brace,
    Flee,
}

impl CombatantAction {
    /// Wire form of the action (`"attack"`, `"brace"`, `"flee"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            CombatantAction::Attack => "attack",
            CombatantAction::Brace => "brace",
            CombatantAction::Flee => "flee",
        }
    }

    /// Parse a wire-form action name, case-insensitively.
    pub fn parse(value: &str) -> Result<Self, GameError> {
        match value.to_ascii_lowercase().as_str() {
            "attack" => Ok(CombatantAction::Attack),
            "brace" => Ok(CombatantAction::Brace),
            "flee" => Ok(CombatantAction::Flee),
            other => Err(GameError::validation(format!(
                "Unknown combat action: {}",
                other
            ))),
        }
    }
}

/// What kind of entity a combatant is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatantKind {
    Character,
    Garrison,
}

impl CombatantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombatantKind::Character => "character",
            CombatantKind::Garrison => "garrison",
        }
    }
}

/// Behavior mode of a deployed garrison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarrisonMode {
    Offensive,
    Defensive,
    Toll,
}

impl GarrisonMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GarrisonMode::Offensive => "offensive",
            GarrisonMode::Defensive => "defensive",
            GarrisonMode::Toll => "toll",
        }
    }

    /// Parse a wire-form mode name, case-insensitively.
    pub fn parse(value: &str) -> Result<Self, GameError> {
        match value.to_ascii_lowercase().as_str() {
            "offensive" => Ok(GarrisonMode::Offensive),
            "defensive" => Ok(GarrisonMode::Defensive),
            "toll" => Ok(GarrisonMode::Toll),
            other => Err(GameError::validation(format!(
                "Invalid garrison mode: {}",
                other
            ))),
        }
    }
}

/// Mutable state tracked for each participant in an encounter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatantState {
    pub combatant_id: String,
    pub kind: CombatantKind,
    pub name: String,
    pub fighters: u32,
    pub shields: u32,
    pub turns_per_warp: i32,
    pub max_fighters: u32,
    pub max_shields: u32,
    #[serde(default)]
    pub is_escape_pod: bool,
    #[serde(default)]
    pub owner_character_id: Option<String>,
}

impl CombatantState {
    /// Shield mitigation fraction in `[0.0, 0.5]`.
    pub fn mitigation(&self) -> f64 {
        (0.0005 * f64::from(self.shields)).clamp(0.0, 0.5)
    }
}

/// Submitted action for a single combatant in the current round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundAction {
    pub action: CombatantAction,
    #[serde(default)]
    pub commit: u32,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub destination_sector: Option<i64>,
}

impl RoundAction {
    /// An attack committing `commit` fighters against `target_id`.
    pub fn attack(commit: u32, target_id: impl Into<String>) -> Self {
        Self {
            action: CombatantAction::Attack,
            commit,
            submitted_at: Utc::now(),
            timed_out: false,
            target_id: Some(target_id.into()),
            destination_sector: None,
        }
    }

    /// A defensive brace.
    pub fn brace() -> Self {
        Self {
            action: CombatantAction::Brace,
            commit: 0,
            submitted_at: Utc::now(),
            timed_out: false,
            target_id: None,
            destination_sector: None,
        }
    }

    /// A flee attempt toward `destination_sector`.
    pub fn flee(destination_sector: Option<i64>) -> Self {
        Self {
            action: CombatantAction::Flee,
            commit: 0,
            submitted_at: Utc::now(),
            timed_out: false,
            target_id: None,
            destination_sector,
        }
    }

    /// The default inserted for a participant that never submitted before the
    /// round deadline.
    pub fn timed_out_brace() -> Self {
        Self {
            action: CombatantAction::Brace,
            commit: 0,
            submitted_at: Utc::now(),
            timed_out: true,
            target_id: None,
            destination_sector: None,
        }
    }
}

/// Log record for a resolved round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatRoundLog {
    pub round_number: u32,
    pub actions: BTreeMap<String, RoundAction>,
    pub hits: BTreeMap<String, u32>,
    pub offensive_losses: BTreeMap<String, u32>,
    pub defensive_losses: BTreeMap<String, u32>,
    pub shield_loss: BTreeMap<String, u32>,
    pub result: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated outcome information returned from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatRoundOutcome {
    pub round_number: u32,
    pub hits: BTreeMap<String, u32>,
    pub offensive_losses: BTreeMap<String, u32>,
    pub defensive_losses: BTreeMap<String, u32>,
    pub shield_loss: BTreeMap<String, u32>,
    pub fighters_remaining: BTreeMap<String, u32>,
    pub shields_remaining: BTreeMap<String, u32>,
    pub flee_results: BTreeMap<String, bool>,
    pub end_state: Option<String>,
    pub effective_actions: BTreeMap<String, RoundAction>,
}

// RoundAction carries a submission timestamp that differs between otherwise
// identical actions; outcome equality compares everything except those.
impl PartialEq for RoundAction {
    fn eq(&self, other: &Self) -> bool {
        self.action == other.action
            && self.commit == other.commit
            && self.timed_out == other.timed_out
            && self.target_id == other.target_id
            && self.destination_sector == other.destination_sector
    }
}

/// Where a garrison participant in an encounter came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarrisonSource {
    pub owner_id: String,
    pub mode: GarrisonMode,
    #[serde(default)]
    pub toll_amount: i64,
}

/// Per-garrison toll ledger entry kept in the encounter context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TollStatus {
    pub owner_id: String,
    pub toll_amount: i64,
    #[serde(default)]
    pub toll_balance: i64,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub paid_round: Option<u32>,
    pub demand_round: u32,
}

/// Opaque-to-the-engine context that higher layers attach to an encounter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncounterContext {
    /// Character that initiated the encounter (round 1 payload only).
    #[serde(default)]
    pub initiator: Option<String>,
    /// Garrison deployments folded into this encounter.
    #[serde(default)]
    pub garrison_sources: Vec<GarrisonSource>,
    /// Toll ledger keyed by garrison combatant id.
    #[serde(default)]
    pub toll_registry: BTreeMap<String, TollStatus>,
}

/// An active combat between two or more combatants in one sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatEncounter {
    pub combat_id: String,
    pub sector_id: i64,
    pub participants: BTreeMap<String, CombatantState>,
    pub round_number: u32,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub base_seed: Option<u64>,
    #[serde(default)]
    pub logs: Vec<CombatRoundLog>,
    #[serde(default)]
    pub pending_actions: BTreeMap<String, RoundAction>,
    #[serde(default)]
    pub ended: bool,
    #[serde(default)]
    pub end_state: Option<String>,
    #[serde(default)]
    pub context: EncounterContext,
}

impl CombatEncounter {
    /// Create an encounter in its initial round with no pending actions.
    pub fn new(
        combat_id: impl Into<String>,
        sector_id: i64,
        participants: BTreeMap<String, CombatantState>,
    ) -> Self {
        Self {
            combat_id: combat_id.into(),
            sector_id,
            participants,
            round_number: 1,
            deadline: None,
            base_seed: None,
            logs: Vec::new(),
            pending_actions: BTreeMap::new(),
            ended: false,
            end_state: None,
            context: EncounterContext::default(),
        }
    }

    /// First participant that is not `combatant_id`, if any.
    pub fn other_combatant(&self, combatant_id: &str) -> Option<&CombatantState> {
        self.participants
            .iter()
            .find(|(cid, _)| cid.as_str() != combatant_id)
            .map(|(_, state)| state)
    }
}

/// Persisted representation of fighters stationed in a sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarrisonState {
    pub owner_id: String,
    pub fighters: u32,
    pub mode: GarrisonMode,
    #[serde(default)]
    pub toll_amount: i64,
    pub deployed_at: String,
}

impl GarrisonState {
    /// New garrison record stamped with the current time.
    pub fn new(owner_id: impl Into<String>, fighters: u32, mode: GarrisonMode, toll_amount: i64) -> Self {
        Self {
            owner_id: owner_id.into(),
            fighters,
            mode,
            toll_amount,
            deployed_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Combatant id used for a garrison folded into an encounter.
pub fn garrison_combatant_id(sector_id: i64, owner_id: &str) -> String {
    format!("garrison:{}:{}", sector_id, owner_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        assert_eq!(
            CombatantAction::parse("ATTACK").unwrap(),
            CombatantAction::Attack
        );
        assert_eq!(CombatantAction::Attack.as_str(), "attack");
        assert!(CombatantAction::parse("charge").is_err());
    }

    #[test]
    fn test_mitigation_clamps_at_half() {
        let mut state = CombatantState {
            combatant_id: "a".into(),
            kind: CombatantKind::Character,
            name: "a".into(),
            fighters: 10,
            shields: 200,
            turns_per_warp: 3,
            max_fighters: 10,
            max_shields: 2000,
            is_escape_pod: false,
            owner_character_id: None,
        };
        assert!((state.mitigation() - 0.1).abs() < 1e-9);
        state.shields = 5000;
        assert!((state.mitigation() - 0.5).abs() < 1e-9);
        state.shields = 0;
        assert_eq!(state.mitigation(), 0.0);
    }

    #[test]
    fn test_garrison_mode_parse_rejects_unknown() {
        assert_eq!(GarrisonMode::parse("Toll").unwrap(), GarrisonMode::Toll);
        assert!(GarrisonMode::parse("aggressive").is_err());
    }

    #[test]
    fn test_garrison_combatant_id_format() {
        assert_eq!(garrison_combatant_id(12, "zara"), "garrison:12:zara");
    }
}
