//! Event payload builders for the combat subsystem.
//!
//! These produce the JSON bodies carried by `combat.round_waiting`,
//! `combat.round_resolved`, and `combat.ended` frames, plus the shared
//! encounter/log serializations the RPC layer reuses. The client-side
//! [`CombatSession`](crate::CombatSession) consumes these shapes.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Value};

use super::models::{
    CombatEncounter, CombatRoundLog, CombatRoundOutcome, CombatantKind, CombatantState,
    GarrisonState, RoundAction,
};
use super::salvage::SalvageContainer;

/// Per-combatant fighter/shield delta between two encounter snapshots.
pub fn compute_combatant_deltas(
    current: &CombatEncounter,
    previous: Option<&CombatEncounter>,
) -> BTreeMap<String, (i64, i64)> {
    let mut deltas = BTreeMap::new();
    for (pid, state) in &current.participants {
        let delta = previous
            .and_then(|prev| prev.participants.get(pid))
            .map(|prev| {
                (
                    i64::from(state.fighters) - i64::from(prev.fighters),
                    i64::from(state.shields) - i64::from(prev.shields),
                )
            })
            .unwrap_or((0, 0));
        deltas.insert(pid.clone(), delta);
    }
    deltas
}

/// Serialize a combatant with the fields UI surfaces display.
pub fn serialize_combatant(state: &CombatantState) -> Value {
    json!({
        "combatant_id": state.combatant_id,
        "type": state.kind.as_str(),
        "name": state.name,
        "fighters": state.fighters,
        "shields": state.shields,
        "max_fighters": state.max_fighters,
        "max_shields": state.max_shields,
        "turns_per_warp": state.turns_per_warp,
        "is_escape_pod": state.is_escape_pod,
        "owner": state.owner_character_id,
    })
}

/// Serialize an encounter snapshot (participants in dict form).
pub fn serialize_encounter(encounter: &CombatEncounter) -> Value {
    let participants: BTreeMap<&String, Value> = encounter
        .participants
        .iter()
        .map(|(pid, state)| (pid, serialize_combatant(state)))
        .collect();
    json!({
        "combat_id": encounter.combat_id,
        "sector": { "id": encounter.sector_id },
        "round": encounter.round_number,
        "deadline": encounter.deadline.map(|d| d.to_rfc3339()),
        "participants": participants,
    })
}

fn serialize_action(action: &RoundAction) -> Value {
    json!({
        "action": action.action.as_str(),
        "commit": action.commit,
        "timed_out": action.timed_out,
        "submitted_at": action.submitted_at.to_rfc3339(),
        "target": action.target_id,
        "destination_sector": action.destination_sector,
    })
}

/// Serialize a resolved-round log record.
pub fn serialize_log(log: &CombatRoundLog) -> Value {
    let actions: BTreeMap<&String, Value> = log
        .actions
        .iter()
        .map(|(pid, action)| (pid, serialize_action(action)))
        .collect();
    json!({
        "round": log.round_number,
        "actions": actions,
        "hits": log.hits,
        "offensive_losses": log.offensive_losses,
        "defensive_losses": log.defensive_losses,
        "shield_loss": log.shield_loss,
        "result": log.result,
        "timestamp": log.timestamp.to_rfc3339(),
    })
}

/// Serialize a garrison for event payloads (`garrison` object).
pub fn serialize_garrison_for_event(
    garrison_state: &CombatantState,
    actual_garrison: Option<&GarrisonState>,
    fighter_loss: u32,
) -> Value {
    let mut payload = json!({
        "owner_name": garrison_state.owner_character_id,
        "fighters": garrison_state.fighters,
        "fighter_loss": if fighter_loss > 0 { Some(fighter_loss) } else { None },
    });
    match actual_garrison {
        Some(actual) => {
            payload["mode"] = json!(actual.mode.as_str());
            payload["toll_amount"] = json!(actual.toll_amount);
            payload["deployed_at"] = json!(actual.deployed_at);
        }
        None => {
            payload["mode"] = json!("unknown");
            payload["deployed_at"] = json!(Utc::now().to_rfc3339());
        }
    }
    payload
}

fn split_participants(
    encounter: &CombatEncounter,
    garrisons: &[GarrisonState],
    deltas: Option<&BTreeMap<String, (i64, i64)>>,
    outcome: Option<&CombatRoundOutcome>,
) -> (Vec<Value>, Option<Value>) {
    let mut participants = Vec::new();
    let mut garrison_payload = None;
    for (pid, state) in &encounter.participants {
        let fighter_loss = outcome
            .map(|out| {
                out.offensive_losses.get(pid).copied().unwrap_or(0)
                    + out.defensive_losses.get(pid).copied().unwrap_or(0)
            })
            .unwrap_or(0);
        match state.kind {
            CombatantKind::Character => {
                let shield_integrity = if state.max_shields > 0 {
                    f64::from(state.shields) / f64::from(state.max_shields) * 100.0
                } else {
                    0.0
                };
                let shield_damage = deltas
                    .and_then(|d| d.get(pid))
                    .map(|(_, shields)| {
                        if state.max_shields > 0 {
                            (*shields as f64) / f64::from(state.max_shields) * 100.0
                        } else {
                            0.0
                        }
                    })
                    .unwrap_or(0.0);
                participants.push(json!({
                    "combatant_id": state.combatant_id,
                    "name": state.name,
                    "owner": state.owner_character_id,
                    "player_type": "character",
                    "fighters": state.fighters,
                    "shields": state.shields,
                    "max_fighters": state.max_fighters,
                    "max_shields": state.max_shields,
                    "turns_per_warp": state.turns_per_warp,
                    "ship": {
                        "shield_integrity": (shield_integrity * 10.0).round() / 10.0,
                        "shield_damage": if shield_damage != 0.0 {
                            Some((shield_damage * 10.0).round() / 10.0)
                        } else {
                            None
                        },
                        "fighter_loss": if fighter_loss > 0 { Some(fighter_loss) } else { None },
                    },
                }));
            }
            CombatantKind::Garrison => {
                let actual = state.owner_character_id.as_deref().and_then(|owner| {
                    garrisons.iter().find(|g| g.owner_id == owner)
                });
                garrison_payload = Some(serialize_garrison_for_event(state, actual, fighter_loss));
            }
        }
    }
    (participants, garrison_payload)
}

/// Build the `combat.round_waiting` payload.
pub fn round_waiting_payload(encounter: &CombatEncounter, garrisons: &[GarrisonState]) -> Value {
    let (participants, garrison) = split_participants(encounter, garrisons, None, None);
    let mut payload = json!({
        "combat_id": encounter.combat_id,
        "sector": { "id": encounter.sector_id },
        "round": encounter.round_number,
        "current_time": Utc::now().to_rfc3339(),
        "deadline": encounter.deadline.map(|d| d.to_rfc3339()),
        "participants": participants,
        "garrison": garrison,
    });
    if encounter.round_number == 1 {
        payload["initiator"] = json!(encounter.context.initiator);
    }
    payload
}

/// Shared body of resolved/ended payloads.
fn round_base_payload(
    encounter: &CombatEncounter,
    outcome: &CombatRoundOutcome,
    garrisons: &[GarrisonState],
    previous: Option<&CombatEncounter>,
) -> Value {
    let deltas = compute_combatant_deltas(encounter, previous);
    let (participants, garrison) =
        split_participants(encounter, garrisons, Some(&deltas), Some(outcome));
    let actions: BTreeMap<&String, Value> = outcome
        .effective_actions
        .iter()
        .map(|(pid, action)| (pid, serialize_action(action)))
        .collect();
    json!({
        "combat_id": encounter.combat_id,
        "sector": { "id": encounter.sector_id },
        "round": outcome.round_number,
        "hits": outcome.hits,
        "offensive_losses": outcome.offensive_losses,
        "defensive_losses": outcome.defensive_losses,
        "shield_loss": outcome.shield_loss,
        "flee_results": outcome.flee_results,
        "end": outcome.end_state,
        "result": outcome.end_state,
        "deadline": encounter.deadline.map(|d| d.to_rfc3339()),
        "participants": participants,
        "garrison": garrison,
        "actions": actions,
    })
}

/// Build the `combat.round_resolved` payload.
pub fn round_resolved_payload(
    encounter: &CombatEncounter,
    outcome: &CombatRoundOutcome,
    garrisons: &[GarrisonState],
    previous: Option<&CombatEncounter>,
) -> Value {
    round_base_payload(encounter, outcome, garrisons, previous)
}

/// Build the `combat.ended` payload with salvage and the textual round log.
pub fn combat_ended_payload(
    encounter: &CombatEncounter,
    outcome: &CombatRoundOutcome,
    garrisons: &[GarrisonState],
    salvage: &[SalvageContainer],
    logs: &[String],
) -> Value {
    let mut payload = round_base_payload(encounter, outcome, garrisons, None);
    payload["result"] = json!(encounter.end_state);
    payload["end"] = json!(encounter.end_state);
    payload["salvage"] = json!(salvage);
    payload["logs"] = json!(logs);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voidlane::combat::engine::resolve_round;
    use crate::voidlane::combat::models::{CombatEncounter, CombatantState, RoundAction};

    fn character(id: &str, fighters: u32, shields: u32) -> CombatantState {
        CombatantState {
            combatant_id: id.to_string(),
            kind: CombatantKind::Character,
            name: id.to_string(),
            fighters,
            shields,
            turns_per_warp: 3,
            max_fighters: fighters.max(1),
            max_shields: shields.max(1),
            is_escape_pod: false,
            owner_character_id: Some(id.to_string()),
        }
    }

    #[test]
    fn test_round_waiting_payload_shape() {
        let mut participants = BTreeMap::new();
        participants.insert("alpha".to_string(), character("alpha", 10, 100));
        let mut encounter = CombatEncounter::new("c1", 9, participants);
        encounter.context.initiator = Some("alpha".to_string());

        let payload = round_waiting_payload(&encounter, &[]);
        assert_eq!(payload["combat_id"], "c1");
        assert_eq!(payload["sector"]["id"], 9);
        assert_eq!(payload["round"], 1);
        assert_eq!(payload["initiator"], "alpha");
        assert!(payload["participants"].as_array().unwrap().len() == 1);
        assert!(payload["garrison"].is_null());
    }

    #[test]
    fn test_resolved_payload_carries_actions_and_losses() {
        let mut participants = BTreeMap::new();
        participants.insert("alpha".to_string(), character("alpha", 10, 0));
        participants.insert("beta".to_string(), character("beta", 10, 0));
        let mut encounter = CombatEncounter::new("c1", 9, participants);
        encounter.base_seed = Some(3);

        let mut actions = BTreeMap::new();
        actions.insert("alpha".to_string(), RoundAction::attack(5, "beta"));
        actions.insert("beta".to_string(), RoundAction::brace());
        let outcome = resolve_round(&encounter, &actions);

        let payload = round_resolved_payload(&encounter, &outcome, &[], None);
        assert_eq!(payload["round"], 1);
        assert_eq!(payload["actions"]["alpha"]["action"], "attack");
        assert!(payload["defensive_losses"].is_object());
    }
}
