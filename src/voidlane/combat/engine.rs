//! Combat round resolution logic.
//!
//! [`resolve_round`] is a pure function: given an encounter snapshot and the
//! submitted actions it produces a [`CombatRoundOutcome`] without touching
//! I/O, the clock, or any global RNG. All randomness is drawn from a
//! [`ChaCha8Rng`] seeded from `(base_seed, round_number)`, so identical
//! inputs resolve identically across processes.

use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::models::{
    CombatEncounter, CombatRoundOutcome, CombatantAction, CombatantState, RoundAction,
};

const BASE_HIT: f64 = 0.5;
const MIN_HIT: f64 = 0.15;
const MAX_HIT: f64 = 0.85;
const MITIGATE_HIT_FACTOR: f64 = 0.6;
const ATTACK_BONUS_FACTOR: f64 = 0.1;
const SHIELD_ABLATION_FACTOR: f64 = 0.5;
const FLEE_MIN: f64 = 0.2;
const FLEE_MAX: f64 = 0.9;

/// Stable 64-bit FNV-1a hash used to derive an encounter's base seed from
/// its combat id.
pub fn seed_from_combat_id(combat_id: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in combat_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn round_rng(base_seed: u64, round_number: u32) -> ChaCha8Rng {
    let mixed = base_seed ^ u64::from(round_number).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    ChaCha8Rng::seed_from_u64(mixed)
}

/// Mitigation applied to incoming volleys; BRACE boosts it by 20%, still
/// capped at 0.5.
pub fn shield_mitigation(state: &CombatantState, action: CombatantAction) -> f64 {
    let mut mitigation = state.mitigation();
    if action == CombatantAction::Brace {
        mitigation = (mitigation * 1.2).clamp(0.0, 0.5);
    }
    mitigation
}

/// Chance that `fleer` escapes `defender` this round.
pub fn flee_success_chance(fleer: &CombatantState, defender: &CombatantState) -> f64 {
    let base = 0.5 + 0.1 * f64::from(defender.turns_per_warp - fleer.turns_per_warp);
    base.clamp(FLEE_MIN, FLEE_MAX)
}

/// Resolve a combat round for the supplied encounter.
///
/// Participants missing from `actions` default to a timed-out BRACE. The
/// encounter itself is never mutated; the caller applies the outcome.
pub fn resolve_round(
    encounter: &CombatEncounter,
    actions: &BTreeMap<String, RoundAction>,
) -> CombatRoundOutcome {
    let participant_ids: Vec<String> = encounter.participants.keys().cloned().collect();
    let mut rng = round_rng(encounter.base_seed.unwrap_or(0), encounter.round_number);

    // Normalize submissions: invalid attacks become braces, commits are
    // clamped to the attacker's current fighter count.
    let mut effective_actions: BTreeMap<String, RoundAction> = BTreeMap::new();
    let mut commits: BTreeMap<String, u32> = BTreeMap::new();
    let mut mitigations: BTreeMap<String, f64> = BTreeMap::new();
    for pid in &participant_ids {
        let state = &encounter.participants[pid];
        let submitted = actions
            .get(pid)
            .cloned()
            .unwrap_or_else(RoundAction::timed_out_brace);

        let mut action = submitted.action;
        let mut target_id = submitted.target_id.clone().filter(|t| !t.is_empty());
        let mut commit = if action == CombatantAction::Attack {
            submitted.commit.min(state.fighters)
        } else {
            0
        };
        if action == CombatantAction::Attack {
            let target_valid = target_id
                .as_deref()
                .map(|t| t != pid.as_str() && encounter.participants.contains_key(t))
                .unwrap_or(false);
            if commit == 0 || !target_valid {
                action = CombatantAction::Brace;
                commit = 0;
                target_id = None;
            }
        }

        let effective = RoundAction {
            action,
            commit,
            submitted_at: submitted.submitted_at,
            timed_out: submitted.timed_out,
            target_id,
            destination_sector: if action == CombatantAction::Flee {
                submitted.destination_sector
            } else {
                None
            },
        };
        commits.insert(pid.clone(), effective.commit);
        mitigations.insert(pid.clone(), shield_mitigation(state, action));
        effective_actions.insert(pid.clone(), effective);
    }

    let fighters_start: BTreeMap<String, u32> = participant_ids
        .iter()
        .map(|pid| (pid.clone(), encounter.participants[pid].fighters))
        .collect();
    let shields_start: BTreeMap<String, u32> = participant_ids
        .iter()
        .map(|pid| (pid.clone(), encounter.participants[pid].shields))
        .collect();
    let mut flee_results: BTreeMap<String, bool> =
        participant_ids.iter().map(|pid| (pid.clone(), false)).collect();

    let mut active_ids: BTreeSet<String> = participant_ids.iter().cloned().collect();

    // Flee phase, ascending participant id. Each fleer rolls once against
    // the largest remaining opponent.
    let mut successful_fleers: Vec<String> = Vec::new();
    for pid in &participant_ids {
        if !active_ids.contains(pid) {
            continue;
        }
        if effective_actions[pid].action != CombatantAction::Flee {
            continue;
        }
        let opponent = pick_flee_opponent(encounter, &active_ids, pid);
        match opponent {
            None => {
                flee_results.insert(pid.clone(), true);
                active_ids.remove(pid);
            }
            Some(opponent_state) => {
                let chance = flee_success_chance(&encounter.participants[pid], opponent_state);
                let roll: f64 = rng.random();
                let success = roll < chance;
                flee_results.insert(pid.clone(), success);
                if success {
                    active_ids.remove(pid);
                    successful_fleers.push(pid.clone());
                }
            }
        }
    }

    let remaining_attackers: Vec<String> = active_ids
        .iter()
        .filter(|pid| {
            effective_actions[*pid].action == CombatantAction::Attack && commits[*pid] > 0
        })
        .cloned()
        .collect();

    // A successful escape with nobody pressing the attack ends the round
    // immediately without losses.
    if !successful_fleers.is_empty() && remaining_attackers.is_empty() {
        let zeros: BTreeMap<String, u32> =
            participant_ids.iter().map(|pid| (pid.clone(), 0)).collect();
        return CombatRoundOutcome {
            round_number: encounter.round_number,
            hits: zeros.clone(),
            offensive_losses: zeros.clone(),
            defensive_losses: zeros.clone(),
            shield_loss: zeros,
            fighters_remaining: fighters_start,
            shields_remaining: shields_start,
            flee_results,
            end_state: Some(format!("{}_fled", successful_fleers[0])),
            effective_actions,
        };
    }

    let mut hits: BTreeMap<String, u32> =
        participant_ids.iter().map(|pid| (pid.clone(), 0)).collect();
    let mut offensive_losses = hits.clone();
    let mut defensive_losses = hits.clone();

    if remaining_attackers.is_empty() {
        let all_bracing = active_ids
            .iter()
            .all(|pid| effective_actions[pid].action != CombatantAction::Attack);
        if all_bracing {
            let zeros: BTreeMap<String, u32> =
                participant_ids.iter().map(|pid| (pid.clone(), 0)).collect();
            return CombatRoundOutcome {
                round_number: encounter.round_number,
                hits: zeros.clone(),
                offensive_losses: zeros.clone(),
                defensive_losses: zeros.clone(),
                shield_loss: zeros,
                fighters_remaining: fighters_start,
                shields_remaining: shields_start,
                flee_results,
                end_state: Some("stalemate".to_string()),
                effective_actions,
            };
        }
    }

    let mut current_fighters = fighters_start.clone();

    // Attackers interleave volleys in ascending (fighters, agility, id)
    // order, each expending one committed fighter per pass.
    let mut attack_order = remaining_attackers;
    attack_order.sort_by(|a, b| {
        let sa = &encounter.participants[a];
        let sb = &encounter.participants[b];
        (sa.fighters, sa.turns_per_warp, a.as_str()).cmp(&(sb.fighters, sb.turns_per_warp, b.as_str()))
    });
    let mut remaining_commits: BTreeMap<String, u32> = attack_order
        .iter()
        .map(|pid| (pid.clone(), commits[pid]))
        .collect();

    while remaining_commits.values().any(|v| *v > 0) {
        let mut progressed = false;
        for pid in &attack_order {
            if remaining_commits[pid] == 0 {
                continue;
            }
            if !active_ids.contains(pid) || current_fighters.get(pid).copied().unwrap_or(0) == 0 {
                remaining_commits.insert(pid.clone(), 0);
                continue;
            }
            let target_id = match effective_actions[pid].target_id.clone() {
                Some(t) if active_ids.contains(&t) => t,
                _ => {
                    remaining_commits.insert(pid.clone(), 0);
                    continue;
                }
            };
            if current_fighters.get(&target_id).copied().unwrap_or(0) == 0 {
                remaining_commits.insert(pid.clone(), 0);
                continue;
            }

            if let Some(commit) = remaining_commits.get_mut(pid) {
                *commit -= 1;
            }
            progressed = true;

            let p_hit = (BASE_HIT - mitigations[&target_id] * MITIGATE_HIT_FACTOR
                + mitigations[pid] * ATTACK_BONUS_FACTOR)
                .clamp(MIN_HIT, MAX_HIT);
            let roll: f64 = rng.random();
            if roll < p_hit {
                *hits.entry(pid.clone()).or_insert(0) += 1;
                *defensive_losses.entry(target_id.clone()).or_insert(0) += 1;
                let fighters = current_fighters.entry(target_id.clone()).or_insert(0);
                *fighters = fighters.saturating_sub(1);
            } else {
                *offensive_losses.entry(pid.clone()).or_insert(0) += 1;
                let fighters = current_fighters.entry(pid.clone()).or_insert(0);
                *fighters = fighters.saturating_sub(1);
            }
        }
        if !progressed {
            break;
        }
    }

    let mut shield_loss: BTreeMap<String, u32> = BTreeMap::new();
    let mut fighters_remaining: BTreeMap<String, u32> = BTreeMap::new();
    let mut shields_remaining: BTreeMap<String, u32> = BTreeMap::new();
    for pid in &participant_ids {
        let state = &encounter.participants[pid];
        let total_losses = offensive_losses[pid] + defensive_losses[pid];
        fighters_remaining.insert(pid.clone(), state.fighters.saturating_sub(total_losses));

        let mut loss = (f64::from(defensive_losses[pid]) * SHIELD_ABLATION_FACTOR).ceil();
        if effective_actions[pid].action == CombatantAction::Brace {
            loss = (loss * 0.8).ceil();
        }
        let loss = loss as u32;
        shield_loss.insert(pid.clone(), loss);
        shields_remaining.insert(pid.clone(), state.shields.saturating_sub(loss));
    }

    let end_state = classify_end_state(&participant_ids, &fighters_remaining, &flee_results);

    CombatRoundOutcome {
        round_number: encounter.round_number,
        hits,
        offensive_losses,
        defensive_losses,
        shield_loss,
        fighters_remaining,
        shields_remaining,
        flee_results,
        end_state,
        effective_actions,
    }
}

fn pick_flee_opponent<'a>(
    encounter: &'a CombatEncounter,
    active_ids: &BTreeSet<String>,
    fleer_id: &str,
) -> Option<&'a CombatantState> {
    let mut candidates: Vec<&CombatantState> = active_ids
        .iter()
        .filter(|oid| oid.as_str() != fleer_id)
        .map(|oid| &encounter.participants[oid])
        .collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| {
        b.fighters
            .cmp(&a.fighters)
            .then_with(|| a.combatant_id.cmp(&b.combatant_id))
    });
    Some(candidates[0])
}

fn classify_end_state(
    participant_ids: &[String],
    fighters_remaining: &BTreeMap<String, u32>,
    flee_results: &BTreeMap<String, bool>,
) -> Option<String> {
    let living_not_fled: Vec<&String> = participant_ids
        .iter()
        .filter(|pid| fighters_remaining[*pid] > 0 && !flee_results.get(*pid).copied().unwrap_or(false))
        .collect();

    if living_not_fled.is_empty() {
        let anyone_fled = flee_results.values().any(|fled| *fled);
        let anyone_alive = participant_ids
            .iter()
            .any(|pid| fighters_remaining[pid] > 0);
        if anyone_fled && anyone_alive {
            return Some("stalemate".to_string());
        }
        return Some("mutual_defeat".to_string());
    }

    if living_not_fled.len() == 1 {
        let survivor = living_not_fled[0];
        let losers: Vec<&String> = participant_ids
            .iter()
            .filter(|pid| {
                pid.as_str() != survivor.as_str()
                    && !flee_results.get(*pid).copied().unwrap_or(false)
                    && fighters_remaining[*pid] == 0
            })
            .collect();
        if !losers.is_empty() {
            if losers.len() == 1 {
                return Some(format!("{}_defeated", losers[0]));
            }
            return Some("victory".to_string());
        }
        let others_all_fled = participant_ids
            .iter()
            .filter(|pid| pid.as_str() != survivor.as_str())
            .all(|pid| flee_results.get(pid).copied().unwrap_or(false));
        if others_all_fled {
            return Some("stalemate".to_string());
        }
    }

    None
}

/// True when `end_state` terminates an encounter.
pub fn is_terminal_state(end_state: Option<&str>) -> bool {
    match end_state {
        None => false,
        Some(state) => {
            matches!(state, "mutual_defeat" | "stalemate" | "victory")
                || state.ends_with("_defeated")
                || state.ends_with("_fled")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voidlane::combat::models::CombatantKind;

    fn combatant(id: &str, fighters: u32, shields: u32, turns_per_warp: i32) -> CombatantState {
        CombatantState {
            combatant_id: id.to_string(),
            kind: CombatantKind::Character,
            name: id.to_string(),
            fighters,
            shields,
            turns_per_warp,
            max_fighters: fighters.max(1),
            max_shields: shields,
            is_escape_pod: false,
            owner_character_id: Some(id.to_string()),
        }
    }

    fn duel(fighters_a: u32, fighters_b: u32, seed: u64) -> CombatEncounter {
        let mut participants = BTreeMap::new();
        participants.insert("alpha".to_string(), combatant("alpha", fighters_a, 0, 3));
        participants.insert("beta".to_string(), combatant("beta", fighters_b, 0, 3));
        let mut encounter = CombatEncounter::new("duel", 7, participants);
        encounter.base_seed = Some(seed);
        encounter
    }

    #[test]
    fn test_seed_from_combat_id_is_stable() {
        assert_eq!(seed_from_combat_id("abc"), seed_from_combat_id("abc"));
        assert_ne!(seed_from_combat_id("abc"), seed_from_combat_id("abd"));
    }

    #[test]
    fn test_missing_actions_default_to_timed_out_brace() {
        let encounter = duel(10, 10, 1);
        let outcome = resolve_round(&encounter, &BTreeMap::new());
        assert_eq!(outcome.end_state.as_deref(), Some("stalemate"));
        for action in outcome.effective_actions.values() {
            assert_eq!(action.action, CombatantAction::Brace);
            assert!(action.timed_out);
        }
        assert_eq!(outcome.fighters_remaining["alpha"], 10);
    }

    #[test]
    fn test_attack_without_target_normalizes_to_brace() {
        let encounter = duel(10, 10, 1);
        let mut actions = BTreeMap::new();
        actions.insert(
            "alpha".to_string(),
            RoundAction {
                target_id: None,
                ..RoundAction::attack(5, "beta")
            },
        );
        let outcome = resolve_round(&encounter, &actions);
        assert_eq!(
            outcome.effective_actions["alpha"].action,
            CombatantAction::Brace
        );
        assert_eq!(outcome.effective_actions["alpha"].commit, 0);
    }

    #[test]
    fn test_self_target_normalizes_to_brace() {
        let encounter = duel(10, 10, 1);
        let mut actions = BTreeMap::new();
        actions.insert("alpha".to_string(), RoundAction::attack(5, "alpha"));
        let outcome = resolve_round(&encounter, &actions);
        assert_eq!(
            outcome.effective_actions["alpha"].action,
            CombatantAction::Brace
        );
    }

    #[test]
    fn test_commit_clamped_to_current_fighters() {
        let encounter = duel(3, 10, 1);
        let mut actions = BTreeMap::new();
        actions.insert("alpha".to_string(), RoundAction::attack(50, "beta"));
        actions.insert("beta".to_string(), RoundAction::brace());
        let outcome = resolve_round(&encounter, &actions);
        assert_eq!(outcome.effective_actions["alpha"].commit, 3);
    }

    #[test]
    fn test_conservation_of_fighters() {
        for seed in 0..20 {
            let encounter = duel(10, 10, seed);
            let mut actions = BTreeMap::new();
            actions.insert("alpha".to_string(), RoundAction::attack(10, "beta"));
            actions.insert("beta".to_string(), RoundAction::attack(10, "alpha"));
            let outcome = resolve_round(&encounter, &actions);
            for pid in ["alpha", "beta"] {
                assert_eq!(
                    outcome.fighters_remaining[pid]
                        + outcome.offensive_losses[pid]
                        + outcome.defensive_losses[pid],
                    10,
                    "seed {} participant {}",
                    seed,
                    pid
                );
            }
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let encounter = duel(10, 10, 1);
        let mut actions = BTreeMap::new();
        actions.insert("alpha".to_string(), RoundAction::attack(10, "beta"));
        actions.insert("beta".to_string(), RoundAction::attack(10, "alpha"));
        let first = resolve_round(&encounter, &actions);
        let second = resolve_round(&encounter, &actions);
        assert_eq!(first, second);
    }

    #[test]
    fn test_brace_boosts_mitigation() {
        let state = combatant("alpha", 10, 400, 3);
        let braced = shield_mitigation(&state, CombatantAction::Brace);
        let idle = shield_mitigation(&state, CombatantAction::Attack);
        assert!(braced > idle);
        assert!(braced <= 0.5);
    }

    #[test]
    fn test_flee_chance_clamped() {
        let slow = combatant("slow", 10, 0, 10);
        let fast = combatant("fast", 10, 0, 2);
        assert!((flee_success_chance(&slow, &fast) - FLEE_MIN).abs() < 1e-9);
        assert!((flee_success_chance(&fast, &slow) - FLEE_MAX).abs() < 1e-9);
    }

    #[test]
    fn test_is_terminal_state() {
        assert!(is_terminal_state(Some("stalemate")));
        assert!(is_terminal_state(Some("mutual_defeat")));
        assert!(is_terminal_state(Some("victory")));
        assert!(is_terminal_state(Some("beta_defeated")));
        assert!(is_terminal_state(Some("beta_fled")));
        assert!(!is_terminal_state(Some("in_progress")));
        assert!(!is_terminal_state(None));
    }
}
