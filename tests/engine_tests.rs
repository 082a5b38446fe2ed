use std::collections::BTreeMap;

use voidlane::combat::engine::{resolve_round, seed_from_combat_id};
use voidlane::combat::models::{
    CombatEncounter, CombatantAction, CombatantKind, CombatantState, RoundAction,
};

fn combatant(id: &str, fighters: u32, shields: u32, turns_per_warp: i32) -> CombatantState {
    CombatantState {
        combatant_id: id.to_string(),
        kind: CombatantKind::Character,
        name: id.to_string(),
        fighters,
        shields,
        turns_per_warp,
        max_fighters: fighters.max(1),
        max_shields: shields.max(1),
        is_escape_pod: false,
        owner_character_id: Some(id.to_string()),
    }
}

fn encounter_with(participants: Vec<CombatantState>, seed: u64) -> CombatEncounter {
    let map: BTreeMap<String, CombatantState> = participants
        .into_iter()
        .map(|p| (p.combatant_id.clone(), p))
        .collect();
    let mut encounter = CombatEncounter::new("test-combat", 7, map);
    encounter.base_seed = Some(seed);
    encounter
}

#[test]
fn two_attacker_duel_is_deterministic_and_terminal() {
    // Two evenly matched ships committing everything resolve to a terminal
    // state, and replaying the identical inputs yields an identical outcome.
    let encounter = encounter_with(
        vec![combatant("alpha", 10, 0, 3), combatant("beta", 10, 0, 3)],
        1,
    );
    let mut actions = BTreeMap::new();
    actions.insert("alpha".to_string(), RoundAction::attack(10, "beta"));
    actions.insert("beta".to_string(), RoundAction::attack(10, "alpha"));

    let first = resolve_round(&encounter, &actions);
    let second = resolve_round(&encounter, &actions);
    assert_eq!(first, second);

    let end_state = first.end_state.as_deref().expect("terminal state");
    assert!(
        end_state == "alpha_defeated"
            || end_state == "beta_defeated"
            || end_state == "mutual_defeat",
        "unexpected end state {}",
        end_state
    );
}

#[test]
fn fighters_are_conserved_and_bounded() {
    for seed in 0..50 {
        let encounter = encounter_with(
            vec![combatant("alpha", 12, 40, 3), combatant("beta", 9, 0, 5)],
            seed,
        );
        let mut actions = BTreeMap::new();
        actions.insert("alpha".to_string(), RoundAction::attack(12, "beta"));
        actions.insert("beta".to_string(), RoundAction::attack(9, "alpha"));
        let outcome = resolve_round(&encounter, &actions);

        for (pid, start) in [("alpha", 12u32), ("beta", 9u32)] {
            let remaining = outcome.fighters_remaining[pid];
            assert!(remaining <= start);
            assert_eq!(
                remaining + outcome.offensive_losses[pid] + outcome.defensive_losses[pid],
                start,
                "seed {} participant {}",
                seed,
                pid
            );
            assert!(outcome.shields_remaining[pid] <= encounter.participants[pid].shields);
        }
    }
}

#[test]
fn defender_with_low_agility_opponent_can_flee() {
    // Flee chance here clamps to the 0.2 floor; some seed in a small range
    // must still roll under it, and that round records no losses.
    let attacker = combatant("alpha", 10, 0, 5);
    let defender = combatant("beta", 10, 0, 10);

    let mut fled_seed = None;
    for seed in 0..400 {
        let encounter = encounter_with(vec![attacker.clone(), defender.clone()], seed);
        let mut actions = BTreeMap::new();
        actions.insert("alpha".to_string(), RoundAction::attack(5, "beta"));
        actions.insert("beta".to_string(), RoundAction::flee(Some(7)));
        let outcome = resolve_round(&encounter, &actions);
        if outcome.flee_results["beta"] {
            fled_seed = Some((seed, outcome));
            break;
        }
    }

    let (_, outcome) = fled_seed.expect("some seed under the 0.2 floor");
    // The fleer leaves the active set; the attacker still spends its commit
    // against nobody, so volleys stop immediately.
    assert!(outcome.flee_results["beta"]);
    assert_eq!(outcome.defensive_losses["beta"], 0);
    assert_eq!(outcome.fighters_remaining["beta"], 10);
}

#[test]
fn flee_with_no_pressing_attacker_ends_round_as_fled() {
    let mut fled = None;
    for seed in 0..400 {
        let encounter = encounter_with(
            vec![combatant("alpha", 10, 0, 5), combatant("beta", 10, 0, 10)],
            seed,
        );
        let mut actions = BTreeMap::new();
        actions.insert("alpha".to_string(), RoundAction::brace());
        actions.insert("beta".to_string(), RoundAction::flee(Some(7)));
        let outcome = resolve_round(&encounter, &actions);
        if outcome.flee_results["beta"] {
            fled = Some(outcome);
            break;
        }
    }
    let outcome = fled.expect("flee succeeded for some seed");
    assert_eq!(outcome.end_state.as_deref(), Some("beta_fled"));
    assert_eq!(outcome.offensive_losses["alpha"], 0);
    assert_eq!(outcome.defensive_losses["beta"], 0);
    assert_eq!(outcome.effective_actions["beta"].destination_sector, Some(7));
}

#[test]
fn all_brace_round_is_a_stalemate() {
    let encounter = encounter_with(
        vec![combatant("alpha", 10, 0, 3), combatant("beta", 10, 0, 3)],
        4,
    );
    let mut actions = BTreeMap::new();
    actions.insert("alpha".to_string(), RoundAction::brace());
    actions.insert("beta".to_string(), RoundAction::brace());
    let outcome = resolve_round(&encounter, &actions);
    assert_eq!(outcome.end_state.as_deref(), Some("stalemate"));
    assert_eq!(outcome.fighters_remaining["alpha"], 10);
    assert_eq!(outcome.fighters_remaining["beta"], 10);
}

#[test]
fn lopsided_attack_defeats_the_defender() {
    // 500 committed fighters against a single defender: the defender cannot
    // survive for any seed.
    let encounter = encounter_with(
        vec![combatant("alpha", 500, 0, 3), combatant("beta", 1, 0, 3)],
        99,
    );
    let mut actions = BTreeMap::new();
    actions.insert("alpha".to_string(), RoundAction::attack(500, "beta"));
    actions.insert("beta".to_string(), RoundAction::brace());
    let outcome = resolve_round(&encounter, &actions);
    assert_eq!(outcome.end_state.as_deref(), Some("beta_defeated"));
    assert_eq!(outcome.fighters_remaining["beta"], 0);
}

#[test]
fn invalid_attack_is_normalized_to_brace() {
    let encounter = encounter_with(
        vec![combatant("alpha", 10, 400, 3), combatant("beta", 10, 0, 3)],
        2,
    );
    // Zero commit, missing target, self target, and unknown target all
    // become braces with the brace mitigation bonus.
    for bad_action in [
        RoundAction::attack(0, "beta"),
        RoundAction {
            target_id: None,
            ..RoundAction::attack(5, "beta")
        },
        RoundAction::attack(5, "alpha"),
        RoundAction::attack(5, "ghost"),
    ] {
        let mut actions = BTreeMap::new();
        actions.insert("alpha".to_string(), bad_action);
        actions.insert("beta".to_string(), RoundAction::brace());
        let outcome = resolve_round(&encounter, &actions);
        let effective = &outcome.effective_actions["alpha"];
        assert_eq!(effective.action, CombatantAction::Brace);
        assert_eq!(effective.commit, 0);
        assert!(effective.target_id.is_none());
    }
}

#[test]
fn shield_ablation_rounds_up_and_brace_discounts() {
    // Find a seed where the braced defender takes losses, then check the
    // ceil(0.5 × losses) × 0.8 ablation arithmetic.
    for seed in 0..100 {
        let encounter = encounter_with(
            vec![combatant("alpha", 20, 0, 3), combatant("beta", 20, 100, 3)],
            seed,
        );
        let mut actions = BTreeMap::new();
        actions.insert("alpha".to_string(), RoundAction::attack(20, "beta"));
        actions.insert("beta".to_string(), RoundAction::brace());
        let outcome = resolve_round(&encounter, &actions);
        let losses = outcome.defensive_losses["beta"];
        if losses == 0 {
            continue;
        }
        let base = ((f64::from(losses)) * 0.5).ceil();
        let expected = (base * 0.8).ceil() as u32;
        assert_eq!(outcome.shield_loss["beta"], expected, "seed {}", seed);
        assert_eq!(outcome.shields_remaining["beta"], 100 - expected.min(100));
        return;
    }
    panic!("no seed produced defensive losses");
}

#[test]
fn seed_derivation_is_stable_across_calls() {
    let a = seed_from_combat_id("combat-42");
    let b = seed_from_combat_id("combat-42");
    let c = seed_from_combat_id("combat-43");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn different_rounds_draw_different_randomness() {
    let base = encounter_with(
        vec![combatant("alpha", 30, 0, 3), combatant("beta", 30, 0, 3)],
        7,
    );
    let mut actions = BTreeMap::new();
    actions.insert("alpha".to_string(), RoundAction::attack(30, "beta"));
    actions.insert("beta".to_string(), RoundAction::attack(30, "alpha"));

    let round_one = resolve_round(&base, &actions);
    let mut later = base.clone();
    later.round_number = 2;
    let round_two = resolve_round(&later, &actions);
    // Same seed, different round: the volley outcomes should diverge for at
    // least one tracked quantity.
    assert!(
        round_one.hits != round_two.hits
            || round_one.offensive_losses != round_two.offensive_losses,
        "rounds 1 and 2 produced identical volleys"
    );
}
