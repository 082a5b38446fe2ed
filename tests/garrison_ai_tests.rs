use std::collections::{BTreeMap, HashMap};

use voidlane::combat::garrison_ai::{garrison_commit, plan_garrison_actions};
use voidlane::combat::models::{
    garrison_combatant_id, CombatEncounter, CombatantAction, CombatantKind, CombatantState,
    GarrisonMode, GarrisonSource, TollStatus,
};

fn character(id: &str, owner: &str, fighters: u32) -> CombatantState {
    CombatantState {
        combatant_id: id.to_string(),
        kind: CombatantKind::Character,
        name: id.to_string(),
        fighters,
        shields: 10,
        turns_per_warp: 3,
        max_fighters: fighters.max(1),
        max_shields: 10,
        is_escape_pod: false,
        owner_character_id: Some(owner.to_string()),
    }
}

fn garrison(sector: i64, owner: &str, fighters: u32) -> CombatantState {
    CombatantState {
        combatant_id: garrison_combatant_id(sector, owner),
        kind: CombatantKind::Garrison,
        name: format!("Garrison ({})", owner),
        fighters,
        shields: 0,
        turns_per_warp: 0,
        max_fighters: fighters.max(1),
        max_shields: 0,
        is_escape_pod: false,
        owner_character_id: Some(owner.to_string()),
    }
}

fn encounter(participants: Vec<CombatantState>, sources: Vec<GarrisonSource>) -> CombatEncounter {
    let map: BTreeMap<String, CombatantState> = participants
        .into_iter()
        .map(|p| (p.combatant_id.clone(), p))
        .collect();
    let mut enc = CombatEncounter::new("combat1", 3, map);
    enc.context.garrison_sources = sources;
    enc
}

fn source(owner: &str, mode: GarrisonMode, toll_amount: i64) -> GarrisonSource {
    GarrisonSource {
        owner_id: owner.to_string(),
        mode,
        toll_amount,
    }
}

#[test]
fn commit_sizing_by_mode() {
    // Offensive: max(1, min(fighters, max(50, fighters / 2)))
    assert_eq!(garrison_commit(GarrisonMode::Offensive, 0), 0);
    assert_eq!(garrison_commit(GarrisonMode::Offensive, 1), 1);
    assert_eq!(garrison_commit(GarrisonMode::Offensive, 50), 50);
    assert_eq!(garrison_commit(GarrisonMode::Offensive, 100), 50);
    assert_eq!(garrison_commit(GarrisonMode::Offensive, 200), 100);
    assert_eq!(garrison_commit(GarrisonMode::Offensive, 300), 150);

    // Defensive: max(1, min(fighters, max(25, fighters / 4)))
    assert_eq!(garrison_commit(GarrisonMode::Defensive, 0), 0);
    assert_eq!(garrison_commit(GarrisonMode::Defensive, 1), 1);
    assert_eq!(garrison_commit(GarrisonMode::Defensive, 25), 25);
    assert_eq!(garrison_commit(GarrisonMode::Defensive, 50), 25);
    assert_eq!(garrison_commit(GarrisonMode::Defensive, 100), 25);
    assert_eq!(garrison_commit(GarrisonMode::Defensive, 200), 50);
    assert_eq!(garrison_commit(GarrisonMode::Defensive, 400), 100);

    // Toll: max(1, min(fighters, max(50, fighters / 3)))
    assert_eq!(garrison_commit(GarrisonMode::Toll, 0), 0);
    assert_eq!(garrison_commit(GarrisonMode::Toll, 1), 1);
    assert_eq!(garrison_commit(GarrisonMode::Toll, 50), 50);
    assert_eq!(garrison_commit(GarrisonMode::Toll, 100), 50);
    assert_eq!(garrison_commit(GarrisonMode::Toll, 150), 50);
    assert_eq!(garrison_commit(GarrisonMode::Toll, 200), 66);
    assert_eq!(garrison_commit(GarrisonMode::Toll, 300), 100);
}

#[test]
fn offensive_garrison_attacks_strongest_enemy() {
    let enc = encounter(
        vec![
            garrison(3, "owner1", 100),
            character("char1", "player1", 50),
            character("char2", "player2", 150),
        ],
        vec![source("owner1", GarrisonMode::Offensive, 0)],
    );
    let orders = plan_garrison_actions(&enc, None);
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.combatant_id, garrison_combatant_id(3, "owner1"));
    assert_eq!(order.action, CombatantAction::Attack);
    assert_eq!(order.commit, 50);
    assert_eq!(order.target_id.as_deref(), Some("char2"));
}

#[test]
fn defensive_garrison_commits_less() {
    let enc = encounter(
        vec![
            garrison(3, "owner1", 100),
            character("char1", "player1", 100),
        ],
        vec![source("owner1", GarrisonMode::Defensive, 0)],
    );
    let orders = plan_garrison_actions(&enc, None);
    assert_eq!(orders[0].commit, 25);
}

#[test]
fn garrison_stands_down_against_own_characters() {
    let enc = encounter(
        vec![
            garrison(3, "owner1", 100),
            character("char1", "owner1", 100),
        ],
        vec![source("owner1", GarrisonMode::Offensive, 0)],
    );
    let orders = plan_garrison_actions(&enc, None);
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].action, CombatantAction::Brace);
    assert_eq!(orders[0].commit, 0);
    assert!(orders[0].target_id.is_none());
}

#[test]
fn garrison_skips_corporation_allies_when_map_given() {
    let enc = encounter(
        vec![
            garrison(3, "owner1", 120),
            character("char1", "ally1", 200),
            character("char2", "enemy1", 80),
        ],
        vec![source("owner1", GarrisonMode::Offensive, 0)],
    );
    let mut corporations = HashMap::new();
    corporations.insert("owner1".to_string(), "corp-alpha".to_string());
    corporations.insert("ally1".to_string(), "corp-alpha".to_string());
    corporations.insert("enemy1".to_string(), "corp-beta".to_string());

    let orders = plan_garrison_actions(&enc, Some(&corporations));
    assert_eq!(orders.len(), 1);
    // The corp ally is the stronger ship but is filtered out.
    assert_eq!(orders[0].target_id.as_deref(), Some("char2"));

    // Without the map, allies are indistinguishable from enemies.
    let orders = plan_garrison_actions(&enc, None);
    assert_eq!(orders[0].target_id.as_deref(), Some("char1"));
}

#[test]
fn garrison_with_only_corp_allies_stands_down() {
    let enc = encounter(
        vec![garrison(3, "owner1", 90), character("char1", "ally1", 75)],
        vec![source("owner1", GarrisonMode::Offensive, 0)],
    );
    let mut corporations = HashMap::new();
    corporations.insert("owner1".to_string(), "corp-gamma".to_string());
    corporations.insert("ally1".to_string(), "corp-gamma".to_string());

    let orders = plan_garrison_actions(&enc, Some(&corporations));
    assert_eq!(orders[0].action, CombatantAction::Brace);
}

#[test]
fn toll_garrison_braces_on_demand_round() {
    let mut enc = encounter(
        vec![
            garrison(3, "owner1", 100),
            character("char1", "player1", 100),
        ],
        vec![source("owner1", GarrisonMode::Toll, 100)],
    );
    enc.round_number = 1;
    enc.context.toll_registry.insert(
        garrison_combatant_id(3, "owner1"),
        TollStatus {
            owner_id: "owner1".to_string(),
            toll_amount: 100,
            toll_balance: 0,
            target_id: Some("char1".to_string()),
            paid: false,
            paid_round: None,
            demand_round: 1,
        },
    );

    let orders = plan_garrison_actions(&enc, None);
    assert_eq!(orders[0].action, CombatantAction::Brace);
    assert_eq!(orders[0].commit, 0);
}

#[test]
fn toll_garrison_attacks_with_full_force_when_unpaid() {
    let mut enc = encounter(
        vec![
            garrison(3, "owner1", 100),
            character("char1", "player1", 100),
        ],
        vec![source("owner1", GarrisonMode::Toll, 100)],
    );
    enc.round_number = 2;
    enc.context.toll_registry.insert(
        garrison_combatant_id(3, "owner1"),
        TollStatus {
            owner_id: "owner1".to_string(),
            toll_amount: 100,
            toll_balance: 0,
            target_id: Some("char1".to_string()),
            paid: false,
            paid_round: None,
            demand_round: 1,
        },
    );

    let orders = plan_garrison_actions(&enc, None);
    assert_eq!(orders[0].action, CombatantAction::Attack);
    assert_eq!(orders[0].commit, 100);
    assert_eq!(orders[0].target_id.as_deref(), Some("char1"));
}

#[test]
fn toll_garrison_stands_down_when_paid() {
    let mut enc = encounter(
        vec![
            garrison(3, "owner1", 100),
            character("char1", "player1", 100),
        ],
        vec![source("owner1", GarrisonMode::Toll, 100)],
    );
    enc.round_number = 2;
    enc.context.toll_registry.insert(
        garrison_combatant_id(3, "owner1"),
        TollStatus {
            owner_id: "owner1".to_string(),
            toll_amount: 100,
            toll_balance: 100,
            target_id: Some("char1".to_string()),
            paid: true,
            paid_round: Some(1),
            demand_round: 1,
        },
    );

    let orders = plan_garrison_actions(&enc, None);
    assert_eq!(orders[0].action, CombatantAction::Brace);
}

#[test]
fn garrison_with_zero_fighters_submits_nothing() {
    let enc = encounter(
        vec![garrison(3, "owner1", 0), character("char1", "player1", 50)],
        vec![source("owner1", GarrisonMode::Offensive, 0)],
    );
    let orders = plan_garrison_actions(&enc, None);
    assert!(orders.is_empty());
}

#[test]
fn unknown_garrison_source_defaults_to_offensive() {
    // No matching garrison_sources entry: the garrison still fights, using
    // the offensive commit curve.
    let enc = encounter(
        vec![
            garrison(3, "owner1", 200),
            character("char1", "player1", 10),
        ],
        vec![],
    );
    let orders = plan_garrison_actions(&enc, None);
    assert_eq!(orders[0].action, CombatantAction::Attack);
    assert_eq!(orders[0].commit, 100);
}
