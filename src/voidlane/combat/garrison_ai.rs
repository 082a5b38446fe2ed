//! Automatic action selection for garrison combatants.
//!
//! Garrisons never think; each round the server derives their action from
//! the deployment mode and the toll ledger, then submits it through the
//! [`CombatManager`] like any other participant. The planning half is pure
//! so it can be tested without a manager.

use std::collections::HashMap;

use log::debug;

use crate::voidlane::error::GameError;

use super::manager::CombatManager;
use super::models::{
    CombatEncounter, CombatantAction, CombatantKind, CombatantState, GarrisonMode,
};

/// A planned garrison submission for the current round.
#[derive(Debug, Clone, PartialEq)]
pub struct GarrisonOrder {
    pub combatant_id: String,
    pub action: CombatantAction,
    pub commit: u32,
    pub target_id: Option<String>,
}

/// Fighters a garrison commits per round, by mode.
///
/// Offensive garrisons throw half their strength (min 50), defensive ones a
/// quarter (min 25), toll enforcers a third (min 50), and always at least one
/// fighter while any remain.
pub fn garrison_commit(mode: GarrisonMode, fighters: u32) -> u32 {
    if fighters == 0 {
        return 0;
    }
    let floor = match mode {
        GarrisonMode::Offensive => 50.max(fighters / 2),
        GarrisonMode::Defensive => 25.max(fighters / 4),
        GarrisonMode::Toll => 50.max(fighters / 3),
    };
    1.max(fighters.min(floor))
}

/// Decide every garrison's action for the encounter's current round.
///
/// `corporations` maps character id → corporation id; when provided,
/// characters sharing the garrison owner's corporation are treated as
/// allies. Without a map only same-owner characters are filtered.
pub fn plan_garrison_actions(
    encounter: &CombatEncounter,
    corporations: Option<&HashMap<String, String>>,
) -> Vec<GarrisonOrder> {
    let mut orders = Vec::new();

    for (gid, garrison) in &encounter.participants {
        if garrison.kind != CombatantKind::Garrison {
            continue;
        }
        if garrison.fighters == 0 {
            continue;
        }
        let owner_id = match &garrison.owner_character_id {
            Some(owner) => owner.clone(),
            None => continue,
        };
        let mode = encounter
            .context
            .garrison_sources
            .iter()
            .find(|source| source.owner_id == owner_id)
            .map(|source| source.mode)
            .unwrap_or(GarrisonMode::Offensive);

        let enemies = eligible_enemies(encounter, garrison, &owner_id, corporations);
        if enemies.is_empty() {
            // Nobody left worth shooting at; hold position.
            orders.push(GarrisonOrder {
                combatant_id: gid.clone(),
                action: CombatantAction::Brace,
                commit: 0,
                target_id: None,
            });
            continue;
        }

        let order = match mode {
            GarrisonMode::Toll => plan_toll_order(encounter, gid, garrison, &enemies),
            _ => GarrisonOrder {
                combatant_id: gid.clone(),
                action: CombatantAction::Attack,
                commit: garrison_commit(mode, garrison.fighters),
                target_id: Some(strongest(&enemies).combatant_id.clone()),
            },
        };
        orders.push(order);
    }

    orders
}

/// Plan and submit garrison actions via the manager.
pub async fn auto_submit_garrison_actions(
    encounter: &CombatEncounter,
    manager: &CombatManager,
    corporations: Option<&HashMap<String, String>>,
) -> Result<(), GameError> {
    for order in plan_garrison_actions(encounter, corporations) {
        debug!(
            "Garrison auto-action: combat_id={} garrison={} action={} commit={} target={:?}",
            encounter.combat_id,
            order.combatant_id,
            order.action.as_str(),
            order.commit,
            order.target_id
        );
        manager
            .submit_action(
                &encounter.combat_id,
                &order.combatant_id,
                order.action,
                order.commit,
                order.target_id,
                None,
            )
            .await?;
    }
    Ok(())
}

fn eligible_enemies<'a>(
    encounter: &'a CombatEncounter,
    garrison: &CombatantState,
    owner_id: &str,
    corporations: Option<&HashMap<String, String>>,
) -> Vec<&'a CombatantState> {
    let owner_corp = corporations.and_then(|corps| corps.get(owner_id));
    encounter
        .participants
        .values()
        .filter(|candidate| {
            if candidate.combatant_id == garrison.combatant_id {
                return false;
            }
            if candidate.kind != CombatantKind::Character {
                return false;
            }
            let candidate_owner = candidate
                .owner_character_id
                .as_deref()
                .unwrap_or(candidate.combatant_id.as_str());
            if candidate_owner == owner_id {
                return false;
            }
            if let (Some(corps), Some(owner_corp)) = (corporations, owner_corp) {
                if corps.get(candidate_owner) == Some(owner_corp) {
                    return false;
                }
            }
            true
        })
        .collect()
}

fn strongest<'a>(enemies: &[&'a CombatantState]) -> &'a CombatantState {
    let mut sorted: Vec<&CombatantState> = enemies.to_vec();
    sorted.sort_by(|a, b| {
        b.fighters
            .cmp(&a.fighters)
            .then_with(|| a.combatant_id.cmp(&b.combatant_id))
    });
    sorted[0]
}

fn plan_toll_order(
    encounter: &CombatEncounter,
    gid: &str,
    garrison: &CombatantState,
    enemies: &[&CombatantState],
) -> GarrisonOrder {
    let toll = encounter.context.toll_registry.get(gid);
    let demand_round = toll.map(|t| t.demand_round).unwrap_or(1);

    if encounter.round_number <= demand_round {
        // Demand round: present the toll, hold fire.
        return GarrisonOrder {
            combatant_id: gid.to_string(),
            action: CombatantAction::Brace,
            commit: 0,
            target_id: None,
        };
    }

    if toll.map(|t| t.paid).unwrap_or(false) {
        return GarrisonOrder {
            combatant_id: gid.to_string(),
            action: CombatantAction::Brace,
            commit: 0,
            target_id: None,
        };
    }

    let target = toll
        .and_then(|t| t.target_id.clone())
        .filter(|t| encounter.participants.contains_key(t))
        .unwrap_or_else(|| strongest(enemies).combatant_id.clone());
    GarrisonOrder {
        combatant_id: gid.to_string(),
        action: CombatantAction::Attack,
        commit: garrison.fighters,
        target_id: Some(target),
    }
}
