//! Summary formatters for inbound events.
//!
//! Each formatter condenses one event payload into a single human-readable
//! line: these strings end up in agent LLM context and in client syslog
//! panes, so they favor density over completeness. [`default_registry`]
//! wires the stock set onto a [`SummaryRegistry`].

use serde_json::Value;

use crate::voidlane::event::{names, SummaryRegistry};

const ID_PREFIX_LEN: usize = 6;

fn short_id(value: &Value) -> Option<String> {
    let text = value.as_str()?;
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(ID_PREFIX_LEN).collect())
}

fn sector_id(payload: &Value) -> String {
    match &payload["sector"] {
        Value::Object(obj) => obj
            .get("id")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        Value::Number(n) => n.to_string(),
        _ => "unknown".to_string(),
    }
}

fn participant_names(payload: &Value) -> String {
    let mut names: Vec<String> = Vec::new();
    if let Some(entries) = payload["participants"].as_array() {
        for entry in entries {
            let name = entry["name"]
                .as_str()
                .or_else(|| entry["ship"]["ship_name"].as_str());
            if let Some(name) = name {
                names.push(name.to_string());
            }
        }
    }
    if names.is_empty() {
        return "unknown opponents".to_string();
    }
    if names.len() > 4 {
        let head = names[..3].join(", ");
        return format!("{}, +{} more", head, names.len() - 3);
    }
    names.join(", ")
}

/// `combat.round_waiting`: who is in the ring and when the round closes.
pub fn combat_round_waiting_summary(payload: &Value) -> Option<String> {
    let round = payload["round"]
        .as_u64()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "?".to_string());
    let deadline = payload["deadline"].as_str().unwrap_or("unknown");
    let combat_id = payload["combat_id"].as_str().unwrap_or("unknown");
    Some(format!(
        "Combat {} round {} waiting in sector {}; deadline {}; participants: {}.",
        combat_id,
        round,
        sector_id(payload),
        deadline,
        participant_names(payload)
    ))
}

/// `combat.action_accepted`: echo of the submitted action.
pub fn combat_action_accepted_summary(payload: &Value) -> Option<String> {
    let round = payload["round"]
        .as_u64()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "?".to_string());
    let action = payload["action"].as_str().unwrap_or("unknown").to_lowercase();
    let mut detail_parts = vec![action];
    if let Some(commit) = payload["commit"].as_u64() {
        if commit > 0 {
            detail_parts.push(format!("commit={}", commit));
        }
    }
    if let Some(target) = short_id(&payload["target_id"]) {
        detail_parts.push(format!("target={}", target));
    }
    if let Some(dest) = payload["destination_sector"].as_i64() {
        detail_parts.push(format!("dest={}", dest));
    }
    let resolved = if payload["round_resolved"].as_bool().unwrap_or(false) {
        "yes"
    } else {
        "no"
    };
    Some(format!(
        "Combat action accepted for round {}: {}. Round resolved: {}.",
        round,
        detail_parts.join(", "),
        resolved
    ))
}

fn loss_entries(payload: &Value, bucket: &str) -> Vec<String> {
    let mut entries = Vec::new();
    if let Some(losses) = payload[bucket].as_object() {
        for (name, value) in losses {
            if let Some(count) = value.as_u64() {
                if count > 0 {
                    entries.push(format!("{}:{}", name, count));
                }
            }
        }
    }
    entries
}

fn fleer_names(payload: &Value) -> Vec<String> {
    let mut fleers = Vec::new();
    if let Some(results) = payload["flee_results"].as_object() {
        for (name, fled) in results {
            if fled.as_bool().unwrap_or(false) {
                fleers.push(name.clone());
            }
        }
    }
    fleers
}

/// `combat.round_resolved`: result, losses, and flee outcomes.
pub fn combat_round_resolved_summary(payload: &Value) -> Option<String> {
    let round = payload["round"]
        .as_u64()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "?".to_string());
    let result = payload["result"]
        .as_str()
        .or_else(|| payload["end"].as_str())
        .unwrap_or("in_progress");
    let losses = loss_entries(payload, "defensive_losses");
    let loss_summary = if losses.is_empty() {
        "no defensive losses".to_string()
    } else {
        losses.join(", ")
    };
    let fleers = fleer_names(payload);
    let flee_summary = if fleers.is_empty() {
        "none".to_string()
    } else {
        fleers.join(", ")
    };
    Some(format!(
        "Combat round {} resolved in sector {}: result {}. Losses: {}. Flees: {}.",
        round,
        sector_id(payload),
        result,
        loss_summary,
        flee_summary
    ))
}

/// `combat.ended`: headline result plus per-combatant totals and salvage.
pub fn combat_ended_summary(payload: &Value) -> Option<String> {
    let result = payload["result"]
        .as_str()
        .or_else(|| payload["end"].as_str())
        .unwrap_or("unknown");
    let mut header = format!("Combat ended in sector {}", sector_id(payload));
    if let Some(round) = payload["round"].as_u64() {
        header.push_str(&format!(" (round {})", round));
    }
    header.push_str(&format!(": result {}.", result));

    let mut totals: std::collections::BTreeMap<String, u64> = std::collections::BTreeMap::new();
    for bucket in ["defensive_losses", "offensive_losses"] {
        if let Some(losses) = payload[bucket].as_object() {
            for (name, value) in losses {
                if let Some(count) = value.as_u64() {
                    if count > 0 {
                        *totals.entry(name.clone()).or_insert(0) += count;
                    }
                }
            }
        }
    }

    let mut fleers = fleer_names(payload);
    let mut details: Vec<String> = Vec::new();
    let mut sorted: Vec<(String, u64)> = totals.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (name, losses) in sorted {
        let mut entry = format!("{} lost {} fighters", name, losses);
        if let Some(index) = fleers.iter().position(|f| f == &name) {
            fleers.remove(index);
            entry.push_str(" and fled");
        }
        details.push(entry);
    }
    for name in fleers {
        details.push(format!("{} fled", name));
    }
    if let Some(salvage) = payload["salvage"].as_array() {
        if !salvage.is_empty() {
            details.push(format!("Salvage available: {}", salvage.len()));
        }
    }

    if details.is_empty() {
        Some(header)
    } else {
        Some(format!("{} {}.", header, details.join("; ")))
    }
}

/// `character.moved`: who arrived or departed.
pub fn character_moved_summary(payload: &Value) -> Option<String> {
    let name = payload["player"]["name"]
        .as_str()
        .map(|s| s.to_string())
        .or_else(|| payload["name"].as_str().map(|s| s.to_string()))
        .or_else(|| short_id(&payload["player"]["id"]))
        .unwrap_or_else(|| "Unknown".to_string());
    let ship_name = payload["ship"]["ship_name"]
        .as_str()
        .or_else(|| payload["ship_name"].as_str())
        .or_else(|| payload["ship"]["ship_type"].as_str())
        .unwrap_or("unknown ship");
    let verb = match payload["movement"].as_str() {
        Some("arrive") => "arrived",
        Some("depart") => "departed",
        _ => "movement update",
    };
    Some(format!("{} in {} {}.", name, ship_name, verb))
}

/// `garrison.character_moved`: movement relayed to garrison owners.
pub fn garrison_character_moved_summary(payload: &Value) -> Option<String> {
    let name = payload["player"]["name"]
        .as_str()
        .or_else(|| payload["name"].as_str())
        .unwrap_or("Unknown");
    let sector = sector_id(payload);
    let verb = match payload["movement"].as_str() {
        Some("arrive") => "entered",
        Some("depart") => "left",
        _ => "moved through",
    };
    Some(format!(
        "Garrison report: {} {} sector {}.",
        name, verb, sector
    ))
}

/// `garrison.combat_alert`: a stationed garrison came under attack.
pub fn garrison_combat_alert_summary(payload: &Value) -> Option<String> {
    let owner = payload["garrison"]["owner_name"]
        .as_str()
        .map(|s| s.to_string())
        .or_else(|| short_id(&payload["garrison"]["owner_id"]))
        .unwrap_or_else(|| "unknown owner".to_string());
    let mut parts = vec![format!(
        "Garrison alert in sector {} for {}.",
        sector_id(payload),
        owner
    )];
    if let Some(combat_id) = payload["combat"]["combat_id"].as_str() {
        parts.push(format!("Combat ID: {}.", combat_id));
    }
    if let Some(initiator) = payload["combat"]["initiator_name"].as_str() {
        parts.push(format!("Initiated by {}.", initiator));
    }
    Some(parts.join(" "))
}

/// `salvage.created`: loot dropped into a sector.
pub fn salvage_created_summary(payload: &Value) -> Option<String> {
    let sector = sector_id(payload);
    let count = payload["salvage"]
        .as_array()
        .map(|s| s.len())
        .unwrap_or(1);
    Some(format!(
        "Salvage created in sector {} ({} container{}).",
        sector,
        count,
        if count == 1 { "" } else { "s" }
    ))
}

/// `salvage.collected`: claim result.
pub fn salvage_collected_summary(payload: &Value) -> Option<String> {
    let collected = payload["fully_collected"].as_bool().unwrap_or(true);
    let credits = payload["credits"].as_i64().unwrap_or(0);
    let mut line = if collected {
        "Salvage collected.".to_string()
    } else {
        "Salvage partially collected.".to_string()
    };
    if credits > 0 {
        line.push_str(&format!(" Credits recovered: {}.", credits));
    }
    Some(line)
}

/// `sector.update`: compact snapshot of the sector contents.
pub fn sector_update_summary(payload: &Value) -> Option<String> {
    let sector = payload["id"]
        .as_i64()
        .map(|s| s.to_string())
        .unwrap_or_else(|| sector_id(payload));
    let player_names: Vec<String> = payload["players"]
        .as_array()
        .map(|players| {
            players
                .iter()
                .filter_map(|p| p["name"].as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let players_part = if player_names.is_empty() {
        "none".to_string()
    } else {
        player_names.join(", ")
    };
    let garrison_part = if payload["garrison"].is_null() { "0" } else { "1" };
    let salvage_part = payload["salvage"]
        .as_array()
        .map(|s| s.len())
        .unwrap_or(0);
    Some(format!(
        "Sector update: Sector {}; players {}; garrisons {}; salvage {}.",
        sector, players_part, garrison_part, salvage_part
    ))
}

/// `status.update`: compact ship/credits line.
pub fn status_update_summary(payload: &Value) -> Option<String> {
    let sector = payload["sector"]["id"]
        .as_i64()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "?".to_string());
    let mut parts = vec![format!("Sector {}", sector)];
    let ship = &payload["ship"];
    if let Some(credits) = payload["player"]["credits_on_hand"].as_i64() {
        parts.push(format!("Credits {}", credits));
    }
    if let (Some(shields), Some(max_shields)) =
        (ship["shields"].as_u64(), ship["max_shields"].as_u64())
    {
        parts.push(format!("Shields {}/{}", shields, max_shields));
    }
    if let Some(fighters) = ship["fighters"].as_u64() {
        parts.push(format!("Fighters {}", fighters));
    }
    Some(format!("Status update: {}.", parts.join("; ")))
}

/// `movement.start`: hyperspace entry.
pub fn movement_start_summary(payload: &Value) -> Option<String> {
    let destination = payload["to_sector"]
        .as_i64()
        .or_else(|| payload["destination"].as_i64())?;
    let eta = payload["eta_seconds"]
        .as_f64()
        .map(|eta| format!("{:.1}s", eta))
        .unwrap_or_else(|| "unknown".to_string());
    Some(format!(
        "Entering hyperspace to sector {} (ETA: {}).",
        destination, eta
    ))
}

/// `movement.complete` / `move`: arrival line.
pub fn move_summary(payload: &Value) -> Option<String> {
    let sector = payload["sector"]["id"]
        .as_i64()
        .or_else(|| payload["sector"].as_i64())?;
    Some(format!("Now in sector {}.", sector))
}

/// `trade.executed`: what changed hands.
pub fn trade_executed_summary(payload: &Value) -> Option<String> {
    let trade = &payload["trade"];
    let mut pieces = vec!["Trade executed.".to_string()];
    if let Some(credits) = trade["new_credits"]
        .as_i64()
        .or_else(|| payload["player"]["credits_on_hand"].as_i64())
    {
        pieces.push(format!("Credits: {}.", credits));
    }
    if let (Some(units), Some(commodity)) = (trade["units"].as_u64(), trade["commodity"].as_str()) {
        let action = match trade["trade_type"].as_str() {
            Some("buy") => "Bought",
            Some("sell") => "Sold",
            _ => "Traded",
        };
        let mut phrase = format!("{} {} {}", action, units, commodity.replace('_', " "));
        if let Some(total) = trade["total_price"].as_i64() {
            phrase.push_str(&format!(" (total {})", total));
        }
        pieces.push(format!("{}.", phrase));
    }
    Some(pieces.join(" "))
}

/// `chat.message`: inbound chat line.
pub fn chat_message_summary(payload: &Value) -> Option<String> {
    let sender = payload["from"]
        .as_str()
        .or_else(|| payload["sender"].as_str())
        .unwrap_or("unknown");
    let message = payload["message"].as_str().unwrap_or("");
    Some(format!("Message from {}: {}", sender, message))
}

/// `credits.transfer` / `warp.transfer`: transfer receipts.
pub fn transfer_summary(payload: &Value) -> Option<String> {
    let amount = payload["amount"]
        .as_i64()
        .or_else(|| payload["units"].as_i64())?;
    let counterparty = payload["to"]
        .as_str()
        .or_else(|| payload["from"].as_str())
        .unwrap_or("unknown");
    Some(format!("Transfer of {} with {}.", amount, counterparty))
}

/// Build the stock registry covering the event names the combat core and
/// task agent consume.
pub fn default_registry() -> SummaryRegistry {
    let mut registry = SummaryRegistry::new();
    registry.register(names::STATUS_UPDATE, status_update_summary);
    registry.register(names::SECTOR_UPDATE, sector_update_summary);
    registry.register(names::CHARACTER_MOVED, character_moved_summary);
    registry.register(names::MOVEMENT_START, movement_start_summary);
    registry.register(names::MOVEMENT_COMPLETE, move_summary);
    registry.register("move", move_summary);
    registry.register(names::COMBAT_ROUND_WAITING, combat_round_waiting_summary);
    registry.register(names::COMBAT_ACTION_ACCEPTED, combat_action_accepted_summary);
    registry.register(names::COMBAT_ROUND_RESOLVED, combat_round_resolved_summary);
    registry.register(names::COMBAT_ENDED, combat_ended_summary);
    registry.register(names::SALVAGE_CREATED, salvage_created_summary);
    registry.register(names::SALVAGE_COLLECTED, salvage_collected_summary);
    registry.register(names::GARRISON_COMBAT_ALERT, garrison_combat_alert_summary);
    registry.register(
        names::GARRISON_CHARACTER_MOVED,
        garrison_character_moved_summary,
    );
    registry.register(names::TRADE_EXECUTED, trade_executed_summary);
    registry.register(names::CHAT_MESSAGE, chat_message_summary);
    registry.register("credits.transfer", transfer_summary);
    registry.register("warp.transfer", transfer_summary);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_waiting_summary() {
        let payload = json!({
            "combat_id": "c9",
            "round": 2,
            "sector": {"id": 14},
            "deadline": "2026-08-01T10:00:15Z",
            "participants": [{"name": "zara"}, {"name": "kel"}],
        });
        let summary = combat_round_waiting_summary(&payload).unwrap();
        assert!(summary.contains("Combat c9 round 2"));
        assert!(summary.contains("sector 14"));
        assert!(summary.contains("zara, kel"));
    }

    #[test]
    fn test_combat_ended_summary_lists_losses_and_flees() {
        let payload = json!({
            "sector": {"id": 3},
            "round": 4,
            "result": "kel_defeated",
            "defensive_losses": {"kel": 8, "zara": 2},
            "offensive_losses": {"kel": 1, "zara": 0},
            "flee_results": {"jun": true},
            "salvage": [{"salvage_id": "s1"}],
        });
        let summary = combat_ended_summary(&payload).unwrap();
        assert!(summary.contains("result kel_defeated"));
        assert!(summary.contains("kel lost 9 fighters"));
        assert!(summary.contains("jun fled"));
        assert!(summary.contains("Salvage available: 1"));
    }

    #[test]
    fn test_character_moved_summary() {
        let payload = json!({
            "player": {"id": "abcdef123", "name": "zara"},
            "ship": {"ship_name": "Starlark"},
            "movement": "arrive",
        });
        assert_eq!(
            character_moved_summary(&payload).unwrap(),
            "zara in Starlark arrived."
        );
    }

    #[test]
    fn test_default_registry_covers_combat_events() {
        let registry = default_registry();
        for name in [
            names::COMBAT_ROUND_WAITING,
            names::COMBAT_ROUND_RESOLVED,
            names::COMBAT_ENDED,
            names::COMBAT_ACTION_ACCEPTED,
        ] {
            assert!(registry.contains(name), "missing formatter for {}", name);
        }
    }
}
