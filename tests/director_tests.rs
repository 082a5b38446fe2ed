use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use voidlane::combat::director::{character_combatant, CombatDirector, EventSink};
use voidlane::combat::garrisons::GarrisonStore;
use voidlane::combat::manager::CombatManager;
use voidlane::combat::models::{garrison_combatant_id, CombatantAction, GarrisonMode};
use voidlane::combat::salvage::SalvageManager;
use voidlane::config::{CombatManagerConfig, SalvageConfig};

struct CollectingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl CollectingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn emit(&self, event_name: &str, payload: Value) {
        self.events
            .lock()
            .unwrap()
            .push((event_name.to_string(), payload));
    }
}

struct Fixture {
    director: Arc<CombatDirector>,
    sink: Arc<CollectingSink>,
    garrisons: Arc<GarrisonStore>,
    salvage: Arc<SalvageManager>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let garrisons =
        Arc::new(GarrisonStore::open(dir.path().join("garrisons.json")).expect("store"));
    let salvage = Arc::new(SalvageManager::new(SalvageConfig::default()));
    let manager = CombatManager::new(CombatManagerConfig {
        round_timeout: Duration::from_secs(60),
    });
    let director = CombatDirector::new(manager, garrisons.clone(), salvage.clone());
    let sink = CollectingSink::new();
    director.set_event_sink(sink.clone());
    Fixture {
        director,
        sink,
        garrisons,
        salvage,
        _dir: dir,
    }
}

#[tokio::test]
async fn destroying_a_ship_drops_its_cargo_as_salvage() {
    let fx = fixture();
    fx.director.set_cargo_provider(Arc::new(|character_id| {
        let mut cargo = BTreeMap::new();
        if character_id == "kel" {
            cargo.insert("quantum_foam".to_string(), 5);
        }
        (cargo, 0)
    }));

    let zara = character_combatant("zara", "zara", 500, 0, 3, 500, 0, false);
    let kel = character_combatant("kel", "kel", 1, 0, 3, 1, 0, false);
    fx.director
        .start_sector_encounter("c1", 12, vec![zara, kel], Some("zara".to_string()))
        .await
        .unwrap();

    let manager = fx.director.manager().clone();
    manager
        .submit_action("c1", "zara", CombatantAction::Attack, 500, Some("kel".to_string()), None)
        .await
        .unwrap();
    let outcome = manager
        .submit_action("c1", "kel", CombatantAction::Brace, 0, None, None)
        .await
        .unwrap()
        .expect("terminal outcome");
    assert_eq!(outcome.end_state.as_deref(), Some("kel_defeated"));

    // combat.ended runs on a detached task.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let containers = fx.salvage.list_sector(12);
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].victor_id.as_deref(), Some("zara"));
    assert_eq!(containers[0].cargo["quantum_foam"], 5);

    // First claim wins; the second comes back empty-handed.
    assert!(fx
        .salvage
        .claim(&containers[0].salvage_id, "zara")
        .is_some());
    assert!(fx.salvage.claim(&containers[0].salvage_id, "kel").is_none());

    let events = fx.sink.events();
    let ended = events
        .iter()
        .find(|(name, _)| name == "combat.ended")
        .map(|(_, payload)| payload)
        .expect("combat.ended emitted");
    assert_eq!(ended["result"], "kel_defeated");
    assert_eq!(ended["salvage"].as_array().unwrap().len(), 1);
    assert!(ended["logs"].as_array().unwrap().len() >= 1);
}

#[tokio::test]
async fn toll_garrison_demand_attack_pay_cycle() {
    let fx = fixture();
    fx.garrisons
        .deploy(3, "xeno", 100, GarrisonMode::Toll, 50)
        .unwrap();

    let garrison_id = garrison_combatant_id(3, "xeno");
    let player = character_combatant("yara", "yara", 1000, 0, 3, 1000, 0, false);
    fx.director
        .start_sector_encounter("c1", 3, vec![player], Some("yara".to_string()))
        .await
        .unwrap();

    let manager = fx.director.manager().clone();

    // Round 1: the garrison has already auto-submitted its demand (BRACE).
    // The player pokes it instead of paying.
    let outcome = manager
        .submit_action("c1", "yara", CombatantAction::Attack, 1, Some(garrison_id.clone()), None)
        .await
        .unwrap()
        .expect("round 1 resolves on player submission");
    assert!(outcome.end_state.is_none());
    assert_eq!(
        outcome.effective_actions[&garrison_id].action,
        CombatantAction::Brace
    );

    // Round 2: unpaid toll garrisons attack with everything they have.
    let outcome = manager
        .submit_action("c1", "yara", CombatantAction::Brace, 0, None, None)
        .await
        .unwrap()
        .expect("round 2 resolves");
    assert!(outcome.end_state.is_none());
    let garrison_action = &outcome.effective_actions[&garrison_id];
    assert_eq!(garrison_action.action, CombatantAction::Attack);
    assert_eq!(garrison_action.target_id.as_deref(), Some("yara"));
    assert!(garrison_action.commit > 50);

    // The player settles the toll before round 3.
    fx.director.pay_toll("c1", &garrison_id, "yara").await.unwrap();
    let outcome = manager
        .submit_action("c1", "yara", CombatantAction::Brace, 0, None, None)
        .await
        .unwrap()
        .expect("round 3 resolves");
    assert_eq!(
        outcome.effective_actions[&garrison_id].action,
        CombatantAction::Brace
    );
    // Paid garrison + bracing player is a stalemate, ending the encounter.
    assert_eq!(outcome.end_state.as_deref(), Some("stalemate"));
}

#[tokio::test]
async fn garrison_losses_are_written_back_to_disk() {
    let fx = fixture();
    fx.garrisons
        .deploy(8, "xeno", 1, GarrisonMode::Offensive, 0)
        .unwrap();

    let garrison_id = garrison_combatant_id(8, "xeno");
    let player = character_combatant("zara", "zara", 500, 0, 3, 500, 0, false);
    fx.director
        .start_sector_encounter("c1", 8, vec![player], Some("zara".to_string()))
        .await
        .unwrap();

    let manager = fx.director.manager().clone();
    // The garrison auto-submitted an attack; the player's submission
    // completes the quorum.
    let outcome = manager
        .submit_action("c1", "zara", CombatantAction::Attack, 500, Some(garrison_id.clone()), None)
        .await
        .unwrap()
        .expect("terminal outcome");
    assert_eq!(
        outcome.end_state.as_deref(),
        Some(format!("{}_defeated", garrison_id).as_str())
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    // The wiped garrison is gone from the persistent store.
    assert!(fx.garrisons.list_sector(8).is_empty());
}

#[tokio::test]
async fn round_waiting_payload_reaches_the_sink() {
    let fx = fixture();
    let zara = character_combatant("zara", "zara", 10, 100, 3, 10, 100, false);
    let kel = character_combatant("kel", "kel", 10, 0, 3, 10, 0, false);
    fx.director
        .start_sector_encounter("c1", 4, vec![zara, kel], Some("zara".to_string()))
        .await
        .unwrap();

    let events = fx.sink.events();
    let (name, payload) = &events[0];
    assert_eq!(name, "combat.round_waiting");
    assert_eq!(payload["combat_id"], "c1");
    assert_eq!(payload["sector"]["id"], 4);
    assert_eq!(payload["round"], 1);
    assert_eq!(payload["initiator"], "zara");
    assert_eq!(payload["participants"].as_array().unwrap().len(), 2);
}
