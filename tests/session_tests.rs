use std::time::Duration;

use serde_json::json;

use voidlane::client::AsyncGameClient;
use voidlane::combat_session::CombatSession;
use voidlane::error::GameError;

fn client() -> AsyncGameClient {
    AsyncGameClient::new("http://127.0.0.1:1", "zara")
}

#[tokio::test]
async fn session_tracks_combat_through_client_events() {
    let client = client();
    let session = CombatSession::new(client.clone());
    session.start();

    client.dispatch_local_event(
        "combat.round_waiting",
        json!({
            "combat_id": "c1",
            "sector": {"id": 5},
            "round": 1,
            "deadline": "2026-08-01T10:00:15Z",
            "participants": [
                {"name": "zara", "player_type": "character"},
                {"name": "kel", "player_type": "character"},
            ],
        }),
    );

    let state = session
        .wait_for_combat_start(Some(Duration::from_secs(2)))
        .await
        .expect("combat start");
    assert_eq!(state.combat_id, "c1");
    assert_eq!(state.round, 1);
    assert!(state.participants.contains_key("zara"));

    client.dispatch_local_event(
        "combat.round_resolved",
        json!({
            "combat_id": "c1",
            "sector": {"id": 5},
            "round": 1,
            "defensive_losses": {"kel": 2},
            "participants": [{"name": "zara"}],
        }),
    );
    client.dispatch_local_event(
        "combat.ended",
        json!({
            "combat_id": "c1",
            "sector": {"id": 5},
            "round": 1,
            "result": "kel_defeated",
            "participants": [{"name": "zara"}],
            "salvage": [{"salvage_id": "s1"}],
        }),
    );

    let state = session
        .wait_for_combat_end(Some(Duration::from_secs(2)))
        .await
        .expect("combat end");
    assert_eq!(state.result.as_deref(), Some("kel_defeated"));
    assert_eq!(state.salvage.len(), 1);
    assert_eq!(state.history.len(), 2);
    assert!(!session.in_active_combat());

    // The FIFO queue saw all three events in order.
    let (first, _, _) = session
        .next_combat_event(Some(Duration::from_millis(100)))
        .await
        .expect("queued event");
    assert_eq!(first, "combat.round_waiting");
    let (second, _, _) = session
        .next_combat_event(Some(Duration::from_millis(100)))
        .await
        .expect("queued event");
    assert_eq!(second, "combat.round_resolved");
    let (third, _, _) = session
        .next_combat_event(Some(Duration::from_millis(100)))
        .await
        .expect("queued event");
    assert_eq!(third, "combat.ended");

    session.close();
}

#[tokio::test]
async fn closed_session_ignores_further_events() {
    let client = client();
    let session = CombatSession::new(client.clone());
    session.start();
    session.close();

    client.dispatch_local_event(
        "combat.round_waiting",
        json!({
            "combat_id": "c9",
            "sector": {"id": 5},
            "round": 1,
            "participants": [{"name": "zara"}],
        }),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.current_combat_state().is_none());
}

#[tokio::test]
async fn occupant_change_wakes_waiters() {
    let client = client();
    let session = std::sync::Arc::new(
        CombatSession::new(client.clone()).with_initial_status(&json!({
            "character_id": "zara",
            "player": {"id": "zara"},
            "ship": {"fighters": 10},
            "sector": {"id": 3, "players": []},
        })),
    );
    session.start();
    assert_eq!(session.sector(), Some(3));

    // Register the waiter before the movement arrives so the version bump
    // cannot race past it.
    let waiter = std::sync::Arc::clone(&session);
    let handle = tokio::spawn(async move {
        waiter
            .wait_for_occupant_change(Some(Duration::from_secs(2)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.dispatch_local_event(
        "character.moved",
        json!({
            "player": {"id": "kel", "name": "kel"},
            "ship": {"ship_name": "Starlark"},
            "movement": "arrive",
            "to_sector": 3,
        }),
    );

    let players = handle
        .await
        .expect("join")
        .expect("occupant change observed");
    assert!(players.contains_key("kel"));
}

#[tokio::test]
async fn wait_for_combat_end_times_out_when_combat_continues() {
    let client = client();
    let session = CombatSession::new(client.clone());
    session.start();
    client.dispatch_local_event(
        "combat.round_waiting",
        json!({
            "combat_id": "c1",
            "sector": {"id": 5},
            "round": 1,
            "participants": [{"name": "zara"}],
        }),
    );
    let result = session
        .wait_for_combat_end(Some(Duration::from_millis(100)))
        .await;
    assert!(matches!(result, Err(GameError::Timeout(_))));
}
