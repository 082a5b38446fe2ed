use std::collections::BTreeMap;
use std::time::Duration;

use voidlane::combat::salvage::SalvageManager;
use voidlane::config::SalvageConfig;

fn manager_with_ttl(ttl: Duration) -> SalvageManager {
    SalvageManager::new(SalvageConfig { default_ttl: ttl })
}

#[tokio::test]
async fn containers_expire_after_their_ttl() {
    // Minimum TTL is one second; wait it out for real.
    let salvage = manager_with_ttl(Duration::from_secs(1));
    let container = salvage.create(
        9,
        Some("zara".to_string()),
        BTreeMap::new(),
        2,
        50,
        BTreeMap::new(),
        None,
    );

    assert_eq!(salvage.list_sector(9).len(), 1);
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(salvage.list_sector(9).is_empty());
    assert!(salvage.claim(&container.salvage_id, "kel").is_none());
    assert!(salvage.get(&container.salvage_id).is_none());
}

#[test]
fn sub_second_ttls_are_floored() {
    let salvage = manager_with_ttl(Duration::from_secs(900));
    let container = salvage.create(
        9,
        None,
        BTreeMap::new(),
        0,
        0,
        BTreeMap::new(),
        Some(Duration::from_millis(1)),
    );
    // The container must still be live immediately after creation.
    assert!(salvage.get(&container.salvage_id).is_some());
    let lifetime = container.expires_at - container.created_at;
    assert!(lifetime >= chrono::Duration::seconds(1));
}

#[test]
fn claim_races_have_one_winner() {
    let salvage = manager_with_ttl(Duration::from_secs(900));
    let mut cargo = BTreeMap::new();
    cargo.insert("retro_organics".to_string(), 8);
    let container = salvage.create(2, Some("zara".to_string()), cargo, 0, 0, BTreeMap::new(), None);

    let winners: Vec<bool> = ["kel", "jun", "zara"]
        .iter()
        .map(|claimer| salvage.claim(&container.salvage_id, claimer).is_some())
        .collect();
    assert_eq!(winners.iter().filter(|w| **w).count(), 1);
    assert!(winners[0]);

    let stored = salvage.get(&container.salvage_id).expect("still listed");
    assert!(stored.claimed);
    assert_eq!(stored.claimed_by.as_deref(), Some("kel"));
}
