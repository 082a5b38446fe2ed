//! Combat session helper built on top of [`AsyncGameClient`].
//!
//! One session observes one character. It joins the server's event stream
//! into a consistent [`CombatState`] mirror and exposes blocking awaitables
//! (`wait_for_combat_start`, `wait_for_combat_end`, …) that agent code can
//! suspend on. Handlers are idempotent under redelivery of the latest-round
//! snapshot, and an internal FIFO queue decouples the socket reader from
//! consumers.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::voidlane::client::{AsyncGameClient, HandlerToken};
use crate::voidlane::error::GameError;
use crate::voidlane::event::{names, GameEvent};

/// Lightweight representation of a combat participant.
#[derive(Debug, Clone, PartialEq)]
pub struct CombatParticipant {
    pub combatant_id: String,
    pub name: String,
    pub kind: String,
    pub fighters: u32,
    pub shields: u32,
    pub max_fighters: u32,
    pub max_shields: u32,
    pub turns_per_warp: i32,
    pub owner: Option<String>,
}

/// State snapshot for an active or recently completed combat.
#[derive(Debug, Clone, Default)]
pub struct CombatState {
    pub combat_id: String,
    pub sector: Option<i64>,
    pub round: u32,
    pub participants: BTreeMap<String, CombatParticipant>,
    pub deadline: Option<String>,
    pub last_event: Option<String>,
    pub last_round: Option<Value>,
    pub history: Vec<Value>,
    pub result: Option<String>,
    pub salvage: Vec<Value>,
}

struct SessionState {
    combat_state: Option<CombatState>,
    combat_active: bool,
    player_combatant_id: Option<String>,

    current_sector: Option<i64>,
    sector_state: Value,
    other_players: BTreeMap<String, Value>,
    occupant_version: u64,
    ship_status: Option<Value>,

    injected_payloads: HashSet<(String, u32, String)>,
    toll_paid: HashSet<String>,
}

struct SessionInner {
    character_id: String,
    client: AsyncGameClient,
    state: Mutex<SessionState>,
    combat_notify: Notify,
    occupant_notify: Notify,
    queue: Mutex<VecDeque<(String, CombatState, Value)>>,
    queue_notify: Notify,
}

/// Tracks combat-relevant events for a single character.
pub struct CombatSession {
    inner: Arc<SessionInner>,
    tokens: Mutex<Vec<HandlerToken>>,
    started: AtomicBool,
}

const COMBAT_EVENTS: [&str; 3] = [
    names::COMBAT_ROUND_WAITING,
    names::COMBAT_ROUND_RESOLVED,
    names::COMBAT_ENDED,
];

impl CombatSession {
    /// Create a session for the client's bound character. Call
    /// [`start`](Self::start) to begin consuming events.
    pub fn new(client: AsyncGameClient) -> Self {
        let character_id = client.character_id().to_string();
        Self {
            inner: Arc::new(SessionInner {
                character_id,
                client,
                state: Mutex::new(SessionState {
                    combat_state: None,
                    combat_active: false,
                    player_combatant_id: None,
                    current_sector: None,
                    sector_state: json!({}),
                    other_players: BTreeMap::new(),
                    occupant_version: 0,
                    ship_status: None,
                    injected_payloads: HashSet::new(),
                    toll_paid: HashSet::new(),
                }),
                combat_notify: Notify::new(),
                occupant_notify: Notify::new(),
                queue: Mutex::new(VecDeque::new()),
                queue_notify: Notify::new(),
            }),
            tokens: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Seed the session from a status payload fetched before handlers were
    /// attached (builder pattern).
    pub fn with_initial_status(self, status: &Value) -> Self {
        self.inner.apply_status_locked(status);
        self
    }

    /// Register event handlers if not already active.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = &self.inner.client;
        let mut tokens = lock(&self.tokens);

        let inner = Arc::clone(&self.inner);
        tokens.push(client.add_event_handler(names::STATUS_UPDATE, move |event: GameEvent| {
            let inner = Arc::clone(&inner);
            async move { inner.on_status_event(&event.payload) }
        }));

        let inner = Arc::clone(&self.inner);
        tokens.push(client.add_event_handler(names::SECTOR_UPDATE, move |event: GameEvent| {
            let inner = Arc::clone(&inner);
            async move { inner.on_sector_update(&event.payload) }
        }));

        let inner = Arc::clone(&self.inner);
        tokens.push(client.add_event_handler(names::CHARACTER_MOVED, move |event: GameEvent| {
            let inner = Arc::clone(&inner);
            async move { inner.on_character_moved(&event.payload).await }
        }));

        for event_name in COMBAT_EVENTS {
            let inner = Arc::clone(&self.inner);
            tokens.push(client.add_event_handler(event_name, move |event: GameEvent| {
                let inner = Arc::clone(&inner);
                async move { inner.handle_combat_event(event_name, &event.payload) }
            }));
        }
    }

    /// Remove registered handlers and drain pending events.
    pub fn close(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        for token in lock(&self.tokens).drain(..) {
            self.inner.client.remove_event_handler(&token);
        }
        lock(&self.inner.queue).clear();
        self.inner.queue_notify.notify_waiters();
    }

    // ------------------------------------------------------------------
    // Inspection helpers
    // ------------------------------------------------------------------

    pub fn sector(&self) -> Option<i64> {
        lock(&self.inner.state).current_sector
    }

    pub fn sector_snapshot(&self) -> Value {
        lock(&self.inner.state).sector_state.clone()
    }

    pub fn ship_status(&self) -> Option<Value> {
        lock(&self.inner.state).ship_status.clone()
    }

    pub fn other_players(&self) -> BTreeMap<String, Value> {
        lock(&self.inner.state).other_players.clone()
    }

    pub fn current_combat_state(&self) -> Option<CombatState> {
        lock(&self.inner.state).combat_state.clone()
    }

    pub fn player_combatant_id(&self) -> Option<String> {
        lock(&self.inner.state).player_combatant_id.clone()
    }

    pub fn in_active_combat(&self) -> bool {
        lock(&self.inner.state).combat_active
    }

    /// Garrison entries visible in this sector, merged from the sector
    /// snapshot and any garrison combat participants.
    pub fn sector_garrisons(&self) -> Vec<Value> {
        let state = lock(&self.inner.state);
        let mut entries: BTreeMap<String, Value> = BTreeMap::new();

        let garrison = &state.sector_state["garrison"];
        if garrison.is_object() {
            let owner = garrison["owner_name"]
                .as_str()
                .or_else(|| garrison["owner_id"].as_str());
            let key = match (owner, state.current_sector) {
                (Some(owner), Some(sector)) => format!("garrison:{}:{}", sector, owner),
                _ => "garrison:0".to_string(),
            };
            entries.insert(key, garrison.clone());
        }

        if let Some(combat) = &state.combat_state {
            for (pid, participant) in &combat.participants {
                if participant.kind != "garrison" {
                    continue;
                }
                let mut merged = entries.get(pid).cloned().unwrap_or_else(|| json!({}));
                if merged["owner_name"].is_null() {
                    merged["owner_name"] = json!(participant.name);
                }
                if merged["is_friendly"].is_null() {
                    merged["is_friendly"] =
                        json!(participant.owner.as_deref() == Some(self.inner.character_id.as_str()));
                }
                merged["fighters"] = json!(participant.fighters);
                merged["max_fighters"] = json!(participant.max_fighters);
                entries.insert(pid.clone(), merged);
            }
        }

        entries.into_iter().map(|(_, v)| v).collect()
    }

    /// Actions the player may submit right now; `pay` leads when an unpaid
    /// hostile toll garrison is present.
    pub fn available_actions(&self) -> Vec<String> {
        let state = lock(&self.inner.state);
        let combat = match (&state.combat_state, state.combat_active) {
            (Some(combat), true) => combat,
            _ => return Vec::new(),
        };
        let participant_id = state
            .player_combatant_id
            .clone()
            .unwrap_or_else(|| self.inner.character_id.clone());
        let participant = match combat.participants.get(&participant_id) {
            Some(p) => p,
            None => return Vec::new(),
        };

        let mut actions = Vec::new();
        let has_opponents = combat
            .participants
            .keys()
            .any(|pid| pid != &participant_id);
        if participant.fighters > 0 && has_opponents {
            actions.push("attack".to_string());
        }
        actions.push("brace".to_string());
        actions.push("flee".to_string());
        if !toll_targets_locked(&state).is_empty() {
            actions.insert(0, "pay".to_string());
        }
        actions
    }

    /// Fold a status payload fetched out-of-band into the session caches.
    pub fn update_from_status(&self, status: &Value) {
        if !status.is_object() {
            return;
        }
        if self.inner.apply_status_locked(status) {
            self.inner.bump_occupants();
        }
    }

    /// Garrison combatant ids that are unpaid hostile toll garrisons.
    pub fn toll_targets(&self) -> HashSet<String> {
        toll_targets_locked(&lock(&self.inner.state))
    }

    /// Record toll payment so `pay` stops being offered.
    pub fn mark_toll_paid<I: IntoIterator<Item = String>>(&self, combatant_ids: I) {
        let mut state = lock(&self.inner.state);
        for cid in combatant_ids {
            if !cid.is_empty() {
                state.toll_paid.insert(cid);
            }
        }
    }

    /// Inject an outcome payload the transport already yielded as an RPC
    /// response, without re-processing the duplicate event later.
    /// Deduplication is by `(combat_id, round, kind)`.
    pub fn apply_outcome_payload(&self, payload: &Value, ended: Option<bool>) {
        let (combat_id, round, outcome_kind) = {
            let state = lock(&self.inner.state);
            let combat = match &state.combat_state {
                Some(combat) => combat,
                None => return,
            };
            let combat_id = match payload["combat_id"].as_str() {
                Some(id) if id == combat.combat_id => id.to_string(),
                _ => return,
            };
            let round = payload["round"].as_u64().map(|r| r as u32).unwrap_or(combat.round);
            let is_ended = ended.unwrap_or(false)
                || !payload["end"].is_null()
                || !payload["result"].is_null();
            let kind = if is_ended {
                names::COMBAT_ENDED
            } else {
                names::COMBAT_ROUND_RESOLVED
            };
            (combat_id, round, kind.to_string())
        };

        {
            let mut state = lock(&self.inner.state);
            let token = (combat_id, round, outcome_kind.clone());
            if state.injected_payloads.contains(&token) {
                return;
            }
            state.injected_payloads.insert(token);
        }

        if outcome_kind == names::COMBAT_ENDED {
            self.inner.on_combat_ended(payload);
        } else {
            self.inner.on_combat_round_resolved(payload);
        }
    }

    // ------------------------------------------------------------------
    // Awaitables
    // ------------------------------------------------------------------

    /// Resolve once a combat is active for this character.
    pub async fn wait_for_combat_start(
        &self,
        timeout: Option<Duration>,
    ) -> Result<CombatState, GameError> {
        self.wait_for_combat(timeout, "combat start", |state| {
            if state.combat_active {
                state.combat_state.clone()
            } else {
                None
            }
        })
        .await
    }

    /// Resolve once the current combat has ended.
    pub async fn wait_for_combat_end(
        &self,
        timeout: Option<Duration>,
    ) -> Result<CombatState, GameError> {
        self.wait_for_combat(timeout, "combat end", |state| {
            match &state.combat_state {
                Some(combat)
                    if !state.combat_active
                        && combat.last_event.as_deref() == Some(names::COMBAT_ENDED) =>
                {
                    Some(combat.clone())
                }
                _ => None,
            }
        })
        .await
    }

    /// Resolve once another player is present in the sector, refreshing the
    /// status snapshot while waiting.
    pub async fn wait_for_other_player(
        &self,
        timeout: Option<Duration>,
    ) -> Result<BTreeMap<String, Value>, GameError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.inner.refresh_status().await;
            {
                let state = lock(&self.inner.state);
                if !state.other_players.is_empty() {
                    return Ok(state.other_players.clone());
                }
            }
            let wait = match deadline {
                None => Duration::from_secs(1),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(GameError::Timeout("no other player arrived".to_string()));
                    }
                    remaining.min(Duration::from_secs(1))
                }
            };
            let notified = self.inner.occupant_notify.notified();
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    /// Resolve when the sector occupant set changes from its current state.
    pub async fn wait_for_occupant_change(
        &self,
        timeout: Option<Duration>,
    ) -> Result<BTreeMap<String, Value>, GameError> {
        let initial_version = lock(&self.inner.state).occupant_version;
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.inner.occupant_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = lock(&self.inner.state);
                if state.occupant_version != initial_version {
                    return Ok(state.other_players.clone());
                }
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, notified).await.is_err()
                    {
                        return Err(GameError::Timeout("occupants unchanged".to_string()));
                    }
                }
            }
        }
    }

    /// Pop the next combat event `(name, state snapshot, payload)` in FIFO
    /// order.
    pub async fn next_combat_event(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(String, CombatState, Value), GameError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.inner.queue_notify.notified();
            if let Some(item) = lock(&self.inner.queue).pop_front() {
                return Ok(item);
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, notified).await.is_err()
                    {
                        return Err(GameError::Timeout("no combat event".to_string()));
                    }
                }
            }
        }
    }

    async fn wait_for_combat<F>(
        &self,
        timeout: Option<Duration>,
        what: &str,
        check: F,
    ) -> Result<CombatState, GameError>
    where
        F: Fn(&SessionState) -> Option<CombatState>,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            // Register interest before checking so a notification landing
            // between the check and the await is not lost.
            let notified = self.inner.combat_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(state) = check(&lock(&self.inner.state)) {
                return Ok(state);
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, notified).await.is_err()
                    {
                        return Err(GameError::Timeout(format!("waiting for {}", what)));
                    }
                }
            }
        }
    }
}

fn toll_targets_locked(state: &SessionState) -> HashSet<String> {
    let mut targets = HashSet::new();
    let combat = match &state.combat_state {
        Some(combat) => combat,
        None => return targets,
    };
    for (gid, participant) in &combat.participants {
        if participant.kind != "garrison" {
            continue;
        }
        if state.toll_paid.contains(gid) {
            continue;
        }
        if participant.fighters == 0 {
            continue;
        }
        let garrison = &state.sector_state["garrison"];
        if !garrison.is_object() {
            continue;
        }
        if garrison["mode"].as_str() != Some("toll") {
            continue;
        }
        if garrison["is_friendly"].as_bool().unwrap_or(false) {
            continue;
        }
        // Only one garrison per sector, so the first match is it.
        targets.insert(gid.clone());
        break;
    }
    targets
}

impl SessionInner {
    fn on_status_event(&self, payload: &Value) {
        if payload["character_id"].as_str() != Some(self.character_id.as_str()) {
            return;
        }
        let changed = self.apply_status_locked(payload);
        if changed {
            self.bump_occupants();
        }
    }

    /// Apply a status payload, handling both the `{player, ship, sector:{…}}`
    /// and the legacy `{sector: int, sector_contents: {…}}` formats. Returns
    /// whether the occupant set changed.
    fn apply_status_locked(&self, status: &Value) -> bool {
        let mut state = lock(&self.state);
        let previous: HashSet<String> = state.other_players.keys().cloned().collect();

        state.ship_status = if status["ship"].is_null() {
            None
        } else {
            Some(status["ship"].clone())
        };

        let other_players: Vec<Value>;
        if !status["player"].is_null() {
            let sector_data = &status["sector"];
            if sector_data.is_object() {
                state.current_sector = sector_data["id"].as_i64();
                other_players = sector_data["players"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default();
                state.sector_state = json!({
                    "sector": state.current_sector,
                    "other_players": other_players,
                    "garrison": sector_data["garrison"].clone(),
                    "salvage": sector_data["salvage"].as_array().cloned().unwrap_or_default(),
                    "port": sector_data["port"].clone(),
                    "planets": sector_data["planets"].as_array().cloned().unwrap_or_default(),
                    "adjacent_sectors": sector_data["adjacent_sectors"].as_array().cloned().unwrap_or_default(),
                });
            } else {
                state.current_sector = sector_data.as_i64();
                other_players = Vec::new();
                state.sector_state = json!({
                    "sector": state.current_sector,
                    "other_players": [],
                    "garrison": null,
                    "salvage": [],
                    "port": null,
                    "planets": [],
                    "adjacent_sectors": [],
                });
            }
        } else {
            state.current_sector = status["sector"].as_i64();
            let contents = &status["sector_contents"];
            other_players = contents["other_players"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            state.sector_state = json!({
                "sector": state.current_sector,
                "other_players": other_players,
                "garrison": contents["garrison"].clone(),
                "salvage": contents["salvage"].as_array().cloned().unwrap_or_default(),
                "port": contents["port"].clone(),
                "planets": contents["planets"].as_array().cloned().unwrap_or_default(),
                "adjacent_sectors": contents["adjacent_sectors"].as_array().cloned().unwrap_or_default(),
            });
        }

        state.other_players = other_players
            .iter()
            .filter_map(|entry| {
                entry["name"]
                    .as_str()
                    .map(|name| (name.to_string(), entry.clone()))
            })
            .collect();

        debug!(
            "Status applied; sector={:?} other_players={:?}",
            state.current_sector,
            state.other_players.keys().collect::<Vec<_>>()
        );

        let updated: HashSet<String> = state.other_players.keys().cloned().collect();
        updated != previous
    }

    fn on_sector_update(&self, payload: &Value) {
        let (sector_payload, sector_id) = if payload["sector"].is_object() {
            (payload["sector"].clone(), payload["sector"]["id"].as_i64())
        } else {
            (
                payload.clone(),
                payload["id"].as_i64().or_else(|| payload["sector"].as_i64()),
            )
        };

        {
            let mut state = lock(&self.state);
            let sector_id = match sector_id {
                Some(id) => id,
                None => return,
            };
            if let Some(current) = state.current_sector {
                if current != sector_id {
                    return;
                }
            }
            state.sector_state = sector_payload;
            if state.sector_state.is_object() {
                state.sector_state["garrison"] = payload["garrison"].clone();
            }
            state.current_sector = Some(sector_id);
        }
        self.bump_occupants();
    }

    async fn on_character_moved(&self, payload: &Value) {
        let changed = {
            let mut state = lock(&self.state);
            let current_sector = match state.current_sector {
                Some(sector) => sector,
                None => return,
            };

            let mover_id = payload["player"]["id"]
                .as_str()
                .or_else(|| payload["character_id"].as_str());
            let mover_name = payload["player"]["name"]
                .as_str()
                .or_else(|| payload["name"].as_str());
            if mover_id == Some(self.character_id.as_str())
                || mover_name == Some(self.character_id.as_str())
            {
                return;
            }

            let movement = payload["movement"].as_str();
            let to_sector = payload["to_sector"].as_i64();
            let from_sector = payload["from_sector"].as_i64();
            let arriving = movement == Some("arrive")
                || (movement.is_none() && to_sector == Some(current_sector));
            let departing = movement == Some("depart")
                || (movement.is_none() && from_sector == Some(current_sector));
            if !arriving && !departing {
                return;
            }

            let key = match mover_id.or(mover_name) {
                Some(key) => key.to_string(),
                None => return,
            };
            let display_name = mover_name.or(mover_id).unwrap_or(&key).to_string();

            let mut changed = false;
            if departing && state.other_players.remove(&key).is_some() {
                changed = true;
            }
            if arriving {
                // Placeholder entry until a refresh fills in details.
                state
                    .other_players
                    .insert(key, json!({ "name": display_name }));
                changed = true;
            }
            changed
        };

        if changed {
            self.bump_occupants();
        }
        self.refresh_status().await;
    }

    async fn refresh_status(&self) {
        match self.client.my_status().await {
            Ok(status) => {
                if self.apply_status_locked(&status) {
                    self.bump_occupants();
                }
            }
            Err(err) => {
                warn!("Failed to refresh status after movement event: {}", err);
            }
        }
    }

    fn handle_combat_event(&self, event_name: &str, payload: &Value) {
        if !self.event_involves_me(payload) {
            return;
        }
        match event_name {
            names::COMBAT_ROUND_WAITING => self.on_combat_round_waiting(payload),
            names::COMBAT_ROUND_RESOLVED => self.on_combat_round_resolved(payload),
            names::COMBAT_ENDED => self.on_combat_ended(payload),
            _ => {}
        }
    }

    /// A combat event matters to us when we appear in the participant list
    /// (dict or array form) or the combat id matches our current state.
    fn event_involves_me(&self, payload: &Value) -> bool {
        match &payload["participants"] {
            Value::Object(entries) => {
                for info in entries.values() {
                    if info["combatant_id"].as_str() == Some(self.character_id.as_str())
                        || info["owner"].as_str() == Some(self.character_id.as_str())
                    {
                        return true;
                    }
                }
            }
            Value::Array(entries) => {
                for info in entries {
                    if info["name"].as_str() == Some(self.character_id.as_str())
                        || info["combatant_id"].as_str() == Some(self.character_id.as_str())
                        || info["owner"].as_str() == Some(self.character_id.as_str())
                    {
                        return true;
                    }
                }
            }
            _ => {}
        }

        let state = lock(&self.state);
        match (&state.combat_state, payload["combat_id"].as_str()) {
            (Some(combat), Some(combat_id)) => combat.combat_id == combat_id,
            _ => false,
        }
    }

    fn on_combat_round_waiting(&self, payload: &Value) {
        let combat_id = payload["combat_id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let mut participants = parse_participants(payload);
        add_garrison_participant(payload, &mut participants);

        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let replace = match &state.combat_state {
                None => true,
                Some(combat) => combat.combat_id != combat_id,
            };
            if replace {
                let combat = CombatState {
                    combat_id: combat_id.clone(),
                    sector: extract_sector_id(&payload["sector"]),
                    round: payload["round"].as_u64().map(|r| r as u32).unwrap_or(1),
                    participants: participants.clone(),
                    deadline: payload["deadline"].as_str().map(|s| s.to_string()),
                    last_event: Some(names::COMBAT_ROUND_WAITING.to_string()),
                    ..CombatState::default()
                };
                state.player_combatant_id =
                    resolve_player_combatant_id(&combat.participants, &self.character_id);
                state.combat_state = Some(combat);
                state.combat_active = true;
                state.injected_payloads.clear();
                state.toll_paid.clear();
            } else if let Some(combat) = state.combat_state.as_mut() {
                for (pid, participant) in &participants {
                    combat
                        .participants
                        .entry(pid.clone())
                        .or_insert_with(|| participant.clone());
                }
                if let Some(round) = payload["round"].as_u64() {
                    combat.round = round as u32;
                }
                combat.deadline = payload["deadline"].as_str().map(|s| s.to_string());
                combat.last_event = Some(names::COMBAT_ROUND_WAITING.to_string());
                if state.player_combatant_id.is_none() {
                    state.player_combatant_id =
                        resolve_player_combatant_id(&combat.participants, &self.character_id);
                }
            }

            apply_ship_info(state, payload);
            apply_garrison_fighters(state, payload);
        }

        self.enqueue_combat_event(names::COMBAT_ROUND_WAITING, payload);
        self.combat_notify.notify_waiters();
    }

    fn on_combat_round_resolved(&self, payload: &Value) {
        {
            let mut state = lock(&self.state);
            let matches = state
                .combat_state
                .as_ref()
                .map(|combat| payload["combat_id"].as_str() == Some(combat.combat_id.as_str()))
                .unwrap_or(false);
            if !matches {
                return;
            }

            apply_ship_info(&mut state, payload);
            apply_garrison_fighters(&mut state, payload);

            // Toll payments to a wiped garrison no longer mean anything.
            let stale: Vec<String> = {
                let combat = match state.combat_state.as_ref() {
                    Some(combat) => combat,
                    None => return,
                };
                state
                    .toll_paid
                    .iter()
                    .filter(|gid| {
                        combat
                            .participants
                            .get(*gid)
                            .map(|p| p.fighters == 0)
                            .unwrap_or(true)
                    })
                    .cloned()
                    .collect()
            };
            for gid in stale {
                state.toll_paid.remove(&gid);
            }

            if let Some(combat) = state.combat_state.as_mut() {
                if let Some(round) = payload["round"].as_u64() {
                    combat.round = round as u32;
                }
                combat.last_round = Some(payload.clone());
                combat.history.push(payload.clone());
                combat.last_event = Some(names::COMBAT_ROUND_RESOLVED.to_string());
            }
        }

        self.enqueue_combat_event(names::COMBAT_ROUND_RESOLVED, payload);
        self.combat_notify.notify_waiters();
    }

    fn on_combat_ended(&self, payload: &Value) {
        {
            let mut state = lock(&self.state);
            let matches = state
                .combat_state
                .as_ref()
                .map(|combat| payload["combat_id"].as_str() == Some(combat.combat_id.as_str()))
                .unwrap_or(false);
            if !matches {
                return;
            }

            apply_ship_info(&mut state, payload);

            if let Some(combat) = state.combat_state.as_mut() {
                combat.last_round = Some(payload.clone());
                combat.history.push(payload.clone());
                combat.result = payload["result"]
                    .as_str()
                    .or_else(|| payload["end"].as_str())
                    .map(|s| s.to_string());
                combat.salvage = payload["salvage"].as_array().cloned().unwrap_or_default();
                combat.last_event = Some(names::COMBAT_ENDED.to_string());
            }
            state.combat_active = false;
            state.toll_paid.clear();
        }

        self.enqueue_combat_event(names::COMBAT_ENDED, payload);
        self.combat_notify.notify_waiters();
    }

    fn enqueue_combat_event(&self, event_name: &str, payload: &Value) {
        let snapshot = match lock(&self.state).combat_state.clone() {
            Some(snapshot) => snapshot,
            None => return,
        };
        lock(&self.queue).push_back((event_name.to_string(), snapshot, payload.clone()));
        self.queue_notify.notify_one();
    }

    fn bump_occupants(&self) {
        lock(&self.state).occupant_version += 1;
        self.occupant_notify.notify_waiters();
    }
}

fn extract_sector_id(value: &Value) -> Option<i64> {
    value["id"].as_i64().or_else(|| value.as_i64())
}

fn parse_participants(payload: &Value) -> BTreeMap<String, CombatParticipant> {
    let mut parsed = BTreeMap::new();
    match &payload["participants"] {
        Value::Object(entries) => {
            for (pid, info) in entries {
                let combatant_id = info["combatant_id"]
                    .as_str()
                    .unwrap_or(pid.as_str())
                    .to_string();
                parsed.insert(
                    pid.clone(),
                    CombatParticipant {
                        name: info["name"]
                            .as_str()
                            .unwrap_or(combatant_id.as_str())
                            .to_string(),
                        combatant_id,
                        kind: info["type"].as_str().unwrap_or("character").to_string(),
                        fighters: info["fighters"].as_u64().unwrap_or(0) as u32,
                        shields: info["shields"].as_u64().unwrap_or(0) as u32,
                        max_fighters: info["max_fighters"].as_u64().unwrap_or(0) as u32,
                        max_shields: info["max_shields"].as_u64().unwrap_or(0) as u32,
                        turns_per_warp: info["turns_per_warp"].as_i64().unwrap_or(0) as i32,
                        owner: info["owner"].as_str().map(|s| s.to_string()),
                    },
                );
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                let name = entry["name"].as_str();
                let combatant_id = entry["combatant_id"].as_str().or(name);
                let identifier = match combatant_id {
                    Some(id) => id.to_string(),
                    None => continue,
                };
                parsed.insert(
                    identifier.clone(),
                    CombatParticipant {
                        combatant_id: identifier.clone(),
                        name: name.unwrap_or(identifier.as_str()).to_string(),
                        kind: entry["player_type"]
                            .as_str()
                            .unwrap_or("character")
                            .to_string(),
                        fighters: entry["fighters"].as_u64().unwrap_or(0) as u32,
                        shields: entry["shields"].as_u64().unwrap_or(0) as u32,
                        max_fighters: entry["max_fighters"].as_u64().unwrap_or(0) as u32,
                        max_shields: entry["max_shields"].as_u64().unwrap_or(0) as u32,
                        turns_per_warp: entry["turns_per_warp"].as_i64().unwrap_or(0) as i32,
                        owner: entry["owner"].as_str().map(|s| s.to_string()),
                    },
                );
            }
        }
        _ => {}
    }
    parsed
}

fn add_garrison_participant(payload: &Value, participants: &mut BTreeMap<String, CombatParticipant>) {
    let garrison = &payload["garrison"];
    if !garrison.is_object() {
        return;
    }
    let sector = match extract_sector_id(&payload["sector"]) {
        Some(sector) => sector,
        None => return,
    };
    let owner_name = match garrison["owner_name"].as_str() {
        Some(owner) => owner,
        None => return,
    };
    let fighters = garrison["fighters"].as_u64().unwrap_or(0) as u32;
    if fighters == 0 {
        return;
    }
    let garrison_id = format!("garrison:{}:{}", sector, owner_name);
    participants.insert(
        garrison_id.clone(),
        CombatParticipant {
            combatant_id: garrison_id,
            name: format!("{}'s garrison", owner_name),
            kind: "garrison".to_string(),
            fighters,
            shields: 0,
            max_fighters: fighters,
            max_shields: 0,
            turns_per_warp: 0,
            owner: Some(owner_name.to_string()),
        },
    );
}

fn resolve_player_combatant_id(
    participants: &BTreeMap<String, CombatParticipant>,
    character_id: &str,
) -> Option<String> {
    participants
        .values()
        .find(|p| p.combatant_id == character_id)
        .or_else(|| {
            participants
                .values()
                .find(|p| p.owner.as_deref() == Some(character_id))
        })
        .map(|p| p.combatant_id.clone())
}

fn apply_ship_info(state: &mut SessionState, payload: &Value) {
    let ship = &payload["ship"];
    if !ship.is_object() {
        return;
    }
    let player_id = match state.player_combatant_id.clone() {
        Some(id) => id,
        None => return,
    };
    if let Some(combat) = state.combat_state.as_mut() {
        if let Some(participant) = combat.participants.get_mut(&player_id) {
            if let Some(fighters) = ship["fighters"].as_u64() {
                participant.fighters = fighters as u32;
            }
            if let Some(max_fighters) = ship["max_fighters"].as_u64() {
                participant.max_fighters = max_fighters as u32;
            }
            if let Some(shields) = ship["shields"].as_u64() {
                participant.shields = shields as u32;
            }
            if let Some(max_shields) = ship["max_shields"].as_u64() {
                participant.max_shields = max_shields as u32;
            }
        }
    }
}

fn apply_garrison_fighters(state: &mut SessionState, payload: &Value) {
    let garrison = &payload["garrison"];
    if !garrison.is_object() {
        return;
    }
    let fighters = match garrison["fighters"].as_u64() {
        Some(f) => f as u32,
        None => return,
    };
    if let Some(combat) = state.combat_state.as_mut() {
        let sector = match combat.sector {
            Some(sector) => sector,
            None => return,
        };
        let owner_name = garrison["owner_name"].as_str().unwrap_or("garrison");
        let garrison_id = format!("garrison:{}:{}", sector, owner_name);
        if let Some(participant) = combat.participants.get_mut(&garrison_id) {
            participant.fighters = fighters;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
