//! Game server API client.
//!
//! [`AsyncGameClient`] multiplexes one WebSocket connection between RPC
//! request/response pairs and server-pushed events. RPC frames are
//! correlated by UUID; event frames are normalized into [`GameEvent`]s and
//! fanned out to registered handlers and per-event FIFO queues.
//!
//! The client is bound to exactly one character for its lifetime. Requests
//! naming a different `character_id` are rejected locally before
//! transmission, and `character.moved` events describing the bound
//! character's own movement are suppressed before dispatch.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::voidlane::error::GameError;
use crate::voidlane::event::{names, EventQueue, GameEvent, SummaryRegistry};
use crate::voidlane::summaries::default_registry;

/// Boxed async event handler stored per event name.
pub type EventHandlerFn =
    Arc<dyn Fn(GameEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Token returned by [`AsyncGameClient::add_event_handler`]; pass it back to
/// [`AsyncGameClient::remove_event_handler`] to detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerToken {
    event_name: String,
    id: u64,
}

/// One item a ship dumps overboard via `dump_cargo`.
#[derive(Debug, Clone, Serialize)]
pub struct CargoItem {
    pub commodity: String,
    pub units: u32,
}

#[derive(Serialize)]
struct CombatActionRequest<'a> {
    character_id: &'a str,
    combat_id: &'a str,
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_sector: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    round: Option<u32>,
}

#[derive(Serialize)]
struct GarrisonRequest<'a> {
    character_id: &'a str,
    sector: i64,
    quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    toll_amount: Option<i64>,
}

struct ClientInner {
    base_url: String,
    character_id: String,
    actor_character_id: RwLock<Option<String>>,
    registry: RwLock<SummaryRegistry>,

    writer: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,

    handlers: RwLock<HashMap<String, Vec<(u64, EventHandlerFn)>>>,
    next_handler_id: AtomicU64,
    queues: Mutex<HashMap<String, EventQueue>>,

    delivery_enabled: AtomicBool,
    buffered_events: Mutex<Vec<GameEvent>>,

    seen_error_request_ids: Mutex<HashSet<String>>,
    current_sector: Mutex<Option<i64>>,
}

/// Async client for the voidlane game server.
#[derive(Clone)]
pub struct AsyncGameClient {
    inner: Arc<ClientInner>,
}

impl AsyncGameClient {
    /// Create a client bound to `character_id`. No connection is made until
    /// the first RPC (or an explicit [`connect`](Self::connect)).
    pub fn new(base_url: impl Into<String>, character_id: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            inner: Arc::new(ClientInner {
                base_url: base_url.trim_end_matches('/').to_string(),
                character_id: character_id.into(),
                actor_character_id: RwLock::new(None),
                registry: RwLock::new(default_registry()),
                writer: Mutex::new(None),
                reader_task: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                next_handler_id: AtomicU64::new(1),
                queues: Mutex::new(HashMap::new()),
                delivery_enabled: AtomicBool::new(true),
                buffered_events: Mutex::new(Vec::new()),
                seen_error_request_ids: Mutex::new(HashSet::new()),
                current_sector: Mutex::new(None),
            }),
        }
    }

    /// Configure the actor issuing commands when this client controls a
    /// corporation ship (builder pattern).
    pub fn with_actor_character_id(self, actor_character_id: impl Into<String>) -> Self {
        if let Ok(mut slot) = self.inner.actor_character_id.write() {
            *slot = Some(actor_character_id.into());
        }
        self
    }

    /// The character this client is bound to (immutable).
    pub fn character_id(&self) -> &str {
        &self.inner.character_id
    }

    /// Latest sector observed from movement/status events, if any.
    pub fn current_sector(&self) -> Option<i64> {
        self.inner.current_sector.lock().ok().and_then(|s| *s)
    }

    /// Replace or add a summary formatter for an event/endpoint name.
    pub fn register_summary_formatter(
        &self,
        name: impl Into<String>,
        formatter: crate::voidlane::event::SummaryFormatter,
    ) {
        if let Ok(mut registry) = self.inner.registry.write() {
            registry.register(name, formatter);
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Establish the WebSocket connection and start the reader task.
    pub async fn connect(&self) -> Result<(), GameError> {
        {
            let writer = lock(&self.inner.writer);
            if writer.is_some() {
                return Ok(());
            }
        }
        let ws_url = ws_url(&self.inner.base_url);
        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|err| GameError::Transport(format!("connect {}: {}", ws_url, err)))?;
        let (mut sink, mut source) = stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let inner = Arc::clone(&self.inner);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        ClientInner::handle_frame(&inner, text.as_str()).await;
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            inner.fail_pending("WebSocket connection lost");
        });

        *lock(&self.inner.writer) = Some(tx);
        *lock(&self.inner.reader_task) = Some(reader);
        Ok(())
    }

    /// Tear down the connection, failing any in-flight RPCs.
    pub async fn close(&self) {
        if let Some(task) = lock(&self.inner.reader_task).take() {
            task.abort();
        }
        lock(&self.inner.writer).take();
        self.inner.fail_pending("client closed");
    }

    // ------------------------------------------------------------------
    // Event subscription
    // ------------------------------------------------------------------

    /// Register an async handler for an event name; returns a removal token.
    pub fn add_event_handler<F, Fut>(&self, event_name: impl Into<String>, handler: F) -> HandlerToken
    where
        F: Fn(GameEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let event_name = event_name.into();
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let wrapped: EventHandlerFn = Arc::new(move |event| Box::pin(handler(event)));
        if let Ok(mut handlers) = self.inner.handlers.write() {
            handlers
                .entry(event_name.clone())
                .or_insert_with(Vec::new)
                .push((id, wrapped));
        }
        HandlerToken { event_name, id }
    }

    /// Remove a previously registered handler. Returns whether one was
    /// removed.
    pub fn remove_event_handler(&self, token: &HandlerToken) -> bool {
        let mut removed = false;
        if let Ok(mut handlers) = self.inner.handlers.write() {
            if let Some(bucket) = handlers.get_mut(&token.event_name) {
                let before = bucket.len();
                bucket.retain(|(id, _)| *id != token.id);
                removed = bucket.len() != before;
                if bucket.is_empty() {
                    handlers.remove(&token.event_name);
                }
            }
        }
        removed
    }

    /// FIFO queue of events for `event_name`, created lazily on first
    /// access. All events of that name are enqueued whether or not anybody
    /// is consuming.
    pub fn get_event_queue(&self, event_name: &str) -> EventQueue {
        lock(&self.inner.queues)
            .entry(event_name.to_string())
            .or_insert_with(EventQueue::new)
            .clone()
    }

    /// Wait for one event matching `predicate` (any event of the name when
    /// `None`). The handler detaches on first match or timeout.
    pub async fn wait_for_event(
        &self,
        event_name: &str,
        predicate: Option<Box<dyn Fn(&GameEvent) -> bool + Send + Sync>>,
        timeout: Option<std::time::Duration>,
    ) -> Result<GameEvent, GameError> {
        let (tx, rx) = oneshot::channel::<GameEvent>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let predicate = predicate.map(Arc::new);

        let sender_slot = Arc::clone(&slot);
        let token = self.add_event_handler(event_name, move |event: GameEvent| {
            let sender_slot = Arc::clone(&sender_slot);
            let predicate = predicate.clone();
            async move {
                if let Some(predicate) = &predicate {
                    if !predicate(&event) {
                        return;
                    }
                }
                if let Ok(mut slot) = sender_slot.lock() {
                    if let Some(tx) = slot.take() {
                        let _ = tx.send(event);
                    }
                }
            }
        });

        let result = match timeout {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(_)) => Err(GameError::Transport("event channel dropped".to_string())),
                Err(_) => Err(GameError::Timeout(format!(
                    "no {} event within {:?}",
                    event_name, duration
                ))),
            },
            None => rx
                .await
                .map_err(|_| GameError::Transport("event channel dropped".to_string())),
        };
        self.remove_event_handler(&token);
        result
    }

    /// Buffer incoming events instead of delivering them. RPC replies keep
    /// flowing.
    pub async fn pause_event_delivery(&self) {
        self.inner.delivery_enabled.store(false, Ordering::SeqCst);
    }

    /// Re-enable delivery and flush buffered events in FIFO order.
    pub async fn resume_event_delivery(&self) {
        if self.inner.delivery_enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending: Vec<GameEvent> = lock(&self.inner.buffered_events).drain(..).collect();
        for event in pending {
            self.inner.deliver_event(event);
        }
    }

    /// Deliver a locally synthesized event through the normal envelope path,
    /// as if it had arrived from the server. Used for RPC-error synthesis
    /// and idle completion, and by tests.
    pub fn dispatch_local_event(&self, event_name: &str, payload: Value) {
        self.inner.process_event(event_name, payload);
    }

    // ------------------------------------------------------------------
    // RPC plumbing
    // ------------------------------------------------------------------

    /// Send an RPC frame and await the correlated reply.
    ///
    /// A payload naming a `character_id` other than the bound character is
    /// rejected locally. Error replies synthesize exactly one `error` event
    /// (keyed by request id) and surface as [`GameError::Rpc`].
    pub async fn request(&self, endpoint: &str, payload: Value) -> Result<Value, GameError> {
        if let Some(character_id) = payload.get("character_id").and_then(|v| v.as_str()) {
            if character_id != self.inner.character_id {
                return Err(GameError::validation(format!(
                    "client is bound to character {}; cannot act as {}",
                    self.inner.character_id, character_id
                )));
            }
        }
        self.connect().await?;

        let mut enriched = payload;
        if let Ok(actor) = self.inner.actor_character_id.read() {
            if let Some(actor_id) = actor.as_deref() {
                if let Some(object) = enriched.as_object_mut() {
                    object
                        .entry("actor_character_id")
                        .or_insert_with(|| json!(actor_id));
                }
            }
        }

        let request_id = Uuid::new_v4().to_string();
        let frame = json!({
            "id": request_id,
            "type": "rpc",
            "endpoint": endpoint,
            "payload": enriched,
        });

        let (tx, rx) = oneshot::channel::<Value>();
        lock(&self.inner.pending).insert(request_id.clone(), tx);

        let sent = {
            let writer = lock(&self.inner.writer);
            match writer.as_ref() {
                Some(sender) => sender.send(WsMessage::text(frame.to_string())).is_ok(),
                None => false,
            }
        };
        if !sent {
            lock(&self.inner.pending).remove(&request_id);
            return Err(GameError::Transport("not connected".to_string()));
        }

        let reply = rx
            .await
            .map_err(|_| GameError::Transport("WebSocket connection lost".to_string()))?;

        if !reply["ok"].as_bool().unwrap_or(false) {
            let error = reply["error"].clone();
            self.inner
                .synthesize_error_event(endpoint, Some(&request_id), &error);
            return Err(GameError::Rpc {
                endpoint: endpoint.to_string(),
                status: error["status"].as_u64().unwrap_or(500) as u16,
                detail: error["detail"]
                    .as_str()
                    .unwrap_or("Unknown error")
                    .to_string(),
                code: error["code"].as_str().map(|s| s.to_string()),
            });
        }

        let result = reply.get("result").cloned().unwrap_or_else(|| json!({}));
        self.inner
            .maybe_synthesize_error_from_result(endpoint, Some(&request_id), &result);
        Ok(result)
    }

    // ------------------------------------------------------------------
    // API methods (core-touching subset)
    // ------------------------------------------------------------------

    /// Current player/ship/sector snapshot; completion arrives as a
    /// `status.snapshot` event.
    pub async fn my_status(&self) -> Result<Value, GameError> {
        self.request("my_status", json!({ "character_id": self.inner.character_id }))
            .await
    }

    /// Plot a course toward `to_sector`.
    pub async fn plot_course(&self, to_sector: i64) -> Result<Value, GameError> {
        self.request(
            "plot_course",
            json!({ "character_id": self.inner.character_id, "to_sector": to_sector }),
        )
        .await
    }

    /// Map tiles around the current (or given) center sector.
    pub async fn local_map_region(&self, center_sector: Option<i64>) -> Result<Value, GameError> {
        self.request(
            "local_map_region",
            json!({ "character_id": self.inner.character_id, "center_sector": center_sector }),
        )
        .await
    }

    /// Known ports reachable from the current sector.
    pub async fn list_known_ports(&self) -> Result<Value, GameError> {
        self.request(
            "list_known_ports",
            json!({ "character_id": self.inner.character_id }),
        )
        .await
    }

    /// Start moving to an adjacent sector; completion arrives as a
    /// `movement.complete` event.
    pub async fn move_to(&self, to_sector: i64) -> Result<Value, GameError> {
        self.request(
            "move",
            json!({ "character_id": self.inner.character_id, "to_sector": to_sector }),
        )
        .await
    }

    /// Buy or sell a commodity at the local port.
    pub async fn trade(
        &self,
        trade_type: &str,
        commodity: &str,
        units: u32,
    ) -> Result<Value, GameError> {
        self.request(
            "trade",
            json!({
                "character_id": self.inner.character_id,
                "trade_type": trade_type,
                "commodity": commodity,
                "units": units,
            }),
        )
        .await
    }

    /// Open combat against a target in the current sector.
    pub async fn combat_initiate(
        &self,
        target_id: Option<&str>,
        target_type: Option<&str>,
    ) -> Result<Value, GameError> {
        self.request(
            "combat.initiate",
            json!({
                "character_id": self.inner.character_id,
                "target_id": target_id,
                "target_type": target_type,
            }),
        )
        .await
    }

    /// Submit this round's combat action.
    pub async fn combat_action(
        &self,
        combat_id: &str,
        action: &str,
        commit: Option<u32>,
        target_id: Option<&str>,
        to_sector: Option<i64>,
        round: Option<u32>,
    ) -> Result<Value, GameError> {
        let request = CombatActionRequest {
            character_id: &self.inner.character_id,
            combat_id,
            action,
            commit,
            target_id,
            to_sector,
            round,
        };
        self.request("combat.action", serde_json::to_value(&request)?)
            .await
    }

    /// Station fighters in a sector as a garrison.
    pub async fn combat_leave_fighters(
        &self,
        sector: i64,
        quantity: u32,
        mode: &str,
        toll_amount: i64,
    ) -> Result<Value, GameError> {
        let request = GarrisonRequest {
            character_id: &self.inner.character_id,
            sector,
            quantity,
            mode: Some(mode),
            toll_amount: Some(toll_amount),
        };
        self.request("combat.leave_fighters", serde_json::to_value(&request)?)
            .await
    }

    /// Pick stationed fighters back up.
    pub async fn combat_collect_fighters(
        &self,
        sector: i64,
        quantity: u32,
    ) -> Result<Value, GameError> {
        let request = GarrisonRequest {
            character_id: &self.inner.character_id,
            sector,
            quantity,
            mode: None,
            toll_amount: None,
        };
        self.request("combat.collect_fighters", serde_json::to_value(&request)?)
            .await
    }

    /// Change a deployed garrison's mode / toll.
    pub async fn combat_set_garrison_mode(
        &self,
        sector: i64,
        mode: &str,
        toll_amount: i64,
    ) -> Result<Value, GameError> {
        self.request(
            "combat.set_garrison_mode",
            json!({
                "character_id": self.inner.character_id,
                "sector": sector,
                "mode": mode,
                "toll_amount": toll_amount,
            }),
        )
        .await
    }

    /// Claim a salvage container in the current sector.
    pub async fn salvage_collect(&self, salvage_id: &str) -> Result<Value, GameError> {
        self.request(
            "salvage.collect",
            json!({
                "character_id": self.inner.character_id,
                "salvage_id": salvage_id,
            }),
        )
        .await
    }

    /// Jettison cargo, producing a salvage container.
    pub async fn dump_cargo(&self, items: Vec<CargoItem>) -> Result<Value, GameError> {
        self.request(
            "dump_cargo",
            json!({
                "character_id": self.inner.character_id,
                "items": items,
            }),
        )
        .await
    }

    /// Send a chat message (broadcast or direct).
    pub async fn send_message(
        &self,
        recipient: Option<&str>,
        message: &str,
    ) -> Result<Value, GameError> {
        self.request(
            "send_message",
            json!({
                "character_id": self.inner.character_id,
                "recipient": recipient,
                "message": message,
            }),
        )
        .await
    }

    /// Emit a task lifecycle marker (`task.start` / `task.finish`).
    pub async fn task_lifecycle(
        &self,
        task_id: &str,
        event_type: &str,
        task_description: Option<&str>,
        task_summary: Option<&str>,
        task_status: Option<&str>,
    ) -> Result<Value, GameError> {
        self.request(
            "task_lifecycle",
            json!({
                "character_id": self.inner.character_id,
                "task_id": task_id,
                "event_type": event_type,
                "task_description": task_description,
                "task_summary": task_summary,
                "task_status": task_status,
            }),
        )
        .await
    }
}

impl ClientInner {
    async fn handle_frame(inner: &Arc<ClientInner>, text: &str) {
        let msg: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return,
        };

        if msg["frame_type"].as_str() == Some("event") {
            let event_name = match msg["event"].as_str() {
                Some(name) => name.to_string(),
                None => return,
            };
            let payload = msg.get("payload").cloned().unwrap_or_else(|| json!({}));
            inner.process_event(&event_name, payload);
            return;
        }

        if let Some(request_id) = msg["id"].as_str() {
            let sender = lock(&inner.pending).remove(request_id);
            if let Some(sender) = sender {
                let _ = sender.send(msg);
            }
        }
    }

    fn fail_pending(&self, _reason: &str) {
        // Dropping the senders resolves every waiting future with a
        // connection-lost error on the receiver side.
        lock(&self.pending).clear();
    }

    fn process_event(&self, event_name: &str, payload: Value) {
        if event_name == names::CHARACTER_MOVED && self.is_self_movement(&payload) {
            return;
        }
        if event_name == names::ERROR {
            if let Some(request_id) = payload["source"]["request_id"].as_str() {
                lock(&self.seen_error_request_ids).insert(request_id.to_string());
            }
        }

        self.update_current_sector(event_name, &payload);

        let summary = self
            .registry
            .read()
            .ok()
            .and_then(|registry| registry.summarize(event_name, &payload));
        let event = GameEvent {
            event_name: event_name.to_string(),
            payload,
            summary,
        };

        if !self.delivery_enabled.load(Ordering::SeqCst) {
            lock(&self.buffered_events).push(event);
            return;
        }
        self.deliver_event(event);
    }

    fn deliver_event(&self, event: GameEvent) {
        lock(&self.queues)
            .entry(event.event_name.clone())
            .or_insert_with(EventQueue::new)
            .push(event.clone());

        let handlers: Vec<EventHandlerFn> = self
            .handlers
            .read()
            .ok()
            .and_then(|handlers| {
                handlers
                    .get(&event.event_name)
                    .map(|bucket| bucket.iter().map(|(_, h)| Arc::clone(h)).collect())
            })
            .unwrap_or_default();
        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                handler(event).await;
            });
        }
    }

    fn is_self_movement(&self, payload: &Value) -> bool {
        let mover_id = payload["player"]["id"]
            .as_str()
            .or_else(|| payload["character_id"].as_str());
        let mover_name = payload["player"]["name"]
            .as_str()
            .or_else(|| payload["name"].as_str());
        mover_id == Some(self.character_id.as_str())
            || mover_name == Some(self.character_id.as_str())
    }

    fn update_current_sector(&self, event_name: &str, payload: &Value) {
        let sector_id = match event_name {
            names::MOVEMENT_COMPLETE | names::STATUS_SNAPSHOT | names::STATUS_UPDATE => {
                payload["sector"]["id"].as_i64()
            }
            "map.local" | "local_map_region" => payload["center_sector"].as_i64(),
            _ => None,
        }
        .or_else(|| payload["current_sector"].as_i64());

        if let Some(sector_id) = sector_id {
            if let Ok(mut slot) = self.current_sector.lock() {
                *slot = Some(sector_id);
            }
        }
    }

    fn synthesize_error_event(
        &self,
        endpoint: &str,
        request_id: Option<&str>,
        error_payload: &Value,
    ) {
        if let Some(request_id) = request_id {
            if lock(&self.seen_error_request_ids).contains(request_id) {
                return;
            }
        }

        let detail = error_payload["detail"].as_str().unwrap_or("Unknown error");
        let source_request_id = request_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut payload = json!({
            "endpoint": endpoint,
            "error": detail,
            "source": {
                "type": "rpc",
                "method": endpoint,
                "request_id": source_request_id,
                "timestamp": Utc::now().to_rfc3339(),
            },
            "synthesized": true,
        });
        if let Some(status) = error_payload.get("status") {
            if !status.is_null() {
                payload["status"] = status.clone();
            }
        }
        if let Some(code) = error_payload.get("code") {
            if !code.is_null() {
                payload["code"] = code.clone();
            }
        }

        lock(&self.seen_error_request_ids).insert(source_request_id);
        self.process_event(names::ERROR, payload);
    }

    fn maybe_synthesize_error_from_result(
        &self,
        endpoint: &str,
        request_id: Option<&str>,
        result: &Value,
    ) {
        if result["success"].as_bool() != Some(false) {
            return;
        }
        let error_text = match result["error"].as_str() {
            Some(text) if !text.is_empty() => text,
            _ => return,
        };
        debug!(
            "RPC {} reported soft failure: {}",
            endpoint, error_text
        );
        let mut error_payload = json!({ "detail": error_text });
        if let Some(status) = result.get("status") {
            if !status.is_null() {
                error_payload["status"] = status.clone();
            }
        }
        if let Some(code) = result.get("code") {
            if !code.is_null() {
                error_payload["code"] = code.clone();
            }
        }
        self.synthesize_error_event(endpoint, request_id, &error_payload);
    }
}

fn ws_url(base_url: &str) -> String {
    let swapped = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!("{}/ws", swapped.trim_end_matches('/'))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("client lock poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn client() -> AsyncGameClient {
        AsyncGameClient::new("http://localhost:8000", "zara")
    }

    #[test]
    fn test_ws_url_conversion() {
        assert_eq!(ws_url("http://localhost:8000"), "ws://localhost:8000/ws");
        assert_eq!(ws_url("https://play.example"), "wss://play.example/ws");
    }

    #[tokio::test]
    async fn test_binding_rejects_other_character() {
        let client = client();
        let err = client
            .request("my_status", json!({ "character_id": "someone_else" }))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));
    }

    #[tokio::test]
    async fn test_event_dispatch_reaches_handlers_and_queue() {
        let client = client();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        client.add_event_handler("trade.executed", move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let queue = client.get_event_queue("trade.executed");

        client.dispatch_local_event("trade.executed", json!({"trade": {"units": 3}}));
        let event = queue.recv().await;
        assert_eq!(event.event_name, "trade.executed");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_self_movement_suppressed() {
        let client = client();
        let queue = client.get_event_queue("character.moved");
        client.dispatch_local_event(
            "character.moved",
            json!({"player": {"id": "zara"}, "movement": "arrive"}),
        );
        assert!(queue.is_empty());

        client.dispatch_local_event(
            "character.moved",
            json!({"player": {"id": "kel", "name": "kel"}, "movement": "arrive"}),
        );
        assert!(!queue.is_empty());
    }

    #[tokio::test]
    async fn test_pause_buffers_and_resume_flushes_fifo() {
        let client = client();
        let queue = client.get_event_queue("chat.message");
        client.pause_event_delivery().await;
        client.dispatch_local_event("chat.message", json!({"message": "first"}));
        client.dispatch_local_event("chat.message", json!({"message": "second"}));
        assert!(queue.is_empty());

        client.resume_event_delivery().await;
        assert_eq!(queue.recv().await.payload["message"], "first");
        assert_eq!(queue.recv().await.payload["message"], "second");
    }

    #[tokio::test]
    async fn test_error_event_synthesized_once_per_request() {
        let client = client();
        let queue = client.get_event_queue("error");
        let error = json!({"detail": "no such sector", "status": 404});
        client
            .inner
            .synthesize_error_event("move", Some("req-1"), &error);
        client
            .inner
            .synthesize_error_event("move", Some("req-1"), &error);

        let event = queue.recv().await;
        assert_eq!(event.payload["source"]["request_id"], "req-1");
        assert_eq!(event.payload["error"], "no such sector");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_rpc_reply_correlation() {
        let client = client();
        let (tx, rx) = oneshot::channel::<Value>();
        lock(&client.inner.pending).insert("req-9".to_string(), tx);

        ClientInner::handle_frame(
            &client.inner,
            &json!({"id": "req-9", "ok": true, "result": {"fine": true}}).to_string(),
        )
        .await;
        let reply = rx.await.expect("reply");
        assert_eq!(reply["result"]["fine"], true);
    }

    #[tokio::test]
    async fn test_wait_for_event_with_predicate_and_timeout() {
        let client = client();
        let waiter = client.clone();
        let handle = tokio::spawn(async move {
            waiter
                .wait_for_event(
                    "sector.update",
                    Some(Box::new(|event: &GameEvent| {
                        event.payload["id"].as_i64() == Some(7)
                    })),
                    Some(std::time::Duration::from_secs(2)),
                )
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.dispatch_local_event("sector.update", json!({"id": 3}));
        client.dispatch_local_event("sector.update", json!({"id": 7}));
        let event = handle.await.expect("join").expect("event");
        assert_eq!(event.payload["id"], 7);

        let timed_out = client
            .wait_for_event(
                "sector.update",
                Some(Box::new(|_| false)),
                Some(std::time::Duration::from_millis(30)),
            )
            .await;
        assert!(matches!(timed_out, Err(GameError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_current_sector_cache_updates() {
        let client = client();
        client.dispatch_local_event("status.update", json!({"sector": {"id": 42}}));
        assert_eq!(client.current_sector(), Some(42));
        client.dispatch_local_event("map.local", json!({"center_sector": 17}));
        assert_eq!(client.current_sector(), Some(17));
    }
}
