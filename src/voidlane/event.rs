//! Event envelope, per-event FIFO queues, and the summary registry.
//!
//! Every inbound event is normalized into a [`GameEvent`] before it reaches
//! handlers or queues: `{event_name, payload, summary?}`. Summaries are
//! produced by formatter functions registered per event name on a
//! [`SummaryRegistry`] owned by the client instance; components configure
//! formatters at construction time rather than patching globals.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Notify;

/// Well-known event names used throughout the crate.
///
/// Events outside this list still flow through the system; these constants
/// just keep the combat-core call sites typo-proof.
pub mod names {
    pub const STATUS_UPDATE: &str = "status.update";
    pub const STATUS_SNAPSHOT: &str = "status.snapshot";
    pub const SECTOR_UPDATE: &str = "sector.update";
    pub const CHARACTER_MOVED: &str = "character.moved";
    pub const MOVEMENT_START: &str = "movement.start";
    pub const MOVEMENT_COMPLETE: &str = "movement.complete";
    pub const COMBAT_ROUND_WAITING: &str = "combat.round_waiting";
    pub const COMBAT_ROUND_RESOLVED: &str = "combat.round_resolved";
    pub const COMBAT_ENDED: &str = "combat.ended";
    pub const COMBAT_ACTION_ACCEPTED: &str = "combat.action_accepted";
    pub const SALVAGE_CREATED: &str = "salvage.created";
    pub const SALVAGE_COLLECTED: &str = "salvage.collected";
    pub const GARRISON_DEPLOYED: &str = "garrison.deployed";
    pub const GARRISON_COLLECTED: &str = "garrison.collected";
    pub const GARRISON_COMBAT_ALERT: &str = "garrison.combat_alert";
    pub const GARRISON_CHARACTER_MOVED: &str = "garrison.character_moved";
    pub const TRADE_EXECUTED: &str = "trade.executed";
    pub const CHAT_MESSAGE: &str = "chat.message";
    pub const ERROR: &str = "error";
    pub const TASK_START: &str = "task.start";
    pub const TASK_FINISH: &str = "task.finish";
    pub const IDLE_COMPLETE: &str = "idle.complete";
}

/// Normalized event delivered to handlers and queues.
#[derive(Debug, Clone)]
pub struct GameEvent {
    /// Dotted event name, e.g. `"combat.round_resolved"`.
    pub event_name: String,
    /// Raw payload as received (or synthesized).
    pub payload: Value,
    /// Short human-readable summary when a formatter is registered.
    pub summary: Option<String>,
}

impl GameEvent {
    /// Event with no summary attached.
    pub fn new(event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
            summary: None,
        }
    }
}

/// Formatter turning an event payload into a one-line summary.
///
/// Returning `None` leaves the event without a summary.
pub type SummaryFormatter = fn(&Value) -> Option<String>;

/// Registration map of event/endpoint name → summary formatter.
///
/// Owned by the client instance; see
/// [`default_registry`](crate::voidlane::summaries::default_registry) for the
/// stock formatter set.
#[derive(Clone, Default)]
pub struct SummaryRegistry {
    formatters: HashMap<String, SummaryFormatter>,
}

impl SummaryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a formatter for an event or endpoint name, replacing any
    /// previous registration.
    pub fn register(&mut self, name: impl Into<String>, formatter: SummaryFormatter) {
        self.formatters.insert(name.into(), formatter);
    }

    /// Run the registered formatter, if any; empty summaries are discarded.
    pub fn summarize(&self, name: &str, payload: &Value) -> Option<String> {
        let formatter = self.formatters.get(name)?;
        let summary = formatter(payload)?;
        let trimmed = summary.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formatters.contains_key(name)
    }
}

struct QueueInner {
    items: Mutex<VecDeque<GameEvent>>,
    notify: Notify,
}

/// Unbounded FIFO queue of [`GameEvent`]s for consumers that prefer awaiting
/// messages over registering handlers.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue an event, waking one waiting consumer.
    pub fn push(&self, event: GameEvent) {
        if let Ok(mut items) = self.inner.items.lock() {
            items.push_back(event);
        }
        self.inner.notify.notify_one();
    }

    /// Pop the next event without waiting.
    pub fn try_recv(&self) -> Option<GameEvent> {
        self.inner
            .items
            .lock()
            .ok()
            .and_then(|mut items| items.pop_front())
    }

    /// Await the next event (FIFO).
    pub async fn recv(&self) -> GameEvent {
        loop {
            if let Some(event) = self.try_recv() {
                return event;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .items
            .lock()
            .map(|items| items.is_empty())
            .unwrap_or(true)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
