//! Event-gated task execution loop.
//!
//! The [`TaskAgent`] wraps an [`LlmService`] in a reactor: game events and
//! tool completions accumulate into the model's context, and an explicit
//! scheduling state machine decides when the next inference runs. Tools come
//! in two flavours:
//!
//! - **Sync tools** return their data in the tool-result message. When a
//!   matching server event also arrives (see
//!   [`sync_tool_event`](crate::voidlane::tool_protocol::sync_tool_event)),
//!   that event is dropped from context so the data is not duplicated.
//! - **Async completion tools** return `{"status": "Executed."}` immediately
//!   and defer the next inference until their completion event arrives (or a
//!   timeout fires). The awaiting flag is armed *before* the tool body runs,
//!   so a completion event racing the tool's own RPC reply is still consumed
//!   and releases exactly one inference.
//!
//! The reactor owns three deadline slots (the event-batch debounce, the
//! async-completion timeout, and the no-tool-call watchdog) and one wake
//! signal; the run loop sleeps until the earliest of them or the next wake.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::voidlane::client::{AsyncGameClient, HandlerToken};
use crate::voidlane::config::TaskAgentConfig;
use crate::voidlane::error::GameError;
use crate::voidlane::event::{names, GameEvent};
use crate::voidlane::llm::{ChatMessage, LlmService, LlmTurn, ToolCallRequest};
use crate::voidlane::tool_protocol::{async_completion_event, sync_tool_event, ToolRegistry};

/// Event names the agent subscribes to and forwards into model context.
const EVENT_NAMES: [&str; 33] = [
    "status.snapshot",
    "status.update",
    "sector.update",
    "course.plot",
    "path.region",
    "movement.start",
    "movement.complete",
    "map.region",
    "map.local",
    "ports.list",
    "character.moved",
    "trade.executed",
    "port.update",
    "warp.purchase",
    "warp.transfer",
    "garrison.deployed",
    "garrison.collected",
    "garrison.mode_changed",
    "salvage.collected",
    "salvage.created",
    "combat.round_waiting",
    "combat.round_resolved",
    "combat.ended",
    "combat.action_accepted",
    "ship.destroyed",
    "ship.renamed",
    "chat.message",
    "event.query",
    "fighter.purchase",
    "bank.transaction",
    "credits.transfer",
    "chat.broadcast",
    "error",
];

const NUDGE_MESSAGE: &str = "You did not call any tools in your last response. \
    If the task is complete, call the `finished` tool with a summary message. \
    If more work is needed, call the appropriate tool to continue.";

struct ReactorState {
    messages: Vec<ChatMessage>,
    inference_reasons: Vec<String>,

    llm_inflight: bool,
    run_requested: bool,
    awaiting_completion: Option<String>,

    watchdog_deadline: Option<Instant>,
    completion_deadline: Option<Instant>,
    no_tool_deadline: Option<Instant>,
    last_activity: Instant,

    skip_context_events: HashMap<String, u32>,
    tool_call_in_progress: bool,
    no_tool_nudges: u32,

    finished: bool,
    finished_message: Option<String>,
    cancelled: bool,
}

struct AgentInner {
    config: TaskAgentConfig,
    llm: Arc<dyn LlmService>,
    client: AsyncGameClient,
    tools: ToolRegistry,
    state: std::sync::Mutex<ReactorState>,
    wake: Notify,
    idle_notify: Notify,
}

enum Step {
    RunInference(Vec<ChatMessage>),
    Wait(Option<Instant>),
    Finished(bool),
}

/// LLM task runner gated on game events.
pub struct TaskAgent {
    inner: Arc<AgentInner>,
    handler_tokens: std::sync::Mutex<Vec<HandlerToken>>,
}

impl TaskAgent {
    /// Create an agent and subscribe it to the full event set. The agent is
    /// idle until [`run_task`](Self::run_task) is called.
    pub fn new(
        config: TaskAgentConfig,
        llm: Arc<dyn LlmService>,
        client: AsyncGameClient,
        tools: ToolRegistry,
    ) -> Self {
        let inner = Arc::new(AgentInner {
            config,
            llm,
            client: client.clone(),
            tools,
            state: std::sync::Mutex::new(ReactorState {
                messages: Vec::new(),
                inference_reasons: Vec::new(),
                llm_inflight: false,
                run_requested: false,
                awaiting_completion: None,
                watchdog_deadline: None,
                completion_deadline: None,
                no_tool_deadline: None,
                last_activity: Instant::now(),
                skip_context_events: HashMap::new(),
                tool_call_in_progress: false,
                no_tool_nudges: 0,
                finished: false,
                finished_message: None,
                cancelled: false,
            }),
            wake: Notify::new(),
            idle_notify: Notify::new(),
        });

        let mut tokens = Vec::new();
        for event_name in EVENT_NAMES {
            let handler_inner = Arc::clone(&inner);
            tokens.push(client.add_event_handler(event_name, move |event: GameEvent| {
                let handler_inner = Arc::clone(&handler_inner);
                async move {
                    handler_inner.handle_event(&event);
                }
            }));
        }

        Self {
            inner,
            handler_tokens: std::sync::Mutex::new(tokens),
        }
    }

    /// Final message reported by the `finished` tool, if the task ended.
    pub fn finished_message(&self) -> Option<String> {
        match self.inner.state.lock() {
            Ok(state) => state.finished_message.clone(),
            Err(poisoned) => poisoned.into_inner().finished_message.clone(),
        }
    }

    /// Request cancellation; the run loop unwinds at its next step.
    pub fn cancel(&self) {
        self.inner.with_state(|state| state.cancelled = true);
        self.inner.wake.notify_one();
    }

    /// Detach the agent's event handlers from the client.
    pub fn detach(&self) {
        let tokens: Vec<HandlerToken> = match self.handler_tokens.lock() {
            Ok(mut tokens) => tokens.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for token in tokens {
            self.inner.client.remove_event_handler(&token);
        }
    }

    /// Run a task to completion.
    ///
    /// Returns `Ok(true)` when the model called `finished`, `Ok(false)` when
    /// the task was cancelled or force-finished.
    pub async fn run_task(&self, task: &str, task_id: Option<String>) -> Result<bool, GameError> {
        let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(
            "Task starting: id={} model={} task={}",
            task_id,
            self.inner.llm.model_name(),
            task
        );

        self.inner.with_state(|state| {
            state.messages = vec![
                ChatMessage::system(system_message()),
                ChatMessage::user(task_instruction(task)),
            ];
            state.inference_reasons = vec!["task_start".to_string()];
            state.llm_inflight = false;
            state.run_requested = true;
            state.awaiting_completion = None;
            state.watchdog_deadline = None;
            state.completion_deadline = None;
            state.no_tool_deadline = None;
            state.last_activity = Instant::now();
            state.skip_context_events.clear();
            state.tool_call_in_progress = false;
            state.no_tool_nudges = 0;
            state.finished = false;
            state.finished_message = None;
            state.cancelled = false;
        });

        if let Err(err) = self
            .inner
            .client
            .task_lifecycle(&task_id, "start", Some(task), None, None)
            .await
        {
            warn!("Failed to emit task.start event: {}", err);
        }
        self.inner.client.resume_event_delivery().await;

        let success = loop {
            match self.inner.next_step() {
                Step::Finished(success) => break success,
                Step::RunInference(messages) => {
                    self.run_inference(messages).await;
                }
                Step::Wait(deadline) => {
                    let notified = self.inner.wake.notified();
                    match deadline {
                        None => notified.await,
                        Some(deadline) => {
                            let _ = tokio::time::timeout_at(deadline, notified).await;
                        }
                    }
                }
            }
        };

        let (status, summary) = if success {
            (
                "completed",
                self.finished_message().unwrap_or_else(|| "Done".to_string()),
            )
        } else {
            (
                "cancelled",
                self.finished_message()
                    .unwrap_or_else(|| "Cancelled by user".to_string()),
            )
        };
        if let Err(err) = self
            .inner
            .client
            .task_lifecycle(&task_id, "finish", None, Some(&summary), Some(status))
            .await
        {
            warn!("Failed to emit task.finish event: {}", err);
        }
        Ok(success)
    }

    async fn run_inference(&self, messages: Vec<ChatMessage>) {
        let definitions = self.inner.tools.definitions();
        let turn = self.inner.llm.generate(&messages, &definitions).await;
        match turn {
            Err(err) => {
                warn!("LLM inference failed: {}", err);
                self.inner.with_state(|state| {
                    state.llm_inflight = false;
                    state.finished = true;
                    state.finished_message =
                        Some(format!("Task stopped because of an error: {}", err));
                    state.cancelled = true;
                });
                self.inner.wake.notify_one();
            }
            Ok(turn) => {
                self.handle_turn(turn).await;
            }
        }
    }

    async fn handle_turn(&self, turn: LlmTurn) {
        let has_tool_calls = !turn.tool_calls.is_empty();
        self.inner.with_state(|state| {
            state.llm_inflight = false;
            state.last_activity = Instant::now();
            if !turn.text.is_empty() {
                state.messages.push(ChatMessage::assistant(turn.text.clone()));
            }
            if has_tool_calls {
                // A fresh tool-calling response resets the nudge budget.
                state.no_tool_nudges = 0;
                state.no_tool_deadline = None;
            } else if !state.finished && !state.cancelled && state.no_tool_deadline.is_none() {
                debug!(
                    "No tool calls in response; arming {:?} no-tool watchdog",
                    self.inner.config.no_tool_watchdog_delay
                );
                state.no_tool_deadline =
                    Some(Instant::now() + self.inner.config.no_tool_watchdog_delay);
            }
        });

        for call in turn.tool_calls {
            self.handle_tool_call(call).await;
            let stop = self
                .inner
                .with_state(|state| state.finished || state.cancelled);
            if stop {
                break;
            }
        }
        self.inner.wake.notify_one();
    }

    async fn handle_tool_call(&self, call: ToolCallRequest) {
        let tool_name = call.name.as_str();
        let arguments = call.arguments.clone();
        info!("Tool call: {}({})", tool_name, arguments);

        if tool_name == "finished" {
            let message = arguments["message"]
                .as_str()
                .unwrap_or("Done")
                .to_string();
            self.inner.with_state(|state| {
                state.finished = true;
                state.finished_message = Some(message.clone());
                state
                    .messages
                    .push(ChatMessage::tool(call.call_id.clone(), json!({"status": "finished"}).to_string()));
            });
            return;
        }

        if tool_name == "wait_in_idle_state" {
            self.handle_idle_wait(&call).await;
            return;
        }

        if !self.inner.tools.contains(tool_name) {
            let error_result = json!({ "error": format!("Unknown tool: {}", tool_name) });
            self.inner.with_state(|state| {
                state
                    .messages
                    .push(ChatMessage::tool(call.call_id.clone(), error_result.to_string()));
                record_reason(state, &format!("tool({})", tool_name));
                state.run_requested = true;
            });
            return;
        }

        let expected_completion = async_completion_event(tool_name);
        let sync_skip = sync_tool_event(tool_name);

        // Pre-arm await/skip state before the tool body runs so events that
        // race the RPC reply are still matched.
        self.inner.with_state(|state| {
            if let Some(event_name) = expected_completion {
                state.awaiting_completion = Some(event_name.to_string());
                state.completion_deadline =
                    Some(Instant::now() + self.inner.config.async_completion_timeout);
                state.messages.push(ChatMessage::tool(
                    call.call_id.clone(),
                    json!({"status": "Executed."}).to_string(),
                ));
                debug!(
                    "Pre-armed {} completion for tool {}",
                    event_name, tool_name
                );
            }
            if let Some(event_name) = sync_skip {
                *state
                    .skip_context_events
                    .entry(event_name.to_string())
                    .or_insert(0) += 1;
            }
            state.tool_call_in_progress = true;
        });

        let result = self.inner.tools.execute(tool_name, arguments).await;

        self.inner.with_state(|state| {
            state.tool_call_in_progress = false;
            state.last_activity = Instant::now();
            match &result {
                Ok(payload) => {
                    if expected_completion.is_none() {
                        state.messages.push(ChatMessage::tool(
                            call.call_id.clone(),
                            payload.to_string(),
                        ));
                    }
                    let mut reason = format!("tool({})", tool_name);
                    let serialized = payload.to_string();
                    if !serialized.is_empty() {
                        let preview: String = serialized.chars().take(200).collect();
                        reason = format!("{}:{}", reason, preview);
                    }
                    record_reason(state, &reason);
                    if state.awaiting_completion.as_deref() == expected_completion
                        && expected_completion.is_some()
                    {
                        // Completion not seen yet; inference stays deferred.
                        debug!(
                            "Deferring inference until {} arrives (tool={})",
                            expected_completion.unwrap_or_default(),
                            tool_name
                        );
                    } else {
                        state.run_requested = true;
                    }
                }
                Err(err) => {
                    if expected_completion.is_some() {
                        state.awaiting_completion = None;
                        state.completion_deadline = None;
                    }
                    if let Some(event_name) = sync_skip {
                        drain_skip(state, event_name);
                    }
                    let error_payload = json!({ "error": err.to_string() });
                    if expected_completion.is_none() {
                        state.messages.push(ChatMessage::tool(
                            call.call_id.clone(),
                            error_payload.to_string(),
                        ));
                    } else {
                        state.messages.push(ChatMessage::user(format!(
                            "<tool_error name={}>\n{}\n</tool_error>",
                            tool_name, error_payload
                        )));
                    }
                    record_reason(state, &format!("tool({}):error", tool_name));
                    state.run_requested = true;
                }
            }
        });
    }

    /// `wait_in_idle_state`: park until any event arrives or the window
    /// elapses, synthesizing an `idle.complete` event on timeout so the
    /// model has something to react to.
    async fn handle_idle_wait(&self, call: &ToolCallRequest) {
        let seconds = call.arguments["seconds"].as_u64().unwrap_or(60);
        if seconds < 1 || seconds > 60 {
            self.inner.with_state(|state| {
                state.messages.push(ChatMessage::tool(
                    call.call_id.clone(),
                    json!({"error": "seconds must be between 1 and 60"}).to_string(),
                ));
                record_reason(state, "tool(wait_in_idle_state):error");
                state.run_requested = true;
            });
            return;
        }

        let start = Instant::now();
        let notified = self.inner.idle_notify.notified();
        let outcome = tokio::time::timeout(Duration::from_secs(seconds), notified).await;
        let elapsed = start.elapsed().as_secs_f64();

        let result = match outcome {
            Ok(_) => json!({ "status": "event_received", "elapsed_seconds": (elapsed * 100.0).round() / 100.0 }),
            Err(_) => {
                self.inner.handle_event(&GameEvent::new(
                    names::IDLE_COMPLETE,
                    json!({
                        "elapsed_seconds": (elapsed * 100.0).round() / 100.0,
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    }),
                ));
                json!({ "status": "idle_complete", "elapsed_seconds": (elapsed * 100.0).round() / 100.0 })
            }
        };

        self.inner.with_state(|state| {
            state
                .messages
                .push(ChatMessage::tool(call.call_id.clone(), result.to_string()));
            record_reason(state, "tool(wait_in_idle_state)");
            state.run_requested = true;
            state.last_activity = Instant::now();
        });
        self.inner.wake.notify_one();
    }
}

impl AgentInner {
    fn with_state<R>(&self, f: impl FnOnce(&mut ReactorState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Decide the next loop step: fire due deadlines, then either start an
    /// inference or sleep until the earliest pending deadline.
    fn next_step(&self) -> Step {
        self.with_state(|state| {
            if state.cancelled {
                return Step::Finished(false);
            }
            if state.finished {
                return Step::Finished(true);
            }

            let now = Instant::now();

            if now.duration_since(state.last_activity) >= self.config.idle_timeout {
                state.finished_message =
                    Some("Task stopped: idle timeout reached".to_string());
                return Step::Finished(false);
            }

            if state.awaiting_completion.is_some() {
                if let Some(deadline) = state.completion_deadline {
                    if now >= deadline {
                        warn!(
                            "Timeout waiting for {} event, proceeding with inference",
                            state.awaiting_completion.as_deref().unwrap_or_default()
                        );
                        state.awaiting_completion = None;
                        state.completion_deadline = None;
                        state.run_requested = true;
                    }
                }
            }

            if let Some(deadline) = state.watchdog_deadline {
                if now >= deadline {
                    state.watchdog_deadline = None;
                    state.run_requested = true;
                }
            }

            if let Some(deadline) = state.no_tool_deadline {
                if now >= deadline {
                    state.no_tool_deadline = None;
                    state.no_tool_nudges += 1;
                    if state.no_tool_nudges > self.config.max_no_tool_nudges {
                        warn!(
                            "LLM failed to call tools after {} nudges, forcing task completion",
                            state.no_tool_nudges
                        );
                        state.finished_message =
                            Some("Task stopped: LLM failed to call required tools".to_string());
                        return Step::Finished(false);
                    }
                    debug!(
                        "No-tool watchdog fired; nudging ({}/{})",
                        state.no_tool_nudges, self.config.max_no_tool_nudges
                    );
                    state.messages.push(ChatMessage::user(NUDGE_MESSAGE.to_string()));
                    record_reason(state, "no_tool_nudge");
                    state.run_requested = true;
                }
            }

            if state.inference_reasons.is_empty() {
                state.run_requested = false;
            }

            if state.run_requested
                && !state.llm_inflight
                && state.awaiting_completion.is_none()
                && !state.inference_reasons.is_empty()
            {
                let reasons: Vec<String> = state.inference_reasons.drain(..).collect();
                debug!("Queueing LLM run reasons={:?}", reasons);
                if !reasons.iter().any(|r| r == "no_tool_nudge") {
                    state.no_tool_nudges = 0;
                }
                state.watchdog_deadline = None;
                state.no_tool_deadline = None;
                state.run_requested = false;
                state.llm_inflight = true;
                state.last_activity = Instant::now();
                return Step::RunInference(state.messages.clone());
            }

            let idle_deadline = state.last_activity + self.config.idle_timeout;
            let deadline = [
                state.watchdog_deadline,
                state.completion_deadline,
                state.no_tool_deadline,
                Some(idle_deadline),
            ]
            .iter()
            .flatten()
            .copied()
            .min();
            Step::Wait(deadline)
        })
    }

    /// Feed one inbound event through the reactor rules.
    fn handle_event(&self, event: &GameEvent) {
        let event_name = event.event_name.as_str();
        let body = event
            .summary
            .clone()
            .unwrap_or_else(|| event.payload.to_string());
        info!("[event] {}: {}", event_name, body);

        // Anything arriving releases an idle wait.
        self.idle_notify.notify_waiters();

        self.with_state(|state| {
            state.last_activity = Instant::now();

            // Sync-tool events are dropped from context once per pre-marked
            // call; they still reached other consumers via the client.
            if let Some(skip_count) = state.skip_context_events.get(event_name).copied() {
                if skip_count > 0 {
                    drain_skip(state, event_name);
                    debug!("Skipping context addition for sync tool event: {}", event_name);
                    return;
                }
            }

            state.messages.push(ChatMessage::user(format!(
                "<event name={}>\n{}\n</event>",
                event_name, body
            )));

            if event_name == names::ERROR && self.config.stop_on_error_event {
                warn!("Stopping task on error event: {}", event.payload);
                state.cancelled = true;
                return;
            }

            record_reason(state, event_name);

            if event_name == names::ERROR && state.awaiting_completion.is_some() {
                state.awaiting_completion = None;
                state.completion_deadline = None;
                if !state.llm_inflight {
                    state.run_requested = true;
                }
                return;
            }

            if state.awaiting_completion.as_deref() == Some(event_name) {
                debug!("Received awaited completion event: {}", event_name);
                state.awaiting_completion = None;
                state.completion_deadline = None;
                if !state.llm_inflight {
                    state.run_requested = true;
                }
                return;
            }

            if state.awaiting_completion.is_some() {
                debug!(
                    "Recorded event while awaiting {}: {}",
                    state.awaiting_completion.as_deref().unwrap_or_default(),
                    event_name
                );
                return;
            }

            if state.tool_call_in_progress {
                debug!("Recorded event during tool call: {}", event_name);
                return;
            }

            if !state.llm_inflight && state.watchdog_deadline.is_none() {
                state.watchdog_deadline =
                    Some(Instant::now() + self.config.event_batch_inference_delay);
            }
        });
        self.wake.notify_one();
    }
}

fn record_reason(state: &mut ReactorState, reason: &str) {
    if state.inference_reasons.iter().any(|r| r == reason) {
        return;
    }
    state.inference_reasons.push(reason.to_string());
    if state.inference_reasons.len() > 50 {
        let excess = state.inference_reasons.len() - 50;
        state.inference_reasons.drain(..excess);
    }
}

fn drain_skip(state: &mut ReactorState, event_name: &str) {
    if let Some(count) = state.skip_context_events.get_mut(event_name) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            state.skip_context_events.remove(event_name);
        }
    }
}

fn system_message() -> String {
    "You are an autonomous starship pilot in a shared universe of numbered \
     sectors. Interact with the world exclusively through tool calls; game \
     events arrive as user messages wrapped in <event> tags. When your task \
     is complete, call the `finished` tool with a short summary."
        .to_string()
}

fn task_instruction(task: &str) -> String {
    format!("Your current task: {}", task)
}
