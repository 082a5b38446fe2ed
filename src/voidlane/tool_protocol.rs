//! Tool abstraction for the task agent.
//!
//! A [`GameTool`] wraps one game capability behind a name, a description,
//! and typed parameter metadata; the [`ToolRegistry`] aggregates them and
//! produces the [`ToolDefinition`]s forwarded to the LLM.
//!
//! Two static tables shape the reactor's behaviour around tools:
//!
//! - [`async_completion_event`]: tools whose real result arrives later as a
//!   server event. The tool returns `{"status": "Executed."}` immediately
//!   and the agent defers inference until the named event arrives.
//! - [`sync_tool_event`]: tools whose result is already in the RPC reply
//!   but whose matching event still arrives; that event is skipped from LLM
//!   context to avoid duplication (it still flows to other consumers).
//!
//! When adding an async tool, the server must emit the completion event;
//! returning data only in the RPC response makes the model hallucinate,
//! because it never sees anything beyond the placeholder.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::voidlane::error::GameError;

/// Parameter type accepted by a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn json_schema_name(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    /// Add a human readable description that surfaces in generated schemas.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Identity and parameter metadata for one tool.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// JSON-Schema rendition handed to the LLM.
    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for parameter in &self.parameters {
            let mut schema = serde_json::Map::new();
            schema.insert(
                "type".to_string(),
                json!(parameter.param_type.json_schema_name()),
            );
            if let Some(description) = &parameter.description {
                schema.insert("description".to_string(), json!(description));
            }
            properties.insert(parameter.name.clone(), Value::Object(schema));
            if parameter.required {
                required.push(parameter.name.clone());
            }
        }
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Provider-facing tool schema (OpenAI-compatible shape).
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// One executable game capability.
#[async_trait]
pub trait GameTool: Send + Sync {
    /// Static identity and parameters.
    fn metadata(&self) -> ToolMetadata;

    /// Execute with the model-supplied arguments.
    async fn execute(&self, arguments: Value) -> Result<Value, GameError>;
}

/// Name-indexed collection of [`GameTool`]s.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn GameTool>>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a tool under its metadata name, replacing any previous one.
    pub fn register(&mut self, tool: Arc<dyn GameTool>) {
        self.tools.insert(tool.metadata().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GameTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered tool names, sorted.
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| tool.metadata().to_definition())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<Value, GameError> {
        let tool = self
            .get(name)
            .ok_or_else(|| GameError::not_found(format!("Unknown tool: {}", name)))?;
        tool.execute(arguments).await
    }
}

/// Completion event an async tool promises to emit, if any.
///
/// Between the tool call and the event's arrival the agent schedules no
/// inference; the event (or a timeout) releases exactly one.
pub fn async_completion_event(tool_name: &str) -> Option<&'static str> {
    match tool_name {
        "move" => Some("movement.complete"),
        "path_with_region" => Some("path.region"),
        "my_status" => Some("status.snapshot"),
        "list_known_ports" => Some("ports.list"),
        "trade" => Some("trade.executed"),
        "recharge_warp_power" => Some("warp.purchase"),
        "transfer_warp_power" => Some("warp.transfer"),
        "salvage_collect" => Some("salvage.collected"),
        "place_fighters" => Some("garrison.deployed"),
        "collect_fighters" => Some("garrison.collected"),
        "send_message" => Some("chat.message"),
        "event_query" => Some("event.query"),
        "purchase_fighters" => Some("fighter.purchase"),
        "purchase_ship" => Some("status.update"),
        "rename_ship" => Some("ship.renamed"),
        "bank_deposit" => Some("bank.transaction"),
        "bank_withdraw" => Some("bank.transaction"),
        "transfer_credits" => Some("credits.transfer"),
        "dump_cargo" => Some("salvage.created"),
        "create_corporation" => Some("corporation.created"),
        "join_corporation" => Some("corporation.member_joined"),
        "leave_corporation" => Some("corporation.member_left"),
        "kick_corporation_member" => Some("corporation.member_kicked"),
        "combat_initiate" => Some("combat.round_waiting"),
        "combat_action" => Some("combat.action_accepted"),
        _ => None,
    }
}

/// Event produced by a sync tool whose data is already in the tool result.
/// The agent drops one matching event from LLM context per call.
pub fn sync_tool_event(tool_name: &str) -> Option<&'static str> {
    match tool_name {
        "local_map_region" => Some("map.region"),
        "plot_course" => Some("course.plot"),
        _ => None,
    }
}
