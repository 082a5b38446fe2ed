//! Concrete game tools exposed to the task agent's LLM.
//!
//! Each tool wraps one [`AsyncGameClient`] RPC. Tools listed in
//! [`async_completion_event`](crate::voidlane::tool_protocol::async_completion_event)
//! acknowledge immediately and let the matching server event carry the real
//! data; the others return their RPC result directly.
//!
//! `finished` and `wait_in_idle_state` are declared here for schema purposes
//! but intercepted by the [`TaskAgent`](crate::TaskAgent) before execution:
//! they terminate the loop and park the agent respectively.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::voidlane::client::{AsyncGameClient, CargoItem};
use crate::voidlane::error::GameError;
use crate::voidlane::tool_protocol::{
    GameTool, ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry,
};

fn require_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, GameError> {
    arguments[key]
        .as_str()
        .ok_or_else(|| GameError::validation(format!("missing required argument: {}", key)))
}

fn require_i64(arguments: &Value, key: &str) -> Result<i64, GameError> {
    arguments[key]
        .as_i64()
        .ok_or_else(|| GameError::validation(format!("missing required argument: {}", key)))
}

fn require_u32(arguments: &Value, key: &str) -> Result<u32, GameError> {
    arguments[key]
        .as_u64()
        .map(|v| v as u32)
        .ok_or_else(|| GameError::validation(format!("missing required argument: {}", key)))
}

/// Snapshot of the player, ship, and sector.
pub struct MyStatusTool {
    client: AsyncGameClient,
}

impl MyStatusTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for MyStatusTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "my_status",
            "Fetch your current status: location, ship, cargo, credits. \
             Results arrive as a status.snapshot event.",
        )
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, GameError> {
        self.client.my_status().await
    }
}

/// Move one sector along the warp lattice.
pub struct MoveTool {
    client: AsyncGameClient,
}

impl MoveTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for MoveTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "move",
            "Move to an adjacent sector. Completion arrives as a movement.complete event.",
        )
        .with_parameter(
            ToolParameter::new("to_sector", ToolParameterType::Integer)
                .with_description("Adjacent sector number to move to")
                .required(),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        let to_sector = require_i64(&arguments, "to_sector")?;
        self.client.move_to(to_sector).await
    }
}

/// Shortest-path query between the current sector and a destination.
pub struct PlotCourseTool {
    client: AsyncGameClient,
}

impl PlotCourseTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for PlotCourseTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("plot_course", "Plot a course to a target sector.").with_parameter(
            ToolParameter::new("to_sector", ToolParameterType::Integer)
                .with_description("Destination sector number")
                .required(),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        let to_sector = require_i64(&arguments, "to_sector")?;
        self.client.plot_course(to_sector).await
    }
}

/// Local map tiles around a center sector.
pub struct LocalMapRegionTool {
    client: AsyncGameClient,
}

impl LocalMapRegionTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for LocalMapRegionTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "local_map_region",
            "Fetch the map region around a sector (defaults to your current one).",
        )
        .with_parameter(
            ToolParameter::new("center_sector", ToolParameterType::Integer)
                .with_description("Center sector; omit for current location"),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        self.client
            .local_map_region(arguments["center_sector"].as_i64())
            .await
    }
}

/// Ports this character knows about.
pub struct ListKnownPortsTool {
    client: AsyncGameClient,
}

impl ListKnownPortsTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for ListKnownPortsTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "list_known_ports",
            "List known trading ports. Results arrive as a ports.list event.",
        )
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, GameError> {
        self.client.list_known_ports().await
    }
}

/// Buy or sell at the local port.
pub struct TradeTool {
    client: AsyncGameClient,
}

impl TradeTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for TradeTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "trade",
            "Buy or sell a commodity at the port in your sector. \
             Results arrive as a trade.executed event.",
        )
        .with_parameter(
            ToolParameter::new("trade_type", ToolParameterType::String)
                .with_description("\"buy\" or \"sell\"")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("commodity", ToolParameterType::String)
                .with_description("Commodity name")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("units", ToolParameterType::Integer)
                .with_description("Units to trade")
                .required(),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        let trade_type = require_str(&arguments, "trade_type")?;
        let commodity = require_str(&arguments, "commodity")?;
        let units = require_u32(&arguments, "units")?;
        self.client.trade(trade_type, commodity, units).await
    }
}

/// Claim a salvage container in the current sector.
pub struct SalvageCollectTool {
    client: AsyncGameClient,
}

impl SalvageCollectTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for SalvageCollectTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "salvage_collect",
            "Collect a salvage container. Results arrive as a salvage.collected event.",
        )
        .with_parameter(
            ToolParameter::new("salvage_id", ToolParameterType::String)
                .with_description("Container id from the sector contents")
                .required(),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        let salvage_id = require_str(&arguments, "salvage_id")?;
        self.client.salvage_collect(salvage_id).await
    }
}

/// Jettison cargo into a salvage container.
pub struct DumpCargoTool {
    client: AsyncGameClient,
}

impl DumpCargoTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for DumpCargoTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "dump_cargo",
            "Dump cargo overboard as salvage. Results arrive as a salvage.created event.",
        )
        .with_parameter(
            ToolParameter::new("items", ToolParameterType::Array)
                .with_description("List of {commodity, units} to dump")
                .required(),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        let raw_items = arguments["items"]
            .as_array()
            .ok_or_else(|| GameError::validation("missing required argument: items"))?;
        let mut items = Vec::new();
        for entry in raw_items {
            items.push(CargoItem {
                commodity: require_str(entry, "commodity")?.to_string(),
                units: require_u32(entry, "units")?,
            });
        }
        self.client.dump_cargo(items).await
    }
}

/// Station fighters in the current sector.
pub struct PlaceFightersTool {
    client: AsyncGameClient,
}

impl PlaceFightersTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for PlaceFightersTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "place_fighters",
            "Leave fighters in a sector as a garrison. \
             Results arrive as a garrison.deployed event.",
        )
        .with_parameter(
            ToolParameter::new("sector", ToolParameterType::Integer)
                .with_description("Sector to garrison")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("quantity", ToolParameterType::Integer)
                .with_description("Fighters to station")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("mode", ToolParameterType::String)
                .with_description("offensive, defensive, or toll")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("toll_amount", ToolParameterType::Integer)
                .with_description("Credits demanded per passage (toll mode)"),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        let sector = require_i64(&arguments, "sector")?;
        let quantity = require_u32(&arguments, "quantity")?;
        let mode = require_str(&arguments, "mode")?;
        let toll_amount = arguments["toll_amount"].as_i64().unwrap_or(0);
        self.client
            .combat_leave_fighters(sector, quantity, mode, toll_amount)
            .await
    }
}

/// Pick stationed fighters back up.
pub struct CollectFightersTool {
    client: AsyncGameClient,
}

impl CollectFightersTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for CollectFightersTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "collect_fighters",
            "Collect fighters from your garrison. \
             Results arrive as a garrison.collected event.",
        )
        .with_parameter(
            ToolParameter::new("sector", ToolParameterType::Integer)
                .with_description("Sector holding the garrison")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("quantity", ToolParameterType::Integer)
                .with_description("Fighters to collect")
                .required(),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        let sector = require_i64(&arguments, "sector")?;
        let quantity = require_u32(&arguments, "quantity")?;
        self.client.combat_collect_fighters(sector, quantity).await
    }
}

/// Open combat against a target in the current sector.
pub struct CombatInitiateTool {
    client: AsyncGameClient,
}

impl CombatInitiateTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for CombatInitiateTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "combat_initiate",
            "Attack another ship or garrison in your sector. \
             The combat.round_waiting event opens round 1.",
        )
        .with_parameter(
            ToolParameter::new("target_id", ToolParameterType::String)
                .with_description("Character or garrison to attack"),
        )
        .with_parameter(
            ToolParameter::new("target_type", ToolParameterType::String)
                .with_description("\"character\" or \"garrison\""),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        self.client
            .combat_initiate(
                arguments["target_id"].as_str(),
                arguments["target_type"].as_str(),
            )
            .await
    }
}

/// Submit this round's combat action.
pub struct CombatActionTool {
    client: AsyncGameClient,
}

impl CombatActionTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for CombatActionTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "combat_action",
            "Submit your action for the current combat round: \
             attack, brace, flee, or pay (toll garrisons).",
        )
        .with_parameter(
            ToolParameter::new("combat_id", ToolParameterType::String)
                .with_description("Active combat id")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("action", ToolParameterType::String)
                .with_description("attack, brace, flee, or pay")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("commit", ToolParameterType::Integer)
                .with_description("Fighters to commit when attacking"),
        )
        .with_parameter(
            ToolParameter::new("target_id", ToolParameterType::String)
                .with_description("Target combatant when attacking"),
        )
        .with_parameter(
            ToolParameter::new("to_sector", ToolParameterType::Integer)
                .with_description("Destination sector when fleeing"),
        )
        .with_parameter(
            ToolParameter::new("round", ToolParameterType::Integer)
                .with_description("Round the action is intended for"),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        let combat_id = require_str(&arguments, "combat_id")?;
        let action = require_str(&arguments, "action")?;
        self.client
            .combat_action(
                combat_id,
                action,
                arguments["commit"].as_u64().map(|c| c as u32),
                arguments["target_id"].as_str(),
                arguments["to_sector"].as_i64(),
                arguments["round"].as_u64().map(|r| r as u32),
            )
            .await
    }
}

/// Send a chat message to another player or the sector.
pub struct SendMessageTool {
    client: AsyncGameClient,
}

impl SendMessageTool {
    pub fn new(client: AsyncGameClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GameTool for SendMessageTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "send_message",
            "Send a chat message. Delivery arrives as a chat.message event.",
        )
        .with_parameter(
            ToolParameter::new("message", ToolParameterType::String)
                .with_description("Message text")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("recipient", ToolParameterType::String)
                .with_description("Recipient character; omit to broadcast"),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, GameError> {
        let message = require_str(&arguments, "message")?;
        self.client
            .send_message(arguments["recipient"].as_str(), message)
            .await
    }
}

/// Declared for schema purposes; the agent intercepts and parks itself.
pub struct WaitInIdleStateTool;

#[async_trait]
impl GameTool for WaitInIdleStateTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "wait_in_idle_state",
            "Wait quietly for something to happen, up to the given number of seconds. \
             Returns early when any event arrives.",
        )
        .with_parameter(
            ToolParameter::new("seconds", ToolParameterType::Integer)
                .with_description("Seconds to wait, 1-60 (default 60)"),
        )
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, GameError> {
        Err(GameError::Internal(
            "wait_in_idle_state is handled by the task agent".to_string(),
        ))
    }
}

/// Declared for schema purposes; the agent intercepts and ends the task.
pub struct FinishedTool;

#[async_trait]
impl GameTool for FinishedTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "finished",
            "Call when the task is complete, with a short summary of what happened.",
        )
        .with_parameter(
            ToolParameter::new("message", ToolParameterType::String)
                .with_description("Summary of the task outcome")
                .required(),
        )
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, GameError> {
        Ok(json!({ "status": "finished" }))
    }
}

/// The standard toolset a task agent ships with.
pub fn default_toolset(client: &AsyncGameClient) -> ToolRegistry {
    let mut registry = ToolRegistry::empty();
    registry.register(Arc::new(MyStatusTool::new(client.clone())));
    registry.register(Arc::new(MoveTool::new(client.clone())));
    registry.register(Arc::new(PlotCourseTool::new(client.clone())));
    registry.register(Arc::new(LocalMapRegionTool::new(client.clone())));
    registry.register(Arc::new(ListKnownPortsTool::new(client.clone())));
    registry.register(Arc::new(TradeTool::new(client.clone())));
    registry.register(Arc::new(SalvageCollectTool::new(client.clone())));
    registry.register(Arc::new(DumpCargoTool::new(client.clone())));
    registry.register(Arc::new(PlaceFightersTool::new(client.clone())));
    registry.register(Arc::new(CollectFightersTool::new(client.clone())));
    registry.register(Arc::new(CombatInitiateTool::new(client.clone())));
    registry.register(Arc::new(CombatActionTool::new(client.clone())));
    registry.register(Arc::new(SendMessageTool::new(client.clone())));
    registry.register(Arc::new(WaitInIdleStateTool));
    registry.register(Arc::new(FinishedTool));
    registry
}
