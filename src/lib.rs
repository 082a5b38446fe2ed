// src/lib.rs

// Import the top-level `voidlane` module.
pub mod voidlane;

// Surface the module tree at the crate root so callers write
// voidlane::combat::engine::resolve_round instead of the doubled path.
pub use voidlane::{
    client, combat, combat_session, config, error, event, llm, summaries, task_agent,
    tool_protocol, tools,
};

// Re-exporting key items for easier external access.
pub use voidlane::client::AsyncGameClient;
pub use voidlane::combat::engine::resolve_round;
pub use voidlane::combat::garrisons::GarrisonStore;
pub use voidlane::combat::manager::{CombatHooks, CombatManager};
pub use voidlane::combat::models::{
    CombatEncounter, CombatRoundOutcome, CombatantAction, CombatantState, GarrisonMode,
    GarrisonState, RoundAction,
};
pub use voidlane::combat::salvage::{SalvageContainer, SalvageManager};
pub use voidlane::combat_session::{CombatSession, CombatState};
pub use voidlane::config::{CombatManagerConfig, SalvageConfig, TaskAgentConfig};
pub use voidlane::error::GameError;
pub use voidlane::event::GameEvent;
pub use voidlane::llm::{ChatMessage, LlmService, LlmTurn, Role};
pub use voidlane::task_agent::TaskAgent;
