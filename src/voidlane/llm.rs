//! Provider-agnostic LLM primitives for the task agent.
//!
//! The [`TaskAgent`](crate::TaskAgent) talks to its model exclusively
//! through the [`LlmService`] trait: one call per inference turn, taking the
//! accumulated chat context plus the available tool definitions and
//! returning the model's text and any native tool calls. Concrete provider
//! bindings (and the mock services used in tests) live outside this crate's
//! combat core.

use async_trait::async_trait;
use serde_json::Value;

use crate::voidlane::error::GameError;
use crate::voidlane::tool_protocol::ToolDefinition;

/// Represents the possible roles for a chat message.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// A system authored message that primes or constrains model behaviour.
    System,
    /// A user authored message; game events are injected with this role.
    User,
    /// A model authored message.
    Assistant,
    /// A tool-result message correlating with a prior [`ToolCallRequest`].
    Tool {
        /// Provider-assigned call id being answered.
        call_id: String,
    },
}

/// A single message in the agent's conversation context.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool {
                call_id: call_id.into(),
            },
            content: content.into(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, echoed back in the tool-result message.
    pub call_id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the model.
    pub arguments: Value,
}

/// One full model response: text plus zero or more tool calls.
#[derive(Debug, Clone, Default)]
pub struct LlmTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Trait-driven abstraction for the model behind the task agent.
///
/// Implementations must be thread-safe (`Send + Sync`) so a service can be
/// shared between tasks. Providers with richer capabilities (thinking
/// budgets, thought streams) read those knobs from
/// [`TaskAgentConfig`](crate::TaskAgentConfig) at construction time.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Run one inference over the supplied context.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmTurn, GameError>;

    /// Identifier of the upstream model (for logging).
    fn model_name(&self) -> &str;
}
