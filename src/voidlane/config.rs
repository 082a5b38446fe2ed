//! Configuration structs for the voidlane runtime components.
//!
//! Each component takes an explicit config struct instead of a pile of named
//! arguments. Defaults mirror the production tuning. Users construct these
//! manually; no config-file parsing dependencies are introduced.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use voidlane::config::CombatManagerConfig;
//!
//! // Tighten the round deadline for a fast-paced arena server.
//! let config = CombatManagerConfig {
//!     round_timeout: Duration::from_secs(5),
//! };
//! assert_eq!(config.round_timeout.as_secs(), 5);
//! ```

use std::time::Duration;

/// Environment variable consulted by [`TaskAgentConfig::default`] to decide
/// whether a task should abort on the first `error` event.
pub const STOP_ON_ERROR_ENV: &str = "VOIDLANE_STOP_ON_ERROR_EVENT";

/// Tuning for the [`CombatManager`](crate::CombatManager).
#[derive(Debug, Clone)]
pub struct CombatManagerConfig {
    /// How long each round waits for action submissions before the deadline
    /// timer resolves it with BRACE defaults.
    pub round_timeout: Duration,
}

impl Default for CombatManagerConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(15),
        }
    }
}

/// Tuning for the [`SalvageManager`](crate::SalvageManager).
#[derive(Debug, Clone)]
pub struct SalvageConfig {
    /// Lifetime of a salvage container when the creator does not pass an
    /// explicit TTL. Containers are pruned lazily on access after expiry.
    pub default_ttl: Duration,
}

impl Default for SalvageConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(900),
        }
    }
}

/// Tuning for the [`TaskAgent`](crate::TaskAgent) reactor.
///
/// # Example
///
/// ```rust
/// use voidlane::config::TaskAgentConfig;
///
/// let config = TaskAgentConfig::default();
/// assert_eq!(config.max_no_tool_nudges, 3);
/// assert_eq!(config.thinking_budget, 2048);
/// ```
#[derive(Debug, Clone)]
pub struct TaskAgentConfig {
    /// Token budget forwarded to providers that support explicit thinking.
    pub thinking_budget: u32,

    /// Whether provider thought streams should be requested.
    pub include_thoughts: bool,

    /// How long a task may sit with no LLM or event activity before the
    /// runner gives up on it.
    pub idle_timeout: Duration,

    /// How many times the agent nudges an LLM that answered without tool
    /// calls before force-finishing the task.
    pub max_no_tool_nudges: u32,

    /// Delay before a no-tool-call response triggers a nudge. Events arriving
    /// inside the window cancel the nudge.
    pub no_tool_watchdog_delay: Duration,

    /// How long an async tool waits for its completion event before inference
    /// proceeds anyway.
    pub async_completion_timeout: Duration,

    /// Debounce window that batches bursts of events into one inference.
    pub event_batch_inference_delay: Duration,

    /// Abort the task as soon as any `error` event arrives.
    pub stop_on_error_event: bool,
}

impl Default for TaskAgentConfig {
    /// Production defaults; `stop_on_error_event` is read from the
    /// `VOIDLANE_STOP_ON_ERROR_EVENT` environment variable so operators can
    /// flip it without a redeploy.
    fn default() -> Self {
        Self {
            thinking_budget: 2048,
            include_thoughts: true,
            idle_timeout: Duration::from_secs(600),
            max_no_tool_nudges: 3,
            no_tool_watchdog_delay: Duration::from_secs(5),
            async_completion_timeout: Duration::from_secs(5),
            event_batch_inference_delay: Duration::from_secs(1),
            stop_on_error_event: std::env::var(STOP_ON_ERROR_ENV)
                .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_tuning() {
        let combat = CombatManagerConfig::default();
        assert_eq!(combat.round_timeout, Duration::from_secs(15));

        let salvage = SalvageConfig::default();
        assert_eq!(salvage.default_ttl, Duration::from_secs(900));

        let agent = TaskAgentConfig::default();
        assert_eq!(agent.async_completion_timeout, Duration::from_secs(5));
        assert_eq!(agent.event_batch_inference_delay, Duration::from_secs(1));
        assert_eq!(agent.no_tool_watchdog_delay, Duration::from_secs(5));
        assert!(agent.include_thoughts);
    }
}
