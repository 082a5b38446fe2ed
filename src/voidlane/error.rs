//! Crate-wide error type.
//!
//! Every fallible public operation in voidlane returns `Result<T, GameError>`.
//! The variants map onto the failure classes the game protocol distinguishes:
//! bad input, bad state, missing entities, transport loss, deadline expiry,
//! server-reported RPC errors, and local storage failures.

use std::error::Error;
use std::fmt;
use std::io;

/// Unified error type for the voidlane crate.
#[derive(Debug)]
pub enum GameError {
    /// The caller supplied invalid input (wrong commodity, zero commit,
    /// character_id mismatch, out-of-range arguments). No state was mutated.
    Validation(String),

    /// The operation is not allowed in the current state (encounter already
    /// ended, duplicate combat id, unknown participant).
    State(String),

    /// A referenced entity (character, encounter, sector, salvage) does not
    /// exist.
    NotFound(String),

    /// The transport failed mid-flight (socket closed, connection refused).
    /// Pending RPC futures are failed with this variant.
    Transport(String),

    /// A wait expired before its condition was met.
    Timeout(String),

    /// The server answered an RPC with an error frame.
    Rpc {
        /// Endpoint that was invoked.
        endpoint: String,
        /// HTTP-style status carried in the error frame.
        status: u16,
        /// Human-readable detail from the server.
        detail: String,
        /// Optional machine-readable error code.
        code: Option<String>,
    },

    /// Invariant violation or unexpected internal condition.
    Internal(String),

    /// Local persistence failed (garrison snapshot I/O).
    Storage(io::Error),
}

impl GameError {
    /// Shorthand constructor for [`GameError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        GameError::Validation(msg.into())
    }

    /// Shorthand constructor for [`GameError::State`].
    pub fn state(msg: impl Into<String>) -> Self {
        GameError::State(msg.into())
    }

    /// Shorthand constructor for [`GameError::NotFound`].
    pub fn not_found(msg: impl Into<String>) -> Self {
        GameError::NotFound(msg.into())
    }

    /// True when the error came back from the server as an RPC error frame.
    pub fn is_rpc(&self) -> bool {
        matches!(self, GameError::Rpc { .. })
    }
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::Validation(msg) => write!(f, "Validation error: {}", msg),
            GameError::State(msg) => write!(f, "State error: {}", msg),
            GameError::NotFound(msg) => write!(f, "Not found: {}", msg),
            GameError::Transport(msg) => write!(f, "Transport error: {}", msg),
            GameError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            GameError::Rpc {
                endpoint,
                status,
                detail,
                ..
            } => write!(f, "{} failed with status {}: {}", endpoint, status, detail),
            GameError::Internal(msg) => write!(f, "Internal error: {}", msg),
            GameError::Storage(err) => write!(f, "Storage error: {}", err),
        }
    }
}

impl Error for GameError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GameError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for GameError {
    fn from(err: io::Error) -> Self {
        GameError::Storage(err)
    }
}

impl From<serde_json::Error> for GameError {
    fn from(err: serde_json::Error) -> Self {
        GameError::Internal(format!("serialization failure: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_display_matches_wire_shape() {
        let err = GameError::Rpc {
            endpoint: "combat.action".to_string(),
            status: 409,
            detail: "Combat encounter already ended".to_string(),
            code: Some("combat_ended".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "combat.action failed with status 409: Combat encounter already ended"
        );
        assert!(err.is_rpc());
    }

    #[test]
    fn test_io_error_converts_to_storage() {
        let err: GameError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, GameError::Storage(_)));
    }
}
