//! Crate-wide error taxonomy.
//!
//! One enum covers every failure mode a component can surface; modules
//! narrow it at their boundaries where useful. Tool execution errors are
//! deliberately *not* part of this enum — they are captured into structured
//! tool-result messages so the model can react (see `tools::executor`).

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Flow control raised by a hook handler to veto a tool call.
    /// The agent loop converts it into a synthetic tool result.
    #[error("blocked by hook: {reason}")]
    HookBlock { reason: String },

    /// Illegal agent lifecycle move.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A session log contains an unparseable record.
    #[error("session '{session_id}' is corrupt: {detail}")]
    SessionCorrupt { session_id: String, detail: String },

    /// No model profile is bound for the agent, or the lookup failed.
    #[error("LLM provider unavailable: {0}")]
    LlmProviderUnavailable(String),

    /// A streaming or completion call against a provider failed.
    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    /// A tool with the same name is already registered.
    #[error("tool '{0}' is already registered")]
    ToolConflict(String),

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    /// Tool arguments failed JSON-Schema validation. `path` points at the
    /// violated property; `hint` is a one-line fix derived from the schema.
    #[error("tool validation failed at '{path}': {hint}")]
    ToolValidation { path: String, hint: String },

    /// Sandbox or in-sandbox executor failure.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// A dependency is protected by a tripped circuit breaker.
    #[error("circuit open for '{dependency}'")]
    CircuitOpen { dependency: String },

    /// A lane queue is over its backpressure watermark.
    #[error("backpressure: lane '{lane}' is over watermark {watermark}")]
    Backpressure { lane: String, watermark: usize },

    /// Idempotency cache hit. Not logged as an error; callers treat it as
    /// silent success.
    #[error("duplicate envelope '{0}'")]
    Duplicate(String),

    #[error("cyclic plugin dependency: {0}")]
    CyclicDependency(String),

    #[error("plugin dependency '{missing}' required by '{plugin}' is not loaded")]
    PluginDependency { plugin: String, missing: String },

    #[error("plugin load failed: {0}")]
    PluginLoad(String),

    /// Unknown URI scheme in routing.
    #[error("invalid target '{0}': expected agent:// or topic://")]
    InvalidTarget(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Cooperative cancellation observed at a suspension point.
    #[error("cancelled")]
    Cancelled,

    /// Message bus failure (publish, subscribe, or the bus being down).
    #[error("bus error: {0}")]
    Bus(String),

    /// Key-value store failure.
    #[error("kv error: {0}")]
    Kv(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("memory store error: {0}")]
    Memory(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Construct the hook-veto flow-control error.
    pub fn hook_block(reason: impl Into<String>) -> Self {
        Self::HookBlock {
            reason: reason.into(),
        }
    }

    /// True for errors the reply path swallows instead of propagating.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_both_states() {
        let err = Error::InvalidStateTransition {
            from: "READY".into(),
            to: "TERMINATED".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("READY"));
        assert!(msg.contains("TERMINATED"));
    }

    #[test]
    fn session_corrupt_names_session() {
        let err = Error::SessionCorrupt {
            session_id: "s-123".into(),
            detail: "bad json at line 4".into(),
        };
        assert!(err.to_string().contains("s-123"));
    }

    #[test]
    fn duplicate_is_flagged() {
        assert!(Error::Duplicate("id".into()).is_duplicate());
        assert!(!Error::InvalidTarget("x://y".into()).is_duplicate());
    }
}
