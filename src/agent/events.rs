//! Events emitted by a running agent loop.

use serde::{Deserialize, Serialize};

use crate::llm::{ToolCall, Usage};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TurnStart {
        iteration: usize,
    },
    /// One accumulated assistant turn (text plus any tool calls).
    AssistantMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// A hook vetoed the tool call.
    ToolBlocked {
        name: String,
        reason: String,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        success: bool,
        result: String,
        duration_ms: u64,
    },
    Usage {
        usage: Usage,
    },
    MaxTurnsReached {
        iterations: usize,
    },
    Done,
    Error {
        message: String,
    },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. } | Self::MaxTurnsReached { .. })
    }
}
