//! Unified LLM types: conversation messages, tool calls, streaming chunks,
//! and the accumulated assistant turn.

use serde::{Deserialize, Serialize};

// ─── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation request minted by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque, provider-minted ID. Unique within one assistant turn.
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, exactly as the model produced it.
    pub arguments: String,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on tool-role messages: which call this answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on assistant-role messages that request tool calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
        }
    }

    /// A tool-role message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

// ─── Requests ─────────────────────────────────────────────────────────────────

/// The subset of a tool definition a provider needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ─── Streaming ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    EndTurn,
    Length,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    /// True for the reasons that end a turn without pending tool calls.
    pub fn is_natural_stop(&self) -> bool {
        matches!(self, Self::Stop | Self::EndTurn | Self::Length)
    }

    pub fn from_wire(s: &str) -> Self {
        match s {
            "stop" => Self::Stop,
            "end_turn" => Self::EndTurn,
            "length" => Self::Length,
            "tool_calls" => Self::ToolCalls,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One unit of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    TextDelta(String),
    /// Incremental tool-call update, keyed by the call's ID. Later deltas
    /// with the same ID append to `arguments` and may fill in `name`.
    ToolCallDelta {
        id: String,
        name: Option<String>,
        arguments: String,
    },
    Usage(Usage),
    Done { finish_reason: FinishReason },
}

/// The fully accumulated assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: FinishReason,
}

impl AssistantTurn {
    /// Convert into the conversation message this turn appends.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::assistant_with_tools(self.text.clone(), self.tool_calls.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
        assert_eq!(ChatMessage::assistant("a").role, Role::Assistant);
        let tool = ChatMessage::tool("call-1", "out");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn finish_reason_wire_mapping() {
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::ToolCalls);
        assert!(matches!(FinishReason::from_wire("weird"), FinishReason::Other(_)));
        assert!(FinishReason::Length.is_natural_stop());
        assert!(!FinishReason::ToolCalls.is_natural_stop());
    }

    #[test]
    fn request_builder() {
        let req = CompletionRequest::new("m", vec![ChatMessage::user("hi")])
            .with_temperature(0.2)
            .with_max_tokens(64);
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(64));
    }
}
