//! The canonical message envelope.
//!
//! Every message on the bus, over a WebSocket, or between agents is wrapped
//! in a CloudEvents-1.0 shaped [`MessageEnvelope`]. Envelope IDs are UUIDv7
//! so that they sort by creation time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known envelope `type` values. The field stays an open string so
/// adapters can mint their own event types without touching the core.
pub mod kind {
    pub const TASK_REQUEST: &str = "task.request";
    pub const TASK_RESPONSE: &str = "task.response";
    pub const TASK_DONE: &str = "task.done";
    pub const TASK_ERROR: &str = "task.error";
    pub const TOOL_INVOKE: &str = "tool.invoke";
}

/// CloudEvents-shaped wrapper around every message in the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Unique, monotonically orderable message ID (UUIDv7).
    pub id: String,
    /// Event type, e.g. `task.request`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Originating URI: `agent://<id>`, `gateway://<node>`, or
    /// `channel://<type>/<sender>`.
    pub source: String,
    /// Destination URI: `agent://<id>` or `topic://<name>`.
    pub target: String,
    /// RFC 3339 creation time.
    pub time: DateTime<Utc>,
    /// Opaque payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Interaction correlation. When absent on a response it defaults to
    /// the request's `id`; all subsequent events in the interaction share it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// ID of the envelope that directly caused this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// Bus subject for asynchronous replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    /// Time-to-live in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl MessageEnvelope {
    /// Create an envelope with a fresh UUIDv7 id and the current time.
    pub fn new(
        kind: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind: kind.into(),
            source: source.into(),
            target: target.into(),
            time: Utc::now(),
            data,
            correlation_id: None,
            causation_id: None,
            reply_to: None,
            idempotency_key: None,
            sequence_number: None,
            ttl: None,
            trace_context: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, subject: impl Into<String>) -> Self {
        self.reply_to = Some(subject.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Build a reply to this envelope. The reply inherits the correlation
    /// ID (defaulting to this envelope's `id`) and records causation.
    pub fn reply(&self, kind: impl Into<String>, source: impl Into<String>, data: serde_json::Value) -> Self {
        let mut reply = Self::new(kind, source, self.source.clone(), data);
        reply.correlation_id = Some(self.correlation());
        reply.causation_id = Some(self.id.clone());
        reply
    }

    /// Effective correlation ID: the explicit one, else this envelope's id.
    pub fn correlation(&self) -> String {
        self.correlation_id.clone().unwrap_or_else(|| self.id.clone())
    }

    /// The key the idempotency store dedups on.
    pub fn dedup_key(&self) -> &str {
        self.idempotency_key.as_deref().unwrap_or(&self.id)
    }

    /// Terminal envelopes end a request/reply interaction.
    pub fn is_terminal(&self) -> bool {
        self.kind == kind::TASK_DONE || self.kind == kind::TASK_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MessageEnvelope {
        MessageEnvelope::new(
            kind::TASK_REQUEST,
            "channel://ws/user-1",
            "agent://helper",
            serde_json::json!({"text": "hi"}),
        )
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = request();
        let b = request();
        assert!(a.id < b.id, "v7 ids should sort by creation: {} < {}", a.id, b.id);
    }

    #[test]
    fn correlation_defaults_to_id() {
        let req = request();
        assert_eq!(req.correlation(), req.id);

        let tagged = request().with_correlation_id("c1");
        assert_eq!(tagged.correlation(), "c1");
    }

    #[test]
    fn reply_inherits_correlation_and_causation() {
        let req = request().with_correlation_id("c1");
        let reply = req.reply(kind::TASK_RESPONSE, "agent://helper", serde_json::json!({"text": "hello"}));
        assert_eq!(reply.correlation_id.as_deref(), Some("c1"));
        assert_eq!(reply.causation_id.as_deref(), Some(req.id.as_str()));
        assert_eq!(reply.target, "channel://ws/user-1");
    }

    #[test]
    fn dedup_key_prefers_idempotency_key() {
        let req = request();
        assert_eq!(req.dedup_key(), req.id);
        let keyed = request().with_idempotency_key("op-42");
        assert_eq!(keyed.dedup_key(), "op-42");
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let mut env = request().with_correlation_id("c9").with_reply_to("_INBOX.x");
        env.metadata.insert("team".into(), "blue".into());
        env.sequence_number = Some(7);

        let json = serde_json::to_string(&env).unwrap();
        let back: MessageEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let env = request().with_correlation_id("c1");
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("correlationId").is_some());
        assert!(json.get("type").is_some());
        assert!(json.get("correlation_id").is_none());
    }

    #[test]
    fn terminal_kinds() {
        let mut env = request();
        assert!(!env.is_terminal());
        env.kind = kind::TASK_DONE.into();
        assert!(env.is_terminal());
        env.kind = kind::TASK_ERROR.into();
        assert!(env.is_terminal());
    }
}
