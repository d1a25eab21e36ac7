//! Correlation-ID → WebSocket session routing for reply envelopes.

use std::sync::Arc;

use dashmap::DashMap;

use super::sessions::SessionTable;
use crate::protocol::MessageEnvelope;

/// Routes reply envelopes back to the WebSocket session that originated
/// the correlated request. Entries for sessions that have gone away are
/// dropped silently — the client will retry over a fresh connection.
pub struct ResponseRouter {
    sessions: Arc<SessionTable>,
    routes: DashMap<String, String>,
}

impl ResponseRouter {
    pub fn new(sessions: Arc<SessionTable>) -> Self {
        Self {
            sessions,
            routes: DashMap::new(),
        }
    }

    pub fn track(&self, correlation_id: &str, session_id: &str) {
        self.routes
            .insert(correlation_id.to_string(), session_id.to_string());
    }

    pub fn untrack(&self, correlation_id: &str) {
        self.routes.remove(correlation_id);
    }

    /// Drop every correlation owned by a closed session.
    pub fn remove_session(&self, session_id: &str) {
        self.routes.retain(|_, owner| owner != session_id);
    }

    pub fn tracked(&self) -> usize {
        self.routes.len()
    }

    /// Ship `envelope` to the owning session as one JSON frame. Returns
    /// `true` when a frame was actually sent.
    pub fn route(&self, envelope: &MessageEnvelope) -> bool {
        let correlation = envelope.correlation();
        let Some(session_id) = self.routes.get(&correlation).map(|s| s.value().clone()) else {
            return false;
        };
        let frame = match serde_json::to_string(envelope) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%correlation, "failed to serialize reply envelope: {err}");
                return false;
            }
        };
        let sent = self.sessions.send(&session_id, frame);
        if envelope.is_terminal() {
            self.untrack(&correlation);
        }
        sent
    }
}
