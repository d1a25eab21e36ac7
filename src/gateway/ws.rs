//! WebSocket ingress: upgrade handling, inbound envelope parsing, and
//! outbound frame fan-out.
//!
//! Each connection gets a session ID and an entry in the session table.
//! Inbound frames are (possibly partial) JSON envelopes — the client may
//! omit `id`, `source`, and `time`; they are filled in server-side. A
//! parse failure is answered with a single `{"error":"Invalid message
//! format"}` frame. Replies stream back via the response router.

use std::collections::HashMap;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::auth::extract_token;
use super::routes::GatewayState;
use super::sessions::OutboundFrame;
use crate::protocol::{MessageEnvelope, kind};

/// WebSocket upgrade handler at `GET /ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<GatewayState>,
) -> Response {
    let token = extract_token(&headers, &params);
    match state.auth.resolve(token.as_deref()) {
        Ok(user_id) => ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)),
        Err(err) => {
            tracing::debug!("ws handshake rejected: {err}");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

// ─── Inbound envelope ─────────────────────────────────────────────────────────

/// Wire form of an inbound envelope. Clients may omit the server-minted
/// fields; everything else mirrors [`MessageEnvelope`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct InboundEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    source: Option<String>,
    target: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    causation_id: Option<String>,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    sequence_number: Option<u64>,
    #[serde(default)]
    ttl: Option<u64>,
    #[serde(default)]
    trace_context: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl InboundEnvelope {
    fn into_envelope(self, user_id: &str) -> MessageEnvelope {
        MessageEnvelope {
            id: self.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
            kind: self.kind,
            source: self
                .source
                .unwrap_or_else(|| format!("channel://ws/{user_id}")),
            target: self.target,
            time: self.time.unwrap_or_else(Utc::now),
            data: self.data,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            reply_to: self.reply_to,
            idempotency_key: self.idempotency_key,
            sequence_number: self.sequence_number,
            ttl: self.ttl,
            trace_context: self.trace_context,
            metadata: self.metadata,
        }
    }
}

/// Parse an inbound text frame into a full envelope.
fn parse_inbound(raw: &str, user_id: &str) -> Option<MessageEnvelope> {
    serde_json::from_str::<InboundEnvelope>(raw)
        .ok()
        .map(|e| e.into_envelope(user_id))
}

// ─── Socket handler ───────────────────────────────────────────────────────────

async fn handle_socket(mut socket: WebSocket, state: GatewayState, user_id: String) {
    let session_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    state.sessions.insert(&session_id, tx.clone());
    tracing::info!(session = %session_id, user = %user_id, "ws session opened");

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(OutboundFrame::Text(text)) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close(code)) => {
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: "server shutdown".into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&text, &state, &session_id, &user_id).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.sessions.remove(&session_id);
    state.gateway.response_router().remove_session(&session_id);
    tracing::info!(session = %session_id, "ws session closed");
}

async fn handle_inbound(raw: &str, state: &GatewayState, session_id: &str, user_id: &str) {
    let Some(mut envelope) = parse_inbound(raw, user_id) else {
        state
            .sessions
            .send(session_id, r#"{"error":"Invalid message format"}"#.to_string());
        return;
    };

    let correlation = envelope.correlation();
    state
        .gateway
        .response_router()
        .track(&correlation, session_id);
    if envelope.reply_to.is_none() {
        envelope.reply_to = Some(state.gateway.reply_inbox().to_string());
    }
    envelope
        .metadata
        .entry("userId".to_string())
        .or_insert_with(|| user_id.to_string());

    if let Err(err) = state.gateway.inject_message(envelope).await {
        let error_frame = MessageEnvelope::new(
            kind::TASK_ERROR,
            "gateway://ingress",
            format!("channel://ws/{user_id}"),
            serde_json::json!({ "error": err.to_string() }),
        )
        .with_correlation_id(&correlation);
        if let Ok(frame) = serde_json::to_string(&error_frame) {
            state.sessions.send(session_id, frame);
        }
        state.gateway.response_router().untrack(&correlation);
    }
}
