//! HTTP surface of the gateway: the WebSocket upgrade route and a health
//! probe.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::auth::Authenticator;
use super::core::Gateway;
use super::sessions::SessionTable;
use super::ws::ws_handler;

/// Shared state handed to every gateway route handler.
#[derive(Clone)]
pub struct GatewayState {
    pub gateway: Arc<Gateway>,
    pub sessions: Arc<SessionTable>,
    pub auth: Arc<Authenticator>,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
