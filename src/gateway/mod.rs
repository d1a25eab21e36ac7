//! The message gateway: ingress auth, envelope validation and dedup,
//! per-lane ordering, breaker-protected routing, and correlated reply
//! delivery back to WebSocket sessions.

pub mod auth;
pub mod breaker;
pub mod core;
pub mod idempotency;
pub mod lanes;
pub mod response_router;
pub mod routes;
pub mod sessions;
pub mod ws;

pub use auth::Authenticator;
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use core::{Gateway, InjectOutcome, ResponseListener, lane_key_for};
pub use idempotency::IdempotencyStore;
pub use lanes::{LaneKey, LaneQueues, SubmitOutcome};
pub use response_router::ResponseRouter;
pub use routes::{GatewayState, router};
pub use sessions::{OutboundFrame, SessionTable};
