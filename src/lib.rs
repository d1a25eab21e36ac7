//! AgentOS — a multi-tenant agent orchestration platform.
//!
//! The crate is organized around five subsystems:
//!
//! - **Gateway** ([`gateway`], [`bus`], [`protocol`]): WebSocket ingress,
//!   a trait-abstracted message bus with queue-group workqueues,
//!   idempotency dedup, per-conversation ordering lanes, circuit-breaker
//!   protection, and correlated reply routing.
//! - **Agents** ([`agent`], [`llm`], [`hooks`], [`session`]): the
//!   per-agent state machine, the bounded tool-using reasoning loop over
//!   streamed completions, lifecycle hooks, context compaction, and
//!   append-only session logs.
//! - **Tools** ([`tools`]): a unified registry, layered allow/deny
//!   policy, shell-command risk classification, sandbox routing, and
//!   MCP gating.
//! - **Orchestration** ([`orchestrator`]): local and federated agent
//!   dispatch bridged through an async push→pull event queue, plus the
//!   spawn/send/broadcast/pipeline/supervisor coordination tools.
//! - **Memory** ([`memory`]): SQLite-backed chunk store with hybrid
//!   BM25 + vector search, temporal decay, MMR re-ranking, and the
//!   compaction-time flush hook.
//!
//! [`runtime::Runtime`] wires the whole stack from one [`config`]
//! document and owns shutdown ordering.

pub mod agent;
pub mod bus;
pub mod channels;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hooks;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod tools;

pub use error::{Error, Result};
