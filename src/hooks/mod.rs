//! Ordered, chaining lifecycle hooks.
//!
//! Handlers register against a named lifecycle event with an integer
//! priority (lower runs first; ties run in registration order). Firing an
//! event runs the handlers serially: each receives the context returned by
//! the previous one, and the final value goes back to the caller. A
//! handler vetoes the operation by returning [`Error::HookBlock`]; the
//! registry propagates it unchanged so the agent loop can convert it into
//! a synthetic tool result. Any other handler error stops the chain.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::error::{Error, Result};

// ─── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    Input,
    BeforeAgentStart,
    AgentStart,
    TurnStart,
    ContextAssemble,
    ToolCall,
    ToolExecutionStart,
    ToolExecutionEnd,
    ToolResult,
    TurnEnd,
    AgentEnd,
    MemoryFlush,
    SessionCompact,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::BeforeAgentStart => "before_agent_start",
            Self::AgentStart => "agent_start",
            Self::TurnStart => "turn_start",
            Self::ContextAssemble => "context_assemble",
            Self::ToolCall => "tool_call",
            Self::ToolExecutionStart => "tool_execution_start",
            Self::ToolExecutionEnd => "tool_execution_end",
            Self::ToolResult => "tool_result",
            Self::TurnEnd => "turn_end",
            Self::AgentEnd => "agent_end",
            Self::MemoryFlush => "memory_flush",
            Self::SessionCompact => "session_compact",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Context ──────────────────────────────────────────────────────────────────

/// The typed envelope threaded through a hook chain.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub agent_id: String,
    pub session_id: String,
    /// Event-specific payload (tool call, message list, iteration, …).
    pub payload: serde_json::Value,
}

impl HookContext {
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

pub type HookHandler =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<HookContext>> + Send + Sync>;

struct Registration {
    priority: i32,
    id: u64,
    handler: HookHandler,
}

/// Per-event sorted handler lists. Registration takes the write lock;
/// firing snapshots the list under the read lock.
pub struct HookRegistry {
    handlers: RwLock<HashMap<HookEvent, Vec<Registration>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Register a handler; returns an ID usable with [`unregister`].
    ///
    /// [`unregister`]: Self::unregister
    pub fn register<F, Fut>(&self, event: HookEvent, priority: i32, handler: F) -> u64
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookContext>> + Send + 'static,
    {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let wrapped: HookHandler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        let mut map = self.handlers.write();
        let list = map.entry(event).or_default();
        list.push(Registration {
            priority,
            id,
            handler: wrapped,
        });
        list.sort_by_key(|r| (r.priority, r.id));
        id
    }

    pub fn unregister(&self, event: HookEvent, id: u64) -> bool {
        let mut map = self.handlers.write();
        match map.get_mut(&event) {
            Some(list) => {
                let before = list.len();
                list.retain(|r| r.id != id);
                list.len() != before
            }
            None => false,
        }
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.handlers.read().get(&event).map_or(0, Vec::len)
    }

    /// Run the event's handlers in priority order, chaining contexts.
    pub async fn fire(&self, event: HookEvent, ctx: HookContext) -> Result<HookContext> {
        let snapshot: Vec<HookHandler> = {
            let map = self.handlers.read();
            map.get(&event)
                .map(|list| list.iter().map(|r| Arc::clone(&r.handler)).collect())
                .unwrap_or_default()
        };

        let mut current = ctx;
        for handler in snapshot {
            match handler(current).await {
                Ok(next) => current = next,
                Err(err @ Error::HookBlock { .. }) => return Err(err),
                Err(err) => {
                    tracing::warn!(event = %event, "hook handler failed: {err}");
                    return Err(err);
                }
            }
        }
        Ok(current)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
