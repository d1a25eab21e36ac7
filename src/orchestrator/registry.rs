//! Cross-agent lookup: local entries with live status, remote stubs for
//! everyone else.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::event_queue::AsyncEventQueue;
use super::remote::{DEFAULT_REMOTE_TIMEOUT, RemoteAgentEntry};
use crate::agent::AgentManager;
use crate::bus::MessageBus;
use crate::error::Result;
use crate::protocol::MessageEnvelope;

/// One dispatchable agent, local or remote.
#[async_trait]
pub trait AgentEntry: Send + Sync {
    fn agent_id(&self) -> &str;

    async fn status(&self) -> String;

    /// Send a request and stream back its events until terminal.
    async fn dispatch(&self, envelope: MessageEnvelope) -> Result<AsyncEventQueue<MessageEnvelope>>;
}

/// A locally managed agent: status comes straight from the control
/// block, dispatch rides the same bus path remote callers use (the inbox
/// workqueue serializes either way).
pub struct LocalAgentEntry {
    manager: Arc<AgentManager>,
    inner: RemoteAgentEntry,
    agent_id: String,
}

impl LocalAgentEntry {
    pub fn new(agent_id: impl Into<String>, manager: Arc<AgentManager>, bus: Arc<dyn MessageBus>) -> Self {
        let agent_id = agent_id.into();
        Self {
            inner: RemoteAgentEntry::new(agent_id.clone(), bus, DEFAULT_REMOTE_TIMEOUT),
            manager,
            agent_id,
        }
    }
}

#[async_trait]
impl AgentEntry for LocalAgentEntry {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn status(&self) -> String {
        self.manager
            .status(&self.agent_id)
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "UNKNOWN".to_string())
    }

    async fn dispatch(&self, envelope: MessageEnvelope) -> Result<AsyncEventQueue<MessageEnvelope>> {
        self.inner.dispatch(envelope).await
    }
}

/// Agent ID → entry. Lookups for unknown IDs synthesize a remote stub so
/// cross-node dispatch needs no registration step.
pub struct OrchestratorRegistry {
    local: DashMap<String, Arc<dyn AgentEntry>>,
    bus: Arc<dyn MessageBus>,
    remote_timeout: Duration,
}

impl OrchestratorRegistry {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            local: DashMap::new(),
            bus,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn register_local(&self, entry: Arc<dyn AgentEntry>) {
        self.local.insert(entry.agent_id().to_string(), entry);
    }

    pub fn is_local(&self, agent_id: &str) -> bool {
        self.local.contains_key(agent_id)
    }

    pub fn local_ids(&self) -> Vec<String> {
        self.local.iter().map(|e| e.key().clone()).collect()
    }

    /// Resolve an entry, falling back to a remote stub.
    pub fn lookup(&self, agent_id: &str) -> Arc<dyn AgentEntry> {
        match self.local.get(agent_id) {
            Some(entry) => Arc::clone(entry.value()),
            None => Arc::new(RemoteAgentEntry::new(
                agent_id,
                Arc::clone(&self.bus),
                self.remote_timeout,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::protocol::kind;

    struct StaticEntry(&'static str);

    #[async_trait]
    impl AgentEntry for StaticEntry {
        fn agent_id(&self) -> &str {
            self.0
        }
        async fn status(&self) -> String {
            "READY".into()
        }
        async fn dispatch(
            &self,
            _envelope: MessageEnvelope,
        ) -> Result<AsyncEventQueue<MessageEnvelope>> {
            let queue = AsyncEventQueue::new();
            queue.push(MessageEnvelope::new(
                kind::TASK_DONE,
                "agent://static",
                "agent://caller",
                serde_json::json!({}),
            ));
            queue.complete();
            Ok(queue)
        }
    }

    #[tokio::test]
    async fn local_entry_wins_lookup() {
        let registry = OrchestratorRegistry::new(Arc::new(InProcessBus::new()));
        registry.register_local(Arc::new(StaticEntry("planner")));

        assert!(registry.is_local("planner"));
        let entry = registry.lookup("planner");
        assert_eq!(entry.status().await, "READY");
    }

    #[tokio::test]
    async fn unknown_id_synthesizes_remote_stub() {
        let registry = OrchestratorRegistry::new(Arc::new(InProcessBus::new()));
        assert!(!registry.is_local("elsewhere"));
        let entry = registry.lookup("elsewhere");
        assert_eq!(entry.agent_id(), "elsewhere");
        assert_eq!(entry.status().await, "REMOTE");
    }
}
