//! Per-agent lifecycle and dispatch.
//!
//! Each registered agent owns an Agent Control Block guarded by the
//! status state machine. A dispatch cycle is strictly READY → RUNNING →
//! READY (or → ERROR); an envelope arriving while the agent is busy is
//! left unacked so the workqueue redelivers it. Every event the loop
//! emits is forwarded to the request's reply-to subject; reply-path
//! publish failures are logged and swallowed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::context::ConversationContext;
use super::events::AgentEvent;
use super::loop_::{AgentLoop, AgentLoopConfig};
use crate::bus::Delivery;
use crate::channels::binding::BindingRegistry;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::llm::LlmService;
use crate::protocol::{MessageEnvelope, agent_inbox, kind};
use crate::session::{SessionRecord, SessionStore, replay};
use crate::tools::{PolicyEngine, PolicyLayer, ToolExecutor, ToolRegistry};

/// Queue group shared by agent-manager replicas across nodes.
const AGENT_QUEUE_GROUP: &str = "agents";

// ─── Status machine ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Registered,
    Initializing,
    Ready,
    Running,
    Suspended,
    Terminated,
    Error,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Registered => "REGISTERED",
            Self::Initializing => "INITIALIZING",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Terminated => "TERMINATED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// The legal lifecycle moves.
pub fn can_transition(from: AgentStatus, to: AgentStatus) -> bool {
    use AgentStatus::*;
    match (from, to) {
        (Registered, Initializing) => true,
        (Initializing, Ready) => true,
        (Ready, Running) => true,
        (Running, Ready) | (Running, Suspended) => true,
        (Suspended, Running) => true,
        // ERROR is a sink reachable from any non-terminal state.
        (f, Error) => !f.is_terminal() && f != Error,
        // Shutdown may terminate from any live state.
        (f, Terminated) => !f.is_terminal(),
        _ => false,
    }
}

// ─── Control block ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlBlock {
    pub agent_id: String,
    pub status: AgentStatus,
    pub priority: i32,
    pub current_task_id: Option<String>,
    pub loop_iteration: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl ControlBlock {
    fn new(agent_id: &str, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.to_string(),
            status: AgentStatus::Registered,
            priority,
            current_task_id: None,
            loop_iteration: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            created_at: now,
            last_active_at: now,
        }
    }
}

// ─── Definitions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub agent_id: String,
    pub system_prompt: String,
    pub model_profile: String,
    pub policy: PolicyLayer,
    pub mcp_pinned: Vec<String>,
    pub max_turns: usize,
    pub priority: i32,
}

struct AgentHandle {
    definition: AgentDefinition,
    acb: parking_lot::Mutex<ControlBlock>,
}

// ─── Manager ──────────────────────────────────────────────────────────────────

pub struct AgentManager {
    agents: DashMap<String, Arc<AgentHandle>>,
    llm: Arc<LlmService>,
    registry: Arc<ToolRegistry>,
    hooks: Arc<HookRegistry>,
    policy_engine: Arc<PolicyEngine>,
    executor: Arc<ToolExecutor>,
    sessions: Arc<SessionStore>,
    gateway: Arc<Gateway>,
    bindings: Arc<BindingRegistry>,
    consumers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl AgentManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<LlmService>,
        registry: Arc<ToolRegistry>,
        hooks: Arc<HookRegistry>,
        policy_engine: Arc<PolicyEngine>,
        executor: Arc<ToolExecutor>,
        sessions: Arc<SessionStore>,
        gateway: Arc<Gateway>,
        bindings: Arc<BindingRegistry>,
    ) -> Self {
        Self {
            agents: DashMap::new(),
            llm,
            registry,
            hooks,
            policy_engine,
            executor,
            sessions,
            gateway,
            bindings,
            consumers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Register an agent and walk it to READY.
    pub fn register(&self, definition: AgentDefinition) -> Result<()> {
        let agent_id = definition.agent_id.clone();
        if self.agents.contains_key(&agent_id) {
            return Err(Error::Config(format!("agent '{agent_id}' is already registered")));
        }
        let acb = ControlBlock::new(&agent_id, definition.priority);
        self.agents
            .insert(agent_id.clone(), Arc::new(AgentHandle {
                definition,
                acb: parking_lot::Mutex::new(acb),
            }));
        self.transition(&agent_id, AgentStatus::Initializing)?;
        self.transition(&agent_id, AgentStatus::Ready)?;
        Ok(())
    }

    pub fn status(&self, agent_id: &str) -> Result<AgentStatus> {
        self.agents
            .get(agent_id)
            .map(|h| h.acb.lock().status)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))
    }

    pub fn control_block(&self, agent_id: &str) -> Result<ControlBlock> {
        self.agents
            .get(agent_id)
            .map(|h| h.acb.lock().clone())
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    /// Apply a validated status transition.
    pub fn transition(&self, agent_id: &str, to: AgentStatus) -> Result<AgentStatus> {
        let handle = self
            .agents
            .get(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        let mut acb = handle.acb.lock();
        if !can_transition(acb.status, to) {
            return Err(Error::InvalidStateTransition {
                from: acb.status.to_string(),
                to: to.to_string(),
            });
        }
        acb.status = to;
        acb.last_active_at = Utc::now();
        Ok(to)
    }

    /// Subscribe every registered agent's inbox workqueue.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for agent_id in self.agent_ids() {
            let mut sub = self
                .gateway
                .subscribe(&agent_inbox(&agent_id), Some(AGENT_QUEUE_GROUP))
                .await?;
            let manager = Arc::clone(self);
            let id = agent_id.clone();
            let task = tokio::spawn(async move {
                while let Some(delivery) = sub.next().await {
                    manager.handle_delivery(&id, delivery).await;
                }
            });
            self.consumers.lock().push(task);
        }
        Ok(())
    }

    async fn handle_delivery(self: &Arc<Self>, agent_id: &str, delivery: Delivery) {
        // Busy or broken agents leave the message unacked; the workqueue
        // redelivers it until the delivery cap.
        if let Err(err) = self.transition(agent_id, AgentStatus::Running) {
            tracing::warn!(agent = %agent_id, attempt = delivery.attempt, "dispatch deferred: {err}");
            return;
        }
        let envelope = delivery.envelope.clone();
        {
            let handle = self.agents.get(agent_id);
            if let Some(handle) = handle {
                handle.acb.lock().current_task_id = Some(envelope.id.clone());
            }
        }

        let result = self.dispatch(agent_id, &envelope).await;
        delivery.ack().await;

        if let Some(handle) = self.agents.get(agent_id) {
            handle.acb.lock().current_task_id = None;
        }
        match result {
            Ok(()) => {
                let _ = self.transition(agent_id, AgentStatus::Ready);
            }
            Err(err) => {
                tracing::error!(agent = %agent_id, "dispatch failed: {err}");
                let _ = self.transition(agent_id, AgentStatus::Error);
                self.publish_reply(
                    &envelope,
                    agent_id,
                    kind::TASK_ERROR,
                    serde_json::json!({ "error": err.to_string() }),
                )
                .await;
            }
        }
    }

    /// Best-effort reply publish; failures never disrupt the loop.
    async fn publish_reply(
        &self,
        request: &MessageEnvelope,
        agent_id: &str,
        reply_kind: &str,
        data: serde_json::Value,
    ) {
        let Some(reply_to) = request.reply_to.as_deref() else {
            return;
        };
        let envelope = request.reply(reply_kind, format!("agent://{agent_id}"), data);
        if let Err(err) = self.gateway.publish_core(reply_to, &envelope).await {
            tracing::warn!(agent = %agent_id, subject = %reply_to, "reply publish failed: {err}");
        }
    }

    /// One full dispatch: session recovery, the loop, persistence, and
    /// the terminal envelope.
    #[tracing::instrument(name = "agent.dispatch", skip_all, fields(agent = %agent_id, envelope = %envelope.id))]
    async fn dispatch(self: &Arc<Self>, agent_id: &str, envelope: &MessageEnvelope) -> Result<()> {
        let handle = self
            .agents
            .get(agent_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        let definition = handle.definition.clone();

        let text = envelope
            .data
            .get("text")
            .or_else(|| envelope.data.get("task"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        // Session: resume when the client names one, else start fresh.
        let (session_id, mut ctx) = match envelope.metadata.get("sessionId") {
            Some(session_id) if self.sessions.exists(agent_id, session_id).await => {
                let records = self.sessions.load(agent_id, session_id).await?;
                let mut ctx = ConversationContext::from_messages(replay(&records));
                if ctx.system_prompt().is_none() {
                    ctx.set_system(definition.system_prompt.as_str());
                }
                (session_id.clone(), ctx)
            }
            _ => {
                let session_id = self.sessions.create(agent_id).await?;
                let ctx = ConversationContext::with_system(definition.system_prompt.as_str());
                self.sessions
                    .append(
                        agent_id,
                        &session_id,
                        &SessionRecord::Message {
                            message: crate::llm::ChatMessage::system(definition.system_prompt.as_str()),
                        },
                    )
                    .await?;
                (session_id, ctx)
            }
        };

        let input_ctx = HookContext::new(agent_id, session_id.as_str())
            .with_payload(serde_json::json!({ "text": text }));
        let input_ctx = self.hooks.fire(HookEvent::Input, input_ctx).await?;
        let text = input_ctx
            .payload
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or(&text)
            .to_string();

        ctx.push_user(text.as_str());
        self.sessions
            .append(
                agent_id,
                &session_id,
                &SessionRecord::Message {
                    message: crate::llm::ChatMessage::user(text.as_str()),
                },
            )
            .await?;

        let model = self.llm.resolve(&definition.model_profile)?;

        let binding_policy: Option<PolicyLayer> = envelope
            .metadata
            .get("bindingId")
            .and_then(|raw| raw.parse::<usize>().ok())
            .and_then(|index| self.bindings.get(index))
            .and_then(|binding| binding.tools.clone());
        let policy = self
            .policy_engine
            .resolve(Some(&definition.policy), binding_policy.as_ref());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(Self::forward_events(
            events_rx,
            Arc::clone(self),
            Arc::clone(&handle),
            envelope.clone(),
            agent_id.to_string(),
            session_id.clone(),
        ));

        let agent_loop = AgentLoop {
            model,
            registry: Arc::clone(&self.registry),
            executor: Arc::clone(&self.executor),
            hooks: Arc::clone(&self.hooks),
            policy_engine: Arc::clone(&self.policy_engine),
            policy,
            mcp_pinned: definition.mcp_pinned.clone(),
            config: AgentLoopConfig {
                max_turns: definition.max_turns,
            },
            agent_id: agent_id.to_string(),
            session_id: session_id.clone(),
            events: events_tx,
            cancel: None,
        };

        let start_ctx = HookContext::new(agent_id, session_id.as_str())
            .with_payload(serde_json::json!({ "envelope": envelope.id }));
        self.hooks
            .fire(HookEvent::BeforeAgentStart, start_ctx.clone())
            .await?;
        self.hooks.fire(HookEvent::AgentStart, start_ctx).await?;

        let before = ctx.len();
        let run_result = agent_loop.run(&mut ctx).await;
        drop(agent_loop); // close the event channel so the forwarder drains
        let _ = forwarder.await;

        let end_ctx = HookContext::new(agent_id, session_id.as_str()).with_payload(serde_json::json!({
            "envelope": envelope.id,
            "ok": run_result.is_ok(),
        }));
        if let Err(err) = self.hooks.fire(HookEvent::AgentEnd, end_ctx).await {
            tracing::warn!(agent = %agent_id, "agent_end hook failed: {err}");
        }

        // Persist what the loop appended. Compaction rewrites the log, in
        // which case a summary marker stands in for the rewritten tail.
        if ctx.len() >= before {
            for message in &ctx.messages()[before..] {
                self.sessions
                    .append(
                        agent_id,
                        &session_id,
                        &SessionRecord::Message {
                            message: message.clone(),
                        },
                    )
                    .await?;
            }
        } else {
            self.sessions
                .append(
                    agent_id,
                    &session_id,
                    &SessionRecord::Summary {
                        text: "context compacted".to_string(),
                    },
                )
                .await?;
        }

        match run_result {
            Ok(()) => {
                self.publish_reply(
                    envelope,
                    agent_id,
                    kind::TASK_DONE,
                    serde_json::json!({ "sessionId": session_id }),
                )
                .await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn forward_events(
        mut events: mpsc::UnboundedReceiver<AgentEvent>,
        manager: Arc<AgentManager>,
        handle: Arc<AgentHandle>,
        request: MessageEnvelope,
        agent_id: String,
        session_id: String,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::TurnStart { iteration } => {
                    handle.acb.lock().loop_iteration = iteration;
                }
                AgentEvent::Usage { usage } => {
                    let mut acb = handle.acb.lock();
                    acb.prompt_tokens += u64::from(usage.prompt_tokens);
                    acb.completion_tokens += u64::from(usage.completion_tokens);
                }
                AgentEvent::AssistantMessage { text, tool_calls } => {
                    let mut data = serde_json::json!({
                        "text": text,
                        "sessionId": session_id,
                    });
                    if !tool_calls.is_empty() {
                        data["toolCalls"] = serde_json::json!(tool_calls);
                    }
                    manager
                        .publish_reply(&request, &agent_id, kind::TASK_RESPONSE, data)
                        .await;
                }
                AgentEvent::ToolResult {
                    tool_call_id,
                    name,
                    success,
                    result,
                    duration_ms,
                } => {
                    manager
                        .publish_reply(
                            &request,
                            &agent_id,
                            "tool.result",
                            serde_json::json!({
                                "toolCallId": tool_call_id,
                                "name": name,
                                "success": success,
                                "result": result,
                                "durationMs": duration_ms,
                                "sessionId": session_id,
                            }),
                        )
                        .await;
                }
                AgentEvent::ToolBlocked { name, reason } => {
                    manager
                        .publish_reply(
                            &request,
                            &agent_id,
                            "tool.blocked",
                            serde_json::json!({ "name": name, "reason": reason }),
                        )
                        .await;
                }
                AgentEvent::MaxTurnsReached { iterations } => {
                    manager
                        .publish_reply(
                            &request,
                            &agent_id,
                            "agent.max_turns",
                            serde_json::json!({ "iterations": iterations }),
                        )
                        .await;
                }
                AgentEvent::Done | AgentEvent::Error { .. } => {
                    // Terminals are published after the loop settles.
                }
            }
        }
    }

    /// Terminate every agent and stop the inbox consumers.
    pub fn shutdown(&self) {
        for task in self.consumers.lock().drain(..) {
            task.abort();
        }
        for entry in self.agents.iter() {
            let mut acb = entry.value().acb.lock();
            if can_transition(acb.status, AgentStatus::Terminated) {
                acb.status = AgentStatus::Terminated;
                acb.last_active_at = Utc::now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_lifecycle_path() {
        use AgentStatus::*;
        let path = [
            (Registered, Initializing),
            (Initializing, Ready),
            (Ready, Running),
            (Running, Suspended),
            (Suspended, Running),
            (Running, Ready),
            (Ready, Terminated),
        ];
        for (from, to) in path {
            assert!(can_transition(from, to), "{from} -> {to} should be legal");
        }
    }

    #[test]
    fn illegal_moves_are_rejected() {
        use AgentStatus::*;
        for (from, to) in [
            (Registered, Running),
            (Ready, Suspended),
            (Suspended, Ready),
            (Terminated, Ready),
            (Terminated, Error),
            (Error, Running),
        ] {
            assert!(!can_transition(from, to), "{from} -> {to} must be illegal");
        }
    }

    #[test]
    fn error_is_reachable_from_any_non_terminal() {
        use AgentStatus::*;
        for from in [Registered, Initializing, Ready, Running, Suspended] {
            assert!(can_transition(from, Error));
        }
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = Error::InvalidStateTransition {
            from: AgentStatus::Ready.to_string(),
            to: AgentStatus::Suspended.to_string(),
        };
        assert_eq!(err.to_string(), "invalid state transition: READY -> SUSPENDED");
    }
}
