//! The bounded tool-using reasoning loop.
//!
//! One call to [`AgentLoop::run`] drives a whole dispatch: assemble the
//! context, stream the model, execute tool calls under policy and hooks,
//! emit events, and repeat until the model stops, a hook vetoes the last
//! pending work, or the turn cap is reached. Compaction runs strictly
//! between turns.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use super::compactor::ContextCompactor;
use super::context::ConversationContext;
use super::events::AgentEvent;
use crate::error::{Error, Result};
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::llm::{BoundModel, ResponseAccumulator, StreamChunk, ToolCall};
use crate::tools::{EffectivePolicy, PolicyEngine, ToolExecutor, ToolRegistry};

#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub max_turns: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self { max_turns: 100 }
    }
}

pub struct AgentLoop {
    pub model: BoundModel,
    pub registry: Arc<ToolRegistry>,
    pub executor: Arc<ToolExecutor>,
    pub hooks: Arc<HookRegistry>,
    pub policy_engine: Arc<PolicyEngine>,
    pub policy: EffectivePolicy,
    pub mcp_pinned: Vec<String>,
    pub config: AgentLoopConfig,
    pub agent_id: String,
    pub session_id: String,
    pub events: mpsc::UnboundedSender<AgentEvent>,
    /// Cooperative cancellation, observed at turn boundaries.
    pub cancel: Option<Arc<std::sync::atomic::AtomicBool>>,
}

impl AgentLoop {
    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    fn hook_ctx(&self, payload: serde_json::Value) -> HookContext {
        HookContext::new(&self.agent_id, &self.session_id).with_payload(payload)
    }

    /// Assemble the turn's message list. `context_assemble` handlers may
    /// produce a new list (tools summary, runtime info, skill sections…);
    /// the stored context is not mutated.
    async fn assemble(&self, ctx: &ConversationContext) -> Result<Vec<crate::llm::ChatMessage>> {
        let out = self
            .hooks
            .fire(
                HookEvent::ContextAssemble,
                self.hook_ctx(serde_json::json!({ "messages": ctx.messages() })),
            )
            .await?;
        match out.payload.get("messages") {
            Some(messages) => Ok(serde_json::from_value(messages.clone())?),
            None => Ok(ctx.messages().to_vec()),
        }
    }

    async fn run_tool_call(&self, ctx: &mut ConversationContext, call: &ToolCall) -> Result<()> {
        // A hook may veto the call; the veto becomes a synthetic result.
        let hook_payload = serde_json::json!({
            "id": call.id,
            "name": call.name,
            "arguments": call.arguments,
        });
        match self
            .hooks
            .fire(HookEvent::ToolCall, self.hook_ctx(hook_payload.clone()))
            .await
        {
            Ok(_) => {}
            Err(Error::HookBlock { reason }) => {
                ctx.push_tool_result(call.id.as_str(), format!("[blocked: {reason}]"));
                self.emit(AgentEvent::ToolBlocked {
                    name: call.name.clone(),
                    reason,
                });
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        // Policy denial is a failed execution the model can react to.
        if !self.policy.is_allowed(&call.name) {
            let message = format!("blocked by policy: {}", call.name);
            self.policy_engine
                .log_decision(&call.name, "denied", Some("layered policy"));
            ctx.push_tool_result(call.id.as_str(), message.as_str());
            self.emit(AgentEvent::ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                success: false,
                result: message,
                duration_ms: 0,
            });
            return Ok(());
        }

        self.hooks
            .fire(HookEvent::ToolExecutionStart, self.hook_ctx(hook_payload.clone()))
            .await?;

        let execution = self.executor.execute(call, &self.registry).await;
        self.policy_engine.log_decision(
            &call.name,
            if execution.success { "allowed" } else { "failed" },
            execution.error.as_deref(),
        );

        self.hooks
            .fire(
                HookEvent::ToolExecutionEnd,
                self.hook_ctx(serde_json::json!({
                    "id": call.id,
                    "name": call.name,
                    "success": execution.success,
                    "durationMs": execution.duration_ms,
                })),
            )
            .await?;

        let result_text = execution.result_text();
        ctx.push_tool_result(call.id.as_str(), result_text.as_str());
        self.emit(AgentEvent::ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: execution.success,
            result: result_text.clone(),
            duration_ms: execution.duration_ms,
        });
        self.hooks
            .fire(
                HookEvent::ToolResult,
                self.hook_ctx(serde_json::json!({
                    "id": call.id,
                    "name": call.name,
                    "success": execution.success,
                    "result": result_text,
                })),
            )
            .await?;
        Ok(())
    }

    /// Drive the loop to completion, mutating `ctx` in place.
    #[tracing::instrument(
        name = "agent.loop",
        skip_all,
        fields(agent = %self.agent_id, session = %self.session_id, max_turns = self.config.max_turns)
    )]
    pub async fn run(&self, ctx: &mut ConversationContext) -> Result<()> {
        let compactor = ContextCompactor::new(Arc::clone(&self.hooks));
        let mut iteration = 0usize;

        loop {
            if let Some(cancel) = &self.cancel
                && cancel.load(std::sync::atomic::Ordering::SeqCst)
            {
                return Err(Error::Cancelled);
            }

            self.hooks
                .fire(
                    HookEvent::TurnStart,
                    self.hook_ctx(serde_json::json!({ "iteration": iteration })),
                )
                .await?;
            self.emit(AgentEvent::TurnStart { iteration });

            let messages = self.assemble(ctx).await?;
            let entries =
                self.policy_engine
                    .effective_tools(&self.registry, &self.policy, &self.mcp_pinned);
            let specs = entries.iter().map(|e| e.definition.to_spec()).collect();

            let mut stream = self.model.stream(messages, specs).await?;
            let mut acc = ResponseAccumulator::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if let StreamChunk::Usage(usage) = &chunk {
                    self.emit(AgentEvent::Usage { usage: usage.clone() });
                }
                acc.push(chunk);
            }
            let turn = acc.finish();

            self.emit(AgentEvent::AssistantMessage {
                text: turn.text.clone(),
                tool_calls: turn.tool_calls.clone(),
            });
            ctx.push_assistant(&turn);

            if turn.tool_calls.is_empty() && turn.finish_reason.is_natural_stop() {
                self.emit(AgentEvent::Done);
                return Ok(());
            }

            for call in &turn.tool_calls {
                self.run_tool_call(ctx, call).await?;
            }

            self.hooks
                .fire(
                    HookEvent::TurnEnd,
                    self.hook_ctx(serde_json::json!({
                        "assistant": turn.to_message(),
                        "iteration": iteration,
                    })),
                )
                .await?;

            iteration += 1;
            if iteration >= self.config.max_turns {
                self.emit(AgentEvent::MaxTurnsReached { iterations: iteration });
                return Ok(());
            }

            // Never mid-turn.
            if compactor.needs_compaction(ctx, &self.model) {
                compactor
                    .compact(ctx, &self.model, &self.agent_id, &self.session_id)
                    .await?;
            }
        }
    }
}
