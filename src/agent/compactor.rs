//! Context compaction: summarize-and-truncate when the window fills up.
//!
//! Compaction fires the `memory_flush` hook with the full history (the
//! memory engine drains it into long-term store), asks the model for a
//! prose summary of everything except the system prompt and the last
//! three exchanges, replaces the log with
//! `[system] + [summary assistant message] + [last exchanges]`, and then
//! fires `session_compact`. The hook order is guaranteed.

use std::sync::Arc;

use super::context::ConversationContext;
use crate::error::Result;
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::llm::{BoundModel, ChatMessage, Role};

const KEEP_EXCHANGES: usize = 3;

pub struct ContextCompactor {
    hooks: Arc<HookRegistry>,
}

impl ContextCompactor {
    pub fn new(hooks: Arc<HookRegistry>) -> Self {
        Self { hooks }
    }

    /// True when the estimated token count has crossed
    /// `context_window − reserve_tokens`.
    pub fn needs_compaction(&self, ctx: &ConversationContext, model: &BoundModel) -> bool {
        let used = model.count_tokens(ctx.messages());
        used >= model.context_window().saturating_sub(model.reserve_tokens())
    }

    /// Run one compaction pass. Must only be called between turns.
    #[tracing::instrument(name = "agent.compact", skip_all, fields(agent = %agent_id, session = %session_id))]
    pub async fn compact(
        &self,
        ctx: &mut ConversationContext,
        model: &BoundModel,
        agent_id: &str,
        session_id: &str,
    ) -> Result<()> {
        let flush_ctx = HookContext::new(agent_id, session_id)
            .with_payload(serde_json::json!({ "messages": ctx.messages() }));
        self.hooks.fire(HookEvent::MemoryFlush, flush_ctx).await?;

        let messages = ctx.messages();
        let body_start = usize::from(matches!(messages.first(), Some(m) if m.role == Role::System));

        // The tail keeps the last N user→assistant exchanges verbatim,
        // located by walking back to the Nth-from-last user message.
        let user_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .skip(body_start)
            .filter(|(_, m)| m.role == Role::User)
            .map(|(i, _)| i)
            .collect();
        if user_indices.len() <= KEEP_EXCHANGES {
            return Ok(());
        }
        let tail_start = user_indices[user_indices.len() - KEEP_EXCHANGES];

        let to_summarize = &messages[body_start..tail_start];
        if to_summarize.is_empty() {
            return Ok(());
        }

        let excerpt: String = to_summarize
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "System",
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::Tool => "Tool",
                };
                format!("{role}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Summarize the following conversation excerpt in a few concise sentences, \
             keeping decisions, facts, and open follow-ups:\n\n{excerpt}"
        );
        let summary = model
            .complete_text(vec![ChatMessage::user(prompt)])
            .await
            .unwrap_or_else(|_| format!("[{} messages compacted]", to_summarize.len()));

        let mut rebuilt: Vec<ChatMessage> = Vec::with_capacity(2 + messages.len() - tail_start);
        if body_start == 1 {
            rebuilt.push(messages[0].clone());
        }
        rebuilt.push(ChatMessage::assistant(format!(
            "Summary of the earlier conversation: {summary}"
        )));
        rebuilt.extend(messages[tail_start..].iter().cloned());
        ctx.replace_messages(rebuilt);

        let compact_ctx = HookContext::new(agent_id, session_id)
            .with_payload(serde_json::json!({ "summary": summary, "kept": ctx.len() }));
        self.hooks.fire(HookEvent::SessionCompact, compact_ctx).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{ChunkStream, LlmProvider};
    use crate::llm::{CompletionRequest, FinishReason, LlmService, ModelProfile, StreamChunk};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Provider whose summaries are fixed and whose token count is pinned.
    struct FixedProvider {
        tokens: usize,
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn stream(&self, _request: CompletionRequest) -> crate::error::Result<ChunkStream> {
            Ok(Box::pin(futures::stream::iter(vec![
                Ok(StreamChunk::TextDelta("conversation summary".into())),
                Ok(StreamChunk::Done { finish_reason: FinishReason::Stop }),
            ])))
        }
        fn context_window(&self) -> usize {
            1_000
        }
        fn count_tokens(&self, _messages: &[ChatMessage]) -> usize {
            self.tokens
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn bound(tokens: usize) -> BoundModel {
        let mut service = LlmService::new();
        service.register_provider("fixed", Arc::new(FixedProvider { tokens }));
        service.add_profile(
            "default",
            ModelProfile {
                provider: "fixed".into(),
                model: "m".into(),
                context_window: 1_000,
                reserve_tokens: 200,
                temperature: None,
                max_tokens: None,
            },
        );
        service.resolve("default").unwrap()
    }

    fn five_exchanges() -> ConversationContext {
        let mut ctx = ConversationContext::with_system("persona");
        for i in 1..=5 {
            ctx.push_user(format!("Q{i}"));
            ctx.push(ChatMessage::assistant(format!("A{i}")));
        }
        ctx
    }

    #[test]
    fn trigger_is_window_minus_reserve() {
        let compactor = ContextCompactor::new(Arc::new(HookRegistry::new()));
        let ctx = five_exchanges();
        assert!(compactor.needs_compaction(&ctx, &bound(1_000)));
        assert!(compactor.needs_compaction(&ctx, &bound(800)));
        assert!(!compactor.needs_compaction(&ctx, &bound(799)));
    }

    #[tokio::test]
    async fn compaction_keeps_system_summary_and_last_three_exchanges() {
        let compactor = ContextCompactor::new(Arc::new(HookRegistry::new()));
        let mut ctx = five_exchanges();
        compactor
            .compact(&mut ctx, &bound(1_000), "a", "s")
            .await
            .unwrap();

        let messages = ctx.messages();
        assert_eq!(messages.len(), 8, "system + summary + 3 exchanges");
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.contains("conversation summary"));
        let tail: Vec<&str> = messages[2..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(tail, vec!["Q3", "A3", "Q4", "A4", "Q5", "A5"]);
    }

    #[tokio::test]
    async fn memory_flush_fires_before_session_compact_exactly_once() {
        let hooks = Arc::new(HookRegistry::new());
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let order = Arc::clone(&order);
            hooks.register(HookEvent::MemoryFlush, 0, move |ctx| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push("memory_flush");
                    Ok(ctx)
                }
            });
        }
        {
            let order = Arc::clone(&order);
            hooks.register(HookEvent::SessionCompact, 0, move |ctx| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push("session_compact");
                    Ok(ctx)
                }
            });
        }

        let compactor = ContextCompactor::new(hooks);
        let mut ctx = five_exchanges();
        compactor
            .compact(&mut ctx, &bound(1_000), "a", "s")
            .await
            .unwrap();

        assert_eq!(*order.lock(), vec!["memory_flush", "session_compact"]);
    }

    #[tokio::test]
    async fn short_history_is_left_alone() {
        let compactor = ContextCompactor::new(Arc::new(HookRegistry::new()));
        let mut ctx = ConversationContext::with_system("persona");
        ctx.push_user("Q1");
        ctx.push(ChatMessage::assistant("A1"));
        let before = ctx.messages().to_vec();

        compactor
            .compact(&mut ctx, &bound(1_000), "a", "s")
            .await
            .unwrap();
        assert_eq!(ctx.messages(), &before[..]);
    }
}
