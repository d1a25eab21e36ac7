//! The memory-flush hook: conversation history → scored, embedded chunks.
//!
//! Registered on the `memory_flush` event, which the compactor fires with
//! the full history before it truncates. The transcript is chunked with
//! overlap, each chunk scored by a small importance heuristic, embedded
//! in one batch (embedding failure is non-fatal — BM25 alone still
//! works), and upserted. The hook returns its context unchanged.

use std::sync::Arc;

use crate::error::Result;
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::llm::{ChatMessage, Role};

use super::embeddings::EmbeddingProvider;
use super::store::MemoryStore;
use super::types::{MemoryChunk, SourceType};

#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Target words per chunk.
    pub target_tokens: usize,
    /// Words shared between adjacent chunks.
    pub overlap_tokens: usize,
    /// Hard cap per chunk.
    pub max_chunk_tokens: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            target_tokens: 400,
            overlap_tokens: 50,
            max_chunk_tokens: 512,
        }
    }
}

/// Split `text` into overlapping word-boundary chunks.
pub fn split_into_chunks(text: &str, config: &FlushConfig) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let size = config.target_tokens.min(config.max_chunk_tokens).max(1);
    let step = if size > config.overlap_tokens {
        size - config.overlap_tokens
    } else {
        1
    };

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

const DECISION_KEYWORDS: &[&str] = &[
    "decided", "decision", "agreed", "will", "must", "should", "plan",
    "todo", "action", "next step", "deadline", "fix",
];

/// Importance heuristic: decision/action language and code fences boost,
/// trivially short chunks sink.
pub fn score_importance(content: &str) -> f64 {
    let lower = content.to_lowercase();
    let mut score: f64 = 0.4;
    if DECISION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        score += 0.2;
    }
    if content.contains("```") {
        score += 0.15;
    }
    let words = content.split_whitespace().count();
    if words >= 100 {
        score += 0.1;
    } else if words < 10 {
        score -= 0.2;
    }
    score.clamp(0.0, 1.0)
}

fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flush one history snapshot into the store. Returns how many chunks
/// were written (an empty history is a no-op).
pub async fn flush_history(
    store: &MemoryStore,
    embedder: Option<&dyn EmbeddingProvider>,
    config: &FlushConfig,
    agent_id: &str,
    session_id: &str,
    messages: &[ChatMessage],
) -> Result<usize> {
    let text = transcript(messages);
    if text.trim().is_empty() {
        return Ok(0);
    }

    let contents = split_into_chunks(&text, config);
    let embeddings = match embedder {
        Some(embedder) => match embedder.embed_batch(&contents).await {
            Ok(embeddings) => Some(embeddings),
            Err(err) => {
                tracing::warn!("embedding batch failed; storing chunks without vectors: {err}");
                None
            }
        },
        None => None,
    };

    for (index, content) in contents.iter().enumerate() {
        let mut chunk = MemoryChunk::new(agent_id, session_id, content.clone())
            .with_importance(score_importance(content));
        chunk.chunk_index = index;
        chunk.source_type = SourceType::Conversation;
        if let Some(embeddings) = &embeddings
            && let Some(embedding) = embeddings.get(index)
        {
            chunk.embedding = Some(embedding.clone());
        }
        store.upsert(&chunk)?;
    }
    Ok(contents.len())
}

/// Register the flush handler on the hook registry.
pub fn register_memory_flush(
    hooks: &HookRegistry,
    store: Arc<MemoryStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: FlushConfig,
) -> u64 {
    hooks.register(HookEvent::MemoryFlush, 0, move |ctx: HookContext| {
        let store = Arc::clone(&store);
        let embedder = embedder.clone();
        let config = config.clone();
        async move {
            let messages: Vec<ChatMessage> = ctx
                .payload
                .get("messages")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            let written = flush_history(
                &store,
                embedder.as_deref(),
                &config,
                &ctx.agent_id,
                &ctx.session_id,
                &messages,
            )
            .await?;
            if written > 0 {
                tracing::debug!(agent = %ctx.agent_id, chunks = written, "history flushed to memory");
            }
            Ok(ctx)
        }
    })
}
