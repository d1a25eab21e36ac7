//! The provider seam: anything that can stream chat completions.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use super::accumulator::ResponseAccumulator;
use super::types::{AssistantTurn, ChatMessage, CompletionRequest};
use crate::error::Result;

/// A stream of completion chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<super::types::StreamChunk>> + Send>>;

/// Abstraction over an LLM backend that streams text and tool-call deltas.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Start a streaming completion.
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream>;

    /// Total context window in tokens.
    fn context_window(&self) -> usize;

    /// Estimate the token count of a message list. The default is the
    /// usual chars/4 heuristic; providers with real tokenizers override.
    fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        let chars: usize = messages
            .iter()
            .map(|m| m.content.len() + m.tool_calls.iter().map(|c| c.arguments.len() + c.name.len()).sum::<usize>())
            .sum();
        chars.div_ceil(4)
    }

    fn name(&self) -> &str;

    /// Drain a streaming completion into one accumulated turn.
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantTurn> {
        let mut stream = self.stream(request).await?;
        let mut acc = ResponseAccumulator::new();
        while let Some(chunk) = stream.next().await {
            acc.push(chunk?);
        }
        Ok(acc.finish())
    }
}
