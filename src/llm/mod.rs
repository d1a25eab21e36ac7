//! LLM integration: unified types, the provider seam, streaming
//! accumulation, profile binding, and the OpenAI-compatible backend.

pub mod accumulator;
pub mod openai;
pub mod provider;
pub mod service;
pub mod types;

pub use accumulator::ResponseAccumulator;
pub use openai::OpenAiProvider;
pub use provider::{ChunkStream, LlmProvider};
pub use service::{BoundModel, LlmService, ModelProfile};
pub use types::{
    AssistantTurn, ChatMessage, CompletionRequest, FinishReason, Role, StreamChunk, ToolCall,
    ToolSpec, Usage,
};
