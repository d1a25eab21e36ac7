//! The episodic memory engine: chunk store, hybrid search, the flush
//! hook, and the agent-facing memory tools.

pub mod embeddings;
pub mod flush;
pub mod ranking;
pub mod store;
pub mod tools;
pub mod types;

pub use embeddings::{EmbeddingProvider, HashingEmbedder};
pub use flush::{FlushConfig, flush_history, register_memory_flush};
pub use store::MemoryStore;
pub use tools::memory_tools;
pub use types::{MemoryChunk, SearchHit, SearchOptions, SourceType};
