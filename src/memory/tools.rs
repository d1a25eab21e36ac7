//! Memory tools surfaced to the agent: `memory_search` and `memory_get`.

use std::sync::Arc;

use serde_json::{Value, json};

use super::embeddings::EmbeddingProvider;
use super::store::MemoryStore;
use super::types::{MemoryChunk, SearchOptions};
use crate::tools::{FnHandler, ToolAnnotations, ToolDefinition, ToolEntry, ToolSource};

fn chunk_json(chunk: &MemoryChunk, score: Option<f64>) -> Value {
    let mut out = json!({
        "id": chunk.id,
        "content": chunk.content,
        "importance": chunk.importance,
        "sourceType": chunk.source_type.as_str(),
        "sessionId": chunk.session_id,
        "createdAt": chunk.created_at.to_rfc3339(),
    });
    if let Some(score) = score {
        out["score"] = json!(score);
    }
    out
}

pub fn memory_search_tool(
    store: Arc<MemoryStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "memory_search",
            "Search long-term memory for chunks relevant to a query.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 50},
                    "min_importance": {"type": "number", "minimum": 0, "maximum": 1}
                },
                "required": ["query"]
            }),
        )
        .with_annotations(ToolAnnotations::read_only()),
        FnHandler::new(move |args| {
            let store = Arc::clone(&store);
            let embedder = embedder.clone();
            async move {
                let query = args["query"].as_str().ok_or("'query' must be a string")?.to_string();
                let mut opts = SearchOptions::default();
                if let Some(limit) = args["limit"].as_u64() {
                    opts.limit = limit as usize;
                }
                opts.min_importance = args["min_importance"].as_f64();

                let embedding = match &embedder {
                    Some(embedder) => embedder.embed(&query).await.ok(),
                    None => None,
                };
                let hits = store
                    .hybrid_search(&query, embedding.as_deref(), &opts)
                    .map_err(|e| e.to_string())?;
                Ok(Value::Array(
                    hits.iter()
                        .map(|h| chunk_json(&h.chunk, Some(h.score)))
                        .collect(),
                ))
            }
        }),
    )
    .with_source(ToolSource::Memory)
}

pub fn memory_get_tool(store: Arc<MemoryStore>) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "memory_get",
            "Fetch one memory chunk by its ID.",
            json!({
                "type": "object",
                "properties": {
                    "chunk_id": {"type": "string"}
                },
                "required": ["chunk_id"]
            }),
        )
        .with_annotations(ToolAnnotations::read_only()),
        FnHandler::new(move |args| {
            let store = Arc::clone(&store);
            async move {
                let id = args["chunk_id"].as_str().ok_or("'chunk_id' must be a string")?;
                match store.get(id).map_err(|e| e.to_string())? {
                    Some(chunk) => Ok(chunk_json(&chunk, None)),
                    None => Err(format!("no memory chunk with id '{id}'")),
                }
            }
        }),
    )
    .with_source(ToolSource::Memory)
}

/// Both memory tools, ready for registration.
pub fn memory_tools(
    store: Arc<MemoryStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> Vec<ToolEntry> {
    vec![
        memory_search_tool(Arc::clone(&store), embedder),
        memory_get_tool(store),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryChunk;

    fn seeded_store() -> Arc<MemoryStore> {
        let store = MemoryStore::in_memory(8).unwrap();
        store
            .upsert(&MemoryChunk::new("a", "s", "the release plan ships next week").with_importance(0.8))
            .unwrap();
        store
            .upsert(&MemoryChunk::new("a", "s", "lunch order was sandwiches").with_importance(0.2))
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn search_returns_ranked_chunks() {
        let tool = memory_search_tool(seeded_store(), None);
        let out = tool
            .handler
            .call(json!({"query": "release plan"}))
            .await
            .unwrap();
        let hits = out.as_array().unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0]["content"].as_str().unwrap().contains("release plan"));
        assert!(hits[0]["score"].is_number());
    }

    #[tokio::test]
    async fn search_honors_min_importance() {
        let tool = memory_search_tool(seeded_store(), None);
        let out = tool
            .handler
            .call(json!({"query": "sandwiches", "min_importance": 0.5}))
            .await
            .unwrap();
        assert!(out.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_round_trips_a_chunk() {
        let store = seeded_store();
        let chunk = MemoryChunk::new("a", "s", "fetch me by id");
        store.upsert(&chunk).unwrap();

        let tool = memory_get_tool(store);
        let out = tool
            .handler
            .call(json!({"chunk_id": chunk.id}))
            .await
            .unwrap();
        assert_eq!(out["content"], "fetch me by id");

        let err = tool.handler.call(json!({"chunk_id": "missing"})).await;
        assert!(err.is_err());
    }
}
