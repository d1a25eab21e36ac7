//! Memory chunk schema and search options.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Conversation,
    Document,
    Custom(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Conversation => "conversation",
            Self::Document => "document",
            Self::Custom(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "conversation" => Self::Conversation,
            "document" => Self::Document,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// One bounded unit of long-term episodic memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryChunk {
    pub id: String,
    pub agent_id: String,
    pub session_id: String,
    pub content: String,
    /// Clamped to [0, 1] at write.
    pub importance: f64,
    pub token_count: usize,
    pub source_type: SourceType,
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// When present, must match the store's configured dimensionality.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryChunk {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let token_count = content.split_whitespace().count();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            content,
            importance: 0.5,
            token_count,
            source_type: SourceType::Conversation,
            chunk_index: 0,
            created_at: Utc::now(),
            metadata: HashMap::new(),
            embedding: None,
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Knobs for hybrid search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Weight of the vector list in score fusion.
    pub alpha: f64,
    /// Weight of the BM25 list in score fusion.
    pub beta: f64,
    /// Temporal decay half-life, in days.
    pub half_life_days: f64,
    /// MMR relevance/diversity trade-off (1.0 = pure relevance).
    pub lambda: f64,
    pub min_importance: Option<f64>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub agent_id: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            alpha: 0.7,
            beta: 0.3,
            half_life_days: 30.0,
            lambda: 0.7,
            min_importance: None,
            date_from: None,
            date_to: None,
            agent_id: None,
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: MemoryChunk,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_count_tracks_words() {
        let chunk = MemoryChunk::new("a", "s", "one two three");
        assert_eq!(chunk.token_count, 3);
    }

    #[test]
    fn source_type_round_trip() {
        for src in [
            SourceType::Conversation,
            SourceType::Document,
            SourceType::Custom("webpage".into()),
        ] {
            assert_eq!(SourceType::from_str(src.as_str()), src);
        }
    }
}
