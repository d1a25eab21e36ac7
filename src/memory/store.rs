//! SQLite-backed chunk store with hybrid BM25 + vector search.
//!
//! Chunks live in a relational table with secondary indexes; an FTS5
//! mirror table maintained by triggers provides the BM25 candidate list,
//! and a companion table holds embeddings (little-endian `f32` BLOBs) of
//! the configured dimensionality, scanned with cosine similarity. The
//! connection runs in WAL mode with a 5-second busy timeout; writes
//! serialize on the internal lock, readers are unaffected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use super::ranking::{cosine, fuse, min_max_normalize, mmr_select, temporal_decay};
use super::types::{MemoryChunk, SearchHit, SearchOptions, SourceType};
use crate::error::{Error, Result};

/// How many candidates each list contributes before fusion.
const CANDIDATE_POOL: usize = 50;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    content TEXT NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5,
    token_count INTEGER NOT NULL DEFAULT 0,
    source_type TEXT NOT NULL DEFAULT 'conversation',
    chunk_index INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_chunks_agent ON chunks (agent_id);
CREATE INDEX IF NOT EXISTS idx_chunks_session ON chunks (session_id);
CREATE INDEX IF NOT EXISTS idx_chunks_created ON chunks (created_at);
CREATE INDEX IF NOT EXISTS idx_chunks_importance ON chunks (importance);
CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks (source_type);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    content='chunks',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
END;
CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES('delete', old.rowid, old.content);
END;
CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES('delete', old.rowid, old.content);
    INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
END;

CREATE TABLE IF NOT EXISTS chunk_vectors (
    chunk_id TEXT PRIMARY KEY NOT NULL,
    embedding BLOB NOT NULL
);
"#;

// ─── Embedding codec ──────────────────────────────────────────────────────────

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Quote each token so user input cannot inject FTS5 operators.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ─── Store ────────────────────────────────────────────────────────────────────

pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
    dimension: usize,
}

impl MemoryStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &str, dimension: usize) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Memory(format!("open: {e}")))?;
        Self::init(conn, dimension)
    }

    /// In-memory store, for tests and ephemeral deployments.
    pub fn in_memory(dimension: usize) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::Memory(format!("open: {e}")))?;
        Self::init(conn, dimension)
    }

    fn init(conn: Connection, dimension: usize) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| Error::Memory(format!("busy_timeout: {e}")))?;
        // journal_mode returns a row, so execute_batch cannot set it.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(|e| Error::Memory(format!("pragma: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Memory(format!("schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Memory(format!("lock poisoned: {e}")))
    }

    /// Insert or update a chunk. Importance is clamped to [0, 1];
    /// a present embedding must match the configured dimensionality.
    pub fn upsert(&self, chunk: &MemoryChunk) -> Result<()> {
        if let Some(embedding) = &chunk.embedding
            && embedding.len() != self.dimension
        {
            return Err(Error::Memory(format!(
                "embedding dimension {} does not match configured {}",
                embedding.len(),
                self.dimension
            )));
        }
        let importance = chunk.importance.clamp(0.0, 1.0);
        let metadata = serde_json::to_string(&chunk.metadata)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO chunks (id, agent_id, session_id, content, importance,
                                token_count, source_type, chunk_index, created_at, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                content     = excluded.content,
                importance  = excluded.importance,
                token_count = excluded.token_count,
                source_type = excluded.source_type,
                chunk_index = excluded.chunk_index,
                metadata    = excluded.metadata
            "#,
            params![
                chunk.id,
                chunk.agent_id,
                chunk.session_id,
                chunk.content,
                importance,
                chunk.token_count as i64,
                chunk.source_type.as_str(),
                chunk.chunk_index as i64,
                chunk.created_at.to_rfc3339(),
                metadata,
            ],
        )
        .map_err(|e| Error::Memory(format!("upsert: {e}")))?;

        match &chunk.embedding {
            Some(embedding) => {
                conn.execute(
                    r#"
                    INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?1, ?2)
                    ON CONFLICT(chunk_id) DO UPDATE SET embedding = excluded.embedding
                    "#,
                    params![chunk.id, encode_embedding(embedding)],
                )
                .map_err(|e| Error::Memory(format!("vector upsert: {e}")))?;
            }
            None => {
                conn.execute(
                    "DELETE FROM chunk_vectors WHERE chunk_id = ?1",
                    params![chunk.id],
                )
                .map_err(|e| Error::Memory(format!("vector delete: {e}")))?;
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<MemoryChunk>> {
        let conn = self.lock()?;
        let chunk = conn
            .query_row(
                r#"
                SELECT c.id, c.agent_id, c.session_id, c.content, c.importance,
                       c.token_count, c.source_type, c.chunk_index, c.created_at,
                       c.metadata, v.embedding
                FROM chunks c LEFT JOIN chunk_vectors v ON v.chunk_id = c.id
                WHERE c.id = ?1
                "#,
                params![id],
                Self::row_to_chunk,
            )
            .map(Some);
        match chunk {
            Ok(chunk) => Ok(chunk),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Memory(format!("get: {e}"))),
        }
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM chunk_vectors WHERE chunk_id = ?1", params![id])
            .map_err(|e| Error::Memory(format!("delete: {e}")))?;
        let deleted = conn
            .execute("DELETE FROM chunks WHERE id = ?1", params![id])
            .map_err(|e| Error::Memory(format!("delete: {e}")))?;
        Ok(deleted > 0)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as usize)
        .map_err(|e| Error::Memory(format!("count: {e}")))
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryChunk> {
        let created_at: String = row.get(8)?;
        let metadata: String = row.get(9)?;
        let embedding: Option<Vec<u8>> = row.get(10)?;
        Ok(MemoryChunk {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            session_id: row.get(2)?,
            content: row.get(3)?,
            importance: row.get(4)?,
            token_count: row.get::<_, i64>(5)? as usize,
            source_type: SourceType::from_str(&row.get::<_, String>(6)?),
            chunk_index: row.get::<_, i64>(7)? as usize,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            embedding: embedding.as_deref().map(decode_embedding),
        })
    }

    /// BM25 candidate list from the FTS index (higher score = better).
    pub fn bm25_candidates(
        &self,
        query: &str,
        limit: usize,
        agent_id: Option<&str>,
    ) -> Result<HashMap<String, f64>> {
        if query.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let fts_query = sanitize_fts_query(query);
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT c.id, c.agent_id, -bm25(chunks_fts) AS rank
                FROM chunks_fts
                JOIN chunks c ON c.rowid = chunks_fts.rowid
                WHERE chunks_fts MATCH ?1
                ORDER BY rank DESC
                LIMIT ?2
                "#,
            )
            .map_err(|e| Error::Memory(format!("bm25 prepare: {e}")))?;
        let rows = stmt
            .query_map(params![fts_query, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })
            .map_err(|e| Error::Memory(format!("bm25 query: {e}")))?;

        let mut scores = HashMap::new();
        for row in rows.flatten() {
            let (id, agent, score) = row;
            if agent_id.is_none_or(|a| a == agent) {
                scores.insert(id, score);
            }
        }
        Ok(scores)
    }

    /// Vector nearest-neighbor list by cosine similarity.
    pub fn vector_candidates(
        &self,
        query_embedding: &[f32],
        limit: usize,
        agent_id: Option<&str>,
    ) -> Result<HashMap<String, f64>> {
        if query_embedding.len() != self.dimension {
            return Err(Error::Memory(format!(
                "query embedding dimension {} does not match configured {}",
                query_embedding.len(),
                self.dimension
            )));
        }
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT v.chunk_id, c.agent_id, v.embedding
                FROM chunk_vectors v JOIN chunks c ON c.id = v.chunk_id
                "#,
            )
            .map_err(|e| Error::Memory(format!("vector prepare: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(|e| Error::Memory(format!("vector query: {e}")))?;

        let mut scored: Vec<(String, f64)> = Vec::new();
        for row in rows.flatten() {
            let (id, agent, bytes) = row;
            if agent_id.is_none_or(|a| a == agent) {
                let similarity = cosine(query_embedding, &decode_embedding(&bytes));
                scored.push((id, similarity));
            }
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored.into_iter().collect())
    }

    /// Hybrid search: BM25 + vector candidates, min-max normalized,
    /// fused, decayed by age, MMR re-ranked, then filtered.
    pub fn hybrid_search(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let mut bm25 = self.bm25_candidates(query, CANDIDATE_POOL, opts.agent_id.as_deref())?;
        let mut vector = match query_embedding {
            Some(embedding) => {
                self.vector_candidates(embedding, CANDIDATE_POOL, opts.agent_id.as_deref())?
            }
            None => HashMap::new(),
        };
        min_max_normalize(&mut bm25);
        min_max_normalize(&mut vector);
        let fused = fuse(&vector, &bm25, opts.alpha, opts.beta);

        let now = Utc::now();
        let mut candidates: Vec<(MemoryChunk, f64)> = Vec::new();
        for (id, relevance) in fused {
            let Some(chunk) = self.get(&id)? else {
                continue;
            };
            if let Some(min) = opts.min_importance
                && chunk.importance < min
            {
                continue;
            }
            if let Some(from) = opts.date_from
                && chunk.created_at < from
            {
                continue;
            }
            if let Some(to) = opts.date_to
                && chunk.created_at > to
            {
                continue;
            }
            let days = (now - chunk.created_at).num_seconds() as f64 / 86_400.0;
            let score = temporal_decay(relevance, days, opts.half_life_days);
            candidates.push((chunk, score));
        }

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        let pool: Vec<(String, f64)> = candidates
            .iter()
            .map(|(chunk, score)| (chunk.content.clone(), *score))
            .collect();
        let picked = mmr_select(&pool, opts.lambda, opts.limit);

        Ok(picked
            .into_iter()
            .map(|i| SearchHit {
                chunk: candidates[i].0.clone(),
                score: candidates[i].1,
            })
            .collect())
    }
}
