//! Append-only JSONL session persistence.
//!
//! One file per session under `<base>/<agent_id>/<session_id>.jsonl`. The
//! first record is a header; subsequent records are messages, tool
//! results, and compaction summaries. Writes are serialized per session
//! with an advisory async lock; reads are lock-free. Any unparseable
//! record surfaces as a corruption error naming the session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, Role};

// ─── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionRecord {
    Header {
        session_id: String,
        agent_id: String,
        created_at: DateTime<Utc>,
    },
    Message {
        message: ChatMessage,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        success: bool,
        output: String,
        duration_ms: u64,
    },
    Summary {
        text: String,
    },
}

// ─── Store ────────────────────────────────────────────────────────────────────

pub struct SessionStore {
    base: PathBuf,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            locks: DashMap::new(),
        }
    }

    fn path(&self, agent_id: &str, session_id: &str) -> PathBuf {
        self.base.join(agent_id).join(format!("{session_id}.jsonl"))
    }

    fn lock_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Create a new session file with its header. Returns the session ID.
    pub async fn create(&self, agent_id: &str) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let header = SessionRecord::Header {
            session_id: session_id.clone(),
            agent_id: agent_id.to_string(),
            created_at: Utc::now(),
        };
        self.append(agent_id, &session_id, &header).await?;
        Ok(session_id)
    }

    /// Append one record (newline-delimited JSON).
    pub async fn append(
        &self,
        agent_id: &str,
        session_id: &str,
        record: &SessionRecord,
    ) -> Result<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let path = self.path(agent_id, session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn exists(&self, agent_id: &str, session_id: &str) -> bool {
        tokio::fs::try_exists(self.path(agent_id, session_id))
            .await
            .unwrap_or(false)
    }

    /// Load every record of a session, in order.
    pub async fn load(&self, agent_id: &str, session_id: &str) -> Result<Vec<SessionRecord>> {
        let path = self.path(agent_id, session_id);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::SessionCorrupt {
                session_id: session_id.to_string(),
                detail: format!("cannot read session file: {e}"),
            }
        })?;

        let mut records = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: SessionRecord =
                serde_json::from_str(line).map_err(|e| Error::SessionCorrupt {
                    session_id: session_id.to_string(),
                    detail: format!("bad record at line {}: {e}", line_no + 1),
                })?;
            if line_no == 0 && !matches!(record, SessionRecord::Header { .. }) {
                return Err(Error::SessionCorrupt {
                    session_id: session_id.to_string(),
                    detail: "first record is not a header".to_string(),
                });
            }
            records.push(record);
        }
        Ok(records)
    }

    /// List the session IDs stored for an agent.
    pub async fn list_sessions(&self, agent_id: &str) -> Result<Vec<String>> {
        let dir = self.base.join(agent_id);
        let mut sessions = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".jsonl") {
                sessions.push(id.to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

/// Rebuild a conversation from a session log. The header is skipped; the
/// system prompt (if any) stays first; tool results replay as tool-role
/// messages so the context keeps its adjacency shape.
pub fn replay(records: &[SessionRecord]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    for record in records {
        match record {
            SessionRecord::Header { .. } => {}
            SessionRecord::Message { message } => messages.push(message.clone()),
            SessionRecord::ToolResult {
                tool_call_id,
                output,
                ..
            } => messages.push(ChatMessage::tool(tool_call_id.clone(), output.clone())),
            SessionRecord::Summary { text } => {
                messages.push(ChatMessage::assistant(text.clone()));
            }
        }
    }
    debug_assert!(
        messages.iter().skip(1).all(|m| m.role != Role::System),
        "system prompt must stay unique and first"
    );
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn create_writes_header_first() {
        let (_dir, store) = store();
        let session_id = store.create("helper").await.unwrap();
        let records = store.load("helper", &session_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(
            &records[0],
            SessionRecord::Header { agent_id, .. } if agent_id == "helper"
        ));
    }

    #[tokio::test]
    async fn append_and_load_round_trip() {
        let (_dir, store) = store();
        let session_id = store.create("helper").await.unwrap();
        store
            .append(
                "helper",
                &session_id,
                &SessionRecord::Message {
                    message: ChatMessage::user("hi"),
                },
            )
            .await
            .unwrap();
        store
            .append(
                "helper",
                &session_id,
                &SessionRecord::ToolResult {
                    tool_call_id: "c1".into(),
                    name: "read_file".into(),
                    success: true,
                    output: "contents".into(),
                    duration_ms: 4,
                },
            )
            .await
            .unwrap();

        let records = store.load("helper", &session_id).await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn corrupt_record_names_the_session() {
        let (dir, store) = store();
        let session_id = store.create("helper").await.unwrap();
        let path = dir.path().join("helper").join(format!("{session_id}.jsonl"));
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{this is not json\n");
        std::fs::write(&path, content).unwrap();

        let err = store.load("helper", &session_id).await;
        match err {
            Err(Error::SessionCorrupt { session_id: s, detail }) => {
                assert_eq!(s, session_id);
                assert!(detail.contains("line 2"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_header_is_corrupt() {
        let (dir, store) = store();
        let path = dir.path().join("helper").join("s1.jsonl");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"kind\":\"summary\",\"text\":\"x\"}\n").unwrap();
        assert!(matches!(
            store.load("helper", "s1").await,
            Err(Error::SessionCorrupt { .. })
        ));
    }

    #[tokio::test]
    async fn list_sessions_per_agent() {
        let (_dir, store) = store();
        let a = store.create("helper").await.unwrap();
        let b = store.create("helper").await.unwrap();
        store.create("other").await.unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list_sessions("helper").await.unwrap(), expected);
        assert_eq!(store.list_sessions("nobody").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn replay_rebuilds_conversation() {
        let records = vec![
            SessionRecord::Header {
                session_id: "s".into(),
                agent_id: "a".into(),
                created_at: Utc::now(),
            },
            SessionRecord::Message {
                message: ChatMessage::system("be helpful"),
            },
            SessionRecord::Message {
                message: ChatMessage::user("hello"),
            },
            SessionRecord::ToolResult {
                tool_call_id: "c1".into(),
                name: "t".into(),
                success: true,
                output: "ok".into(),
                duration_ms: 1,
            },
        ];
        let messages = replay(&records);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
    }
}
