//! In-memory [`KvStore`] with lazy TTL expiry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::KvStore;
use crate::error::Result;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local key-value store. Expired entries are dropped lazily on
/// access and swept whenever the map grows past a size step.
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        if self.entries.len() > 0 && self.entries.len() % 4096 == 0 {
            self.sweep();
        }
        let now = Instant::now();
        let mut inserted = false;
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            inserted = true;
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            }
        });
        if !inserted && entry.expires_at <= now {
            // Expired: the slot is free again.
            entry.value = value.to_string();
            entry.expires_at = now + ttl;
            inserted = true;
        }
        Ok(inserted)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_first_write_wins() {
        let kv = MemoryKv::new();
        assert!(kv.set_if_absent("k", "a", Duration::from_secs(60)).await.unwrap());
        assert!(!kv.set_if_absent("k", "b", Duration::from_secs(60)).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn expired_key_is_free_again() {
        let kv = MemoryKv::new();
        assert!(kv.set_if_absent("k", "a", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.set_if_absent("k", "b", Duration::from_secs(60)).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let kv = MemoryKv::new();
        kv.set_if_absent("k", "a", Duration::from_secs(60)).await.unwrap();
        kv.delete("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
