//! Envelope dedup over the key-value store.
//!
//! Keyed by the envelope's `idempotencyKey` (falling back to `id`) with a
//! 24-hour window. A hit means the client retried; the original reply, if
//! still pending, arrives over the original correlation channel.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::KvStore;
use crate::error::Result;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

pub struct IdempotencyStore {
    kv: Arc<dyn KvStore>,
    window: Duration,
}

impl IdempotencyStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_window(kv, DEFAULT_WINDOW)
    }

    pub fn with_window(kv: Arc<dyn KvStore>, window: Duration) -> Self {
        Self { kv, window }
    }

    /// Returns `true` the first time `key` is seen within the window.
    pub async fn first_seen(&self, key: &str) -> Result<bool> {
        self.kv
            .set_if_absent(&format!("idem:{key}"), "1", self.window)
            .await
    }

    /// Free a key after a failed dispatch so the client's retry is accepted.
    pub async fn forget(&self, key: &str) -> Result<()> {
        self.kv.delete(&format!("idem:{key}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryKv;

    #[tokio::test]
    async fn second_sighting_is_a_hit() {
        let store = IdempotencyStore::new(Arc::new(MemoryKv::new()));
        assert!(store.first_seen("env-1").await.unwrap());
        assert!(!store.first_seen("env-1").await.unwrap());
        assert!(store.first_seen("env-2").await.unwrap());
    }

    #[tokio::test]
    async fn forget_frees_the_key() {
        let store = IdempotencyStore::new(Arc::new(MemoryKv::new()));
        assert!(store.first_seen("env-1").await.unwrap());
        store.forget("env-1").await.unwrap();
        assert!(store.first_seen("env-1").await.unwrap());
    }

    #[tokio::test]
    async fn window_expiry_frees_the_key() {
        let store =
            IdempotencyStore::with_window(Arc::new(MemoryKv::new()), Duration::from_millis(10));
        assert!(store.first_seen("env-1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(store.first_seen("env-1").await.unwrap());
    }
}
