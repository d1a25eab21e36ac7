//! Transport abstractions for the gateway: a message bus and a TTL'd
//! key-value store.
//!
//! The gateway only ever talks to these traits; the in-process
//! implementations live in [`super::memory`] and [`super::kv`]. A clustered
//! backend slots in behind the same seams.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{MessageEnvelope, Subject};

// ─── Deliveries ───────────────────────────────────────────────────────────────

/// Acknowledgement handle for workqueue deliveries. Dropping it unacked
/// lets the bus redeliver after the ack window.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self);
}

/// One message handed to a subscriber.
pub struct Delivery {
    pub subject: String,
    pub envelope: MessageEnvelope,
    /// Redelivery attempt, starting at 1.
    pub attempt: u32,
    /// Present only on workqueue subjects.
    pub acker: Option<Arc<dyn AckHandle>>,
}

impl Delivery {
    /// Acknowledge the delivery. No-op on interest streams.
    pub async fn ack(&self) {
        if let Some(acker) = &self.acker {
            acker.ack().await;
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("attempt", &self.attempt)
            .field("envelope", &self.envelope.id)
            .finish()
    }
}

// ─── Subscription ─────────────────────────────────────────────────────────────

/// Cancels the server-side subscription when invoked (or on drop).
pub trait SubscriptionCanceller: Send + Sync {
    fn cancel(&self);
}

/// A live subscription: a receiver of deliveries plus its canceller.
pub struct Subscription {
    pub receiver: mpsc::UnboundedReceiver<Delivery>,
    canceller: Box<dyn SubscriptionCanceller>,
}

impl Subscription {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<Delivery>,
        canceller: Box<dyn SubscriptionCanceller>,
    ) -> Self {
        Self { receiver, canceller }
    }

    /// Await the next delivery. `None` after cancellation.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.canceller.cancel();
    }
}

// ─── MessageBus ───────────────────────────────────────────────────────────────

/// Publish/subscribe transport with queue-group load balancing and
/// private inbox subjects for reply correlation.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Declare delivery semantics for a subject before publishing to it.
    /// Idempotent; the first declaration wins.
    async fn ensure_stream(&self, subject: &Subject) -> Result<()>;

    /// Publish to a subject's stream (durable workqueue path).
    async fn publish(&self, subject: &str, envelope: &MessageEnvelope) -> Result<()>;

    /// Direct non-durable publish, used for reply-to correlated inboxes.
    async fn publish_core(&self, subject: &str, envelope: &MessageEnvelope) -> Result<()>;

    /// Subscribe to a subject. Subscribers sharing a `queue_group` form a
    /// load-balancing group: each message reaches exactly one member.
    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription>;

    /// Mint a unique private inbox subject (`_INBOX.<random>`).
    fn new_inbox(&self) -> String;
}

// ─── KvStore ──────────────────────────────────────────────────────────────────

/// Minimal key-value store with per-key TTL, enough for idempotency dedup.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key` only if the key is absent (or expired).
    /// Returns `true` when the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;
}
