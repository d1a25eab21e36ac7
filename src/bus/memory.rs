//! In-process [`MessageBus`] backed by tokio channels.
//!
//! Subjects are exact-match strings. Plain subscriptions get broadcast
//! delivery; subscriptions sharing a queue group get round-robin
//! load balancing. Subjects declared as workqueues hand out ack handles
//! and redeliver unacked messages after the ack window, up to the
//! configured delivery cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::traits::{AckHandle, Delivery, KvStore, MessageBus, Subscription, SubscriptionCanceller};
use crate::error::Result;
use crate::protocol::{MessageEnvelope, Subject, SubjectClass};

// ─── Internal state ───────────────────────────────────────────────────────────

struct Sub {
    id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Group {
    members: Vec<Sub>,
    next: usize,
}

#[derive(Default)]
struct SubjectState {
    plain: Vec<Sub>,
    groups: HashMap<String, Group>,
}

struct BusInner {
    subjects: Mutex<HashMap<String, SubjectState>>,
    streams: Mutex<HashMap<String, SubjectClass>>,
    next_sub_id: AtomicU64,
}

impl BusInner {
    /// Pick delivery targets for one message: every plain subscriber plus
    /// one member per queue group (round-robin).
    fn targets(&self, subject: &str) -> Vec<mpsc::UnboundedSender<Delivery>> {
        let mut map = self.subjects.lock();
        let Some(state) = map.get_mut(subject) else {
            return Vec::new();
        };
        state.plain.retain(|s| !s.tx.is_closed());
        let mut out: Vec<_> = state.plain.iter().map(|s| s.tx.clone()).collect();
        for group in state.groups.values_mut() {
            group.members.retain(|s| !s.tx.is_closed());
            if group.members.is_empty() {
                continue;
            }
            group.next %= group.members.len();
            out.push(group.members[group.next].tx.clone());
            group.next += 1;
        }
        out
    }

    fn stream_class(&self, subject: &str) -> SubjectClass {
        self.streams
            .lock()
            .get(subject)
            .cloned()
            .unwrap_or(SubjectClass::Interest)
    }

    fn remove_sub(&self, subject: &str, id: u64) {
        let mut map = self.subjects.lock();
        if let Some(state) = map.get_mut(subject) {
            state.plain.retain(|s| s.id != id);
            for group in state.groups.values_mut() {
                group.members.retain(|s| s.id != id);
            }
        }
    }
}

// ─── Ack & redelivery ─────────────────────────────────────────────────────────

struct OneshotAck {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

#[async_trait]
impl AckHandle for OneshotAck {
    async fn ack(&self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

fn deliver_workqueue(
    inner: Arc<BusInner>,
    subject: String,
    envelope: MessageEnvelope,
    attempt: u32,
    max_deliver: u32,
    ack_wait: Duration,
) {
    let targets = inner.targets(&subject);
    if targets.is_empty() {
        tracing::warn!(subject = %subject, "workqueue publish with no consumers; dropping");
        return;
    }
    for tx in targets {
        let (ack_tx, ack_rx) = oneshot::channel();
        let delivery = Delivery {
            subject: subject.clone(),
            envelope: envelope.clone(),
            attempt,
            acker: Some(Arc::new(OneshotAck {
                tx: Mutex::new(Some(ack_tx)),
            })),
        };
        if tx.send(delivery).is_err() {
            continue;
        }
        // Watch for the ack; redeliver on timeout while attempts remain.
        let inner = Arc::clone(&inner);
        let subject = subject.clone();
        let envelope = envelope.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ack_wait, ack_rx).await {
                Ok(_) => {}
                Err(_) if attempt < max_deliver => {
                    tracing::debug!(subject = %subject, attempt, "ack window elapsed; redelivering");
                    deliver_workqueue(inner, subject, envelope, attempt + 1, max_deliver, ack_wait);
                }
                Err(_) => {
                    tracing::warn!(subject = %subject, envelope = %envelope.id, "delivery cap reached; dropping");
                }
            }
        });
    }
}

// ─── InProcessBus ─────────────────────────────────────────────────────────────

/// Process-local bus; see the module docs for semantics.
pub struct InProcessBus {
    inner: Arc<BusInner>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subjects: Mutex::new(HashMap::new()),
                streams: Mutex::new(HashMap::new()),
                next_sub_id: AtomicU64::new(1),
            }),
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

struct Canceller {
    inner: std::sync::Weak<BusInner>,
    subject: String,
    id: u64,
}

impl SubscriptionCanceller for Canceller {
    fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_sub(&self.subject, self.id);
        }
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn ensure_stream(&self, subject: &Subject) -> Result<()> {
        self.inner
            .streams
            .lock()
            .entry(subject.name.clone())
            .or_insert_with(|| subject.class.clone());
        Ok(())
    }

    async fn publish(&self, subject: &str, envelope: &MessageEnvelope) -> Result<()> {
        match self.inner.stream_class(subject) {
            SubjectClass::Workqueue {
                max_deliver,
                ack_wait_secs,
            } => {
                deliver_workqueue(
                    Arc::clone(&self.inner),
                    subject.to_string(),
                    envelope.clone(),
                    1,
                    max_deliver,
                    Duration::from_secs(ack_wait_secs),
                );
            }
            SubjectClass::Interest => {
                self.publish_core(subject, envelope).await?;
            }
        }
        Ok(())
    }

    async fn publish_core(&self, subject: &str, envelope: &MessageEnvelope) -> Result<()> {
        for tx in self.inner.targets(subject) {
            let _ = tx.send(Delivery {
                subject: subject.to_string(),
                envelope: envelope.clone(),
                attempt: 1,
                acker: None,
            });
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription> {
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut map = self.inner.subjects.lock();
            let state = map.entry(subject.to_string()).or_default();
            let sub = Sub { id, tx };
            match queue_group {
                Some(group) => state.groups.entry(group.to_string()).or_default().members.push(sub),
                None => state.plain.push(sub),
            }
        }
        Ok(Subscription::new(
            rx,
            Box::new(Canceller {
                inner: Arc::downgrade(&self.inner),
                subject: subject.to_string(),
                id,
            }),
        ))
    }

    fn new_inbox(&self) -> String {
        format!("_INBOX.{}", Uuid::new_v4().simple())
    }
}

/// Convenience pair used by the bootstrapper and tests.
pub fn in_process() -> (Arc<dyn MessageBus>, Arc<dyn KvStore>) {
    (
        Arc::new(InProcessBus::new()),
        Arc::new(super::kv::MemoryKv::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kind;

    fn envelope() -> MessageEnvelope {
        MessageEnvelope::new(kind::TASK_REQUEST, "gateway://test", "agent://a", serde_json::json!({}))
    }

    #[tokio::test]
    async fn broadcast_to_plain_subscribers() {
        let bus = InProcessBus::new();
        let mut sub1 = bus.subscribe("events.agent.x", None).await.unwrap();
        let mut sub2 = bus.subscribe("events.agent.x", None).await.unwrap();

        bus.publish_core("events.agent.x", &envelope()).await.unwrap();

        assert!(sub1.next().await.is_some());
        assert!(sub2.next().await.is_some());
    }

    #[tokio::test]
    async fn queue_group_load_balances() {
        let bus = InProcessBus::new();
        let mut a = bus.subscribe("agent.w.inbox", Some("workers")).await.unwrap();
        let mut b = bus.subscribe("agent.w.inbox", Some("workers")).await.unwrap();

        for _ in 0..4 {
            bus.publish_core("agent.w.inbox", &envelope()).await.unwrap();
        }

        let mut a_count = 0;
        while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(50), a.next()).await {
            a_count += 1;
        }
        let mut b_count = 0;
        while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(50), b.next()).await {
            b_count += 1;
        }
        assert_eq!(a_count + b_count, 4);
        assert_eq!(a_count, 2, "round-robin should split evenly");
    }

    #[tokio::test(start_paused = true)]
    async fn workqueue_redelivers_unacked() {
        let bus = InProcessBus::new();
        bus.ensure_stream(&Subject {
            name: "agent.r.inbox".into(),
            class: SubjectClass::Workqueue {
                max_deliver: 3,
                ack_wait_secs: 1,
            },
        })
        .await
        .unwrap();
        let mut sub = bus.subscribe("agent.r.inbox", Some("agents")).await.unwrap();

        bus.publish("agent.r.inbox", &envelope()).await.unwrap();

        // First delivery left unacked → two redeliveries follow.
        let first = sub.next().await.unwrap();
        assert_eq!(first.attempt, 1);
        let second = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.attempt, 2);
        let third = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(third.attempt, 3);
        // Cap reached: no fourth delivery.
        assert!(
            tokio::time::timeout(Duration::from_secs(5), sub.next()).await.is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn acked_delivery_is_not_redelivered() {
        let bus = InProcessBus::new();
        bus.ensure_stream(&Subject {
            name: "agent.s.inbox".into(),
            class: SubjectClass::Workqueue {
                max_deliver: 5,
                ack_wait_secs: 1,
            },
        })
        .await
        .unwrap();
        let mut sub = bus.subscribe("agent.s.inbox", Some("agents")).await.unwrap();

        bus.publish("agent.s.inbox", &envelope()).await.unwrap();
        let delivery = sub.next().await.unwrap();
        delivery.ack().await;

        assert!(
            tokio::time::timeout(Duration::from_secs(5), sub.next()).await.is_err(),
            "acked message must not be redelivered"
        );
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_delivery() {
        let bus = InProcessBus::new();
        let sub = bus.subscribe("events.agent.y", None).await.unwrap();
        sub.cancel();
        drop(sub);

        // Publishing after cancel reaches nobody and must not error.
        bus.publish_core("events.agent.y", &envelope()).await.unwrap();
    }

    #[tokio::test]
    async fn inbox_subjects_are_unique() {
        let bus = InProcessBus::new();
        let a = bus.new_inbox();
        let b = bus.new_inbox();
        assert!(a.starts_with("_INBOX."));
        assert_ne!(a, b);
    }
}
