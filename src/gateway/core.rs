//! The gateway facade: validation, dedup, lane-ordered routing onto the
//! bus, and correlated reply delivery.
//!
//! Outbound calls to the bus and the key-value store are wrapped in
//! per-dependency circuit breakers; a tripped breaker fails injection fast.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::breaker::{BreakerConfig, CircuitBreaker};
use super::idempotency::IdempotencyStore;
use super::lanes::{LaneKey, LaneQueues, SubmitOutcome};
use super::response_router::ResponseRouter;
use crate::bus::{KvStore, MessageBus, Subscription};
use crate::error::Result;
use crate::protocol::{MessageEnvelope, parse_target, subject_for, Target};

/// Transient reply callback, keyed by correlation ID.
pub type ResponseListener = Arc<dyn Fn(MessageEnvelope) + Send + Sync>;

/// What happened to an injected envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Routed onto the bus (possibly after lane buffering).
    Dispatched,
    /// Seen within the idempotency window; silently accepted, not routed.
    Duplicate,
}

pub struct Gateway {
    bus: Arc<dyn MessageBus>,
    idempotency: IdempotencyStore,
    lanes: LaneQueues,
    bus_breaker: CircuitBreaker,
    kv_breaker: CircuitBreaker,
    listeners: DashMap<String, ResponseListener>,
    response_router: Arc<ResponseRouter>,
    reply_inbox: String,
}

impl Gateway {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        kv: Arc<dyn KvStore>,
        response_router: Arc<ResponseRouter>,
        lane_watermark: usize,
    ) -> Self {
        let reply_inbox = bus.new_inbox();
        Self {
            bus,
            idempotency: IdempotencyStore::new(kv),
            lanes: LaneQueues::new(lane_watermark),
            bus_breaker: CircuitBreaker::new("bus", BreakerConfig::default()),
            kv_breaker: CircuitBreaker::new("kv", BreakerConfig::default()),
            listeners: DashMap::new(),
            response_router,
            reply_inbox,
        }
    }

    /// The private inbox replies should be addressed to.
    pub fn reply_inbox(&self) -> &str {
        &self.reply_inbox
    }

    pub fn response_router(&self) -> &Arc<ResponseRouter> {
        &self.response_router
    }

    /// Subscribe the reply pump: every envelope arriving on the gateway's
    /// inbox is handed to the matching correlation listener and fanned out
    /// to the owning WebSocket session.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut sub = self.bus.subscribe(&self.reply_inbox, None).await?;
        let gateway = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(delivery) = sub.next().await {
                gateway.dispatch_reply(delivery.envelope.clone()).await;
                delivery.ack().await;
            }
        }))
    }

    async fn dispatch_reply(&self, envelope: MessageEnvelope) {
        let correlation = envelope.correlation();
        if let Some(listener) = self.listeners.get(&correlation) {
            (listener.value())(envelope.clone());
        }
        self.response_router.route(&envelope);
    }

    /// Validate, dedupe, and route an envelope to its bus subject,
    /// serializing per conversation lane.
    #[tracing::instrument(name = "gateway.inject", skip_all, fields(envelope = %envelope.id, target = %envelope.target))]
    pub async fn inject_message(&self, envelope: MessageEnvelope) -> Result<InjectOutcome> {
        let subject = subject_for(&envelope.target)?;

        let dedup_key = envelope.dedup_key().to_string();
        let first = self
            .kv_breaker
            .call(self.idempotency.first_seen(&dedup_key))
            .await?;
        if !first {
            tracing::debug!(key = %dedup_key, "idempotency hit; accepting silently");
            return Ok(InjectOutcome::Duplicate);
        }

        self.bus.ensure_stream(&subject).await?;

        let lane = lane_key_for(&envelope);
        match self.lanes.submit(&lane, envelope)? {
            SubmitOutcome::Buffered => Ok(InjectOutcome::Dispatched),
            SubmitOutcome::Start(front) => {
                // Drive the lane until it drains. A publish failure aborts
                // the drain and frees the idempotency slot so the client
                // can retry.
                let mut current = Some(front);
                while let Some(env) = current {
                    if let Err(err) = self
                        .bus_breaker
                        .call(self.bus.publish(&subject.name, &env))
                        .await
                    {
                        let mut dropped = 0usize;
                        while self.lanes.complete(&lane).is_some() {
                            dropped += 1;
                        }
                        if dropped > 0 {
                            tracing::warn!(lane = %lane, dropped, "lane drained after publish failure");
                        }
                        let _ = self.idempotency.forget(&dedup_key).await;
                        return Err(err);
                    }
                    current = self.lanes.complete(&lane);
                }
                Ok(InjectOutcome::Dispatched)
            }
        }
    }

    /// Unconditional send to the subject's workqueue.
    pub async fn publish(&self, subject: &str, envelope: &MessageEnvelope) -> Result<()> {
        self.bus_breaker
            .call(self.bus.publish(subject, envelope))
            .await
    }

    /// Direct non-durable publish (reply-to correlated inboxes).
    pub async fn publish_core(&self, subject: &str, envelope: &MessageEnvelope) -> Result<()> {
        self.bus_breaker
            .call(self.bus.publish_core(subject, envelope))
            .await
    }

    /// Queue-group subscription passthrough.
    pub async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription> {
        self.bus.subscribe(subject, queue_group).await
    }

    /// Register a transient reply listener keyed by correlation ID.
    pub fn on_response_for_correlation(&self, correlation_id: &str, listener: ResponseListener) {
        self.listeners
            .insert(correlation_id.to_string(), listener);
    }

    pub fn remove_response_listener(&self, correlation_id: &str) {
        self.listeners.remove(correlation_id);
    }
}

/// Derive the ordering lane for an envelope.
///
/// Agent from the target path; channel and user from explicit metadata,
/// falling back to the `channel://<type>/<sender>` source shape, then to
/// the raw source URI.
pub fn lane_key_for(envelope: &MessageEnvelope) -> LaneKey {
    let agent_id = match parse_target(&envelope.target) {
        Ok(Target::Agent(id)) => id,
        Ok(Target::Topic(name)) => name,
        Err(_) => envelope.target.clone(),
    };

    let (source_channel, source_user) = envelope
        .source
        .split_once("://")
        .and_then(|(scheme, rest)| {
            (scheme == "channel").then(|| match rest.split_once('/') {
                Some((channel, sender)) => (channel.to_string(), sender.to_string()),
                None => (rest.to_string(), envelope.source.clone()),
            })
        })
        .unwrap_or_else(|| ("direct".to_string(), envelope.source.clone()));

    let channel_id = envelope
        .metadata
        .get("channelId")
        .cloned()
        .unwrap_or(source_channel);
    let user_id = envelope
        .metadata
        .get("userId")
        .cloned()
        .unwrap_or(source_user);

    LaneKey::new(agent_id, channel_id, user_id)
}
