//! Channel adapter lifecycle and inbound routing.
//!
//! The manager keeps the adapter registry, aggregates every adapter's
//! inbound stream, resolves each message to an agent via the binding
//! table, and injects the resulting envelope into the gateway. Replies
//! correlated to the injected envelope are shipped back to the
//! originating adapter until the interaction terminates.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use super::binding::{BindingQuery, BindingRegistry};
use super::traits::{ChannelAdapter, InboundMessage};
use crate::error::{Error, Result};
use crate::gateway::{Gateway, InjectOutcome};
use crate::protocol::{MessageEnvelope, kind};

pub struct ChannelManager {
    adapters: RwLock<HashMap<String, Arc<dyn ChannelAdapter>>>,
    bindings: Arc<BindingRegistry>,
    gateway: Arc<Gateway>,
}

impl ChannelManager {
    pub fn new(bindings: Arc<BindingRegistry>, gateway: Arc<Gateway>) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            bindings,
            gateway,
        }
    }

    /// Register an adapter; the name must be unique.
    pub async fn register(&self, adapter: Arc<dyn ChannelAdapter>) -> Result<()> {
        let name = adapter.name().to_string();
        let mut adapters = self.adapters.write().await;
        if adapters.contains_key(&name) {
            return Err(Error::Channel(format!("channel '{name}' is already registered")));
        }
        adapters.insert(name, adapter);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.adapters.write().await.remove(name).is_some()
    }

    pub async fn adapter_names(&self) -> Vec<String> {
        self.adapters.read().await.keys().cloned().collect()
    }

    pub async fn health_all(&self) -> HashMap<String, bool> {
        let adapters = self.adapters.read().await;
        let mut health = HashMap::new();
        for (name, adapter) in adapters.iter() {
            health.insert(name.clone(), adapter.health_check().await);
        }
        health
    }

    /// Send a message out via the named adapter.
    pub async fn send(&self, channel: &str, message: &str, recipient: Option<&str>) -> Result<()> {
        let adapters = self.adapters.read().await;
        let adapter = adapters
            .get(channel)
            .ok_or_else(|| Error::Channel(format!("channel '{channel}' not found")))?;
        adapter.send(message, recipient).await
    }

    /// Resolve a binding and inject the message onto the bus. Replies are
    /// wired back to the adapter keyed by the envelope's correlation.
    #[tracing::instrument(name = "channel.route", skip_all, fields(channel = %message.channel, sender = %message.sender))]
    pub async fn route_inbound(&self, message: InboundMessage) -> Result<InjectOutcome> {
        let query = BindingQuery {
            peer: Some(message.sender.clone()),
            channel: Some(message.channel.clone()),
            team: message.team.clone(),
            account: message.account.clone(),
        };
        let resolved = self.bindings.resolve(&query).ok_or_else(|| {
            Error::Channel(format!(
                "no binding matches channel '{}' sender '{}'",
                message.channel, message.sender
            ))
        })?;

        let mut envelope = MessageEnvelope::new(
            kind::TASK_REQUEST,
            format!("channel://{}/{}", message.channel, message.sender),
            format!("agent://{}", resolved.binding.agent_id),
            serde_json::json!({ "text": message.content }),
        )
        .with_reply_to(self.gateway.reply_inbox());
        envelope.metadata.insert("bindingId".into(), resolved.index.to_string());
        envelope.metadata.insert("channelId".into(), message.channel.clone());
        envelope.metadata.insert("userId".into(), message.sender.clone());
        for (key, value) in &message.metadata {
            envelope.metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let correlation = envelope.correlation();
        if let Some(adapter) = self.adapters.read().await.get(&message.channel).cloned() {
            let gateway = Arc::clone(&self.gateway);
            let recipient = message.sender.clone();
            let corr_for_listener = correlation.clone();
            self.gateway.on_response_for_correlation(
                &correlation,
                Arc::new(move |reply: MessageEnvelope| {
                    let adapter = Arc::clone(&adapter);
                    let gateway = Arc::clone(&gateway);
                    let recipient = recipient.clone();
                    let correlation = corr_for_listener.clone();
                    tokio::spawn(async move {
                        if reply.kind == kind::TASK_RESPONSE
                            && let Some(text) = reply.data.get("text").and_then(|v| v.as_str())
                            && !text.is_empty()
                            && let Err(err) = adapter.send(text, Some(&recipient)).await
                        {
                            tracing::warn!(%correlation, "channel reply failed: {err}");
                        }
                        if reply.is_terminal() {
                            gateway.remove_response_listener(&correlation);
                        }
                    });
                }),
            );
        }

        self.gateway.inject_message(envelope).await
    }

    /// Start listening on every adapter and pump inbound messages through
    /// binding resolution. Returns the spawned listener/pump tasks.
    pub async fn start(self: &Arc<Self>, buffer: usize) -> Vec<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::channel::<InboundMessage>(buffer);
        let mut tasks = Vec::new();

        let adapters = self.adapters.read().await;
        for (name, adapter) in adapters.iter() {
            let adapter = Arc::clone(adapter);
            let tx = tx.clone();
            let name = name.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = adapter.listen(tx).await {
                    tracing::warn!(channel = %name, "listen ended: {err}");
                }
            }));
        }
        drop(adapters);

        let manager = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(err) = manager.route_inbound(message).await {
                    tracing::warn!("inbound routing failed: {err}");
                }
            }
        }));

        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InProcessBus, MemoryKv, MessageBus};
    use crate::channels::binding::Binding;
    use crate::gateway::{ResponseRouter, SessionTable};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct RecordingAdapter {
        id: String,
        sent: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    #[async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn name(&self) -> &str {
            &self.id
        }
        async fn send(&self, message: &str, recipient: Option<&str>) -> Result<()> {
            self.sent
                .lock()
                .push((message.to_string(), recipient.map(str::to_string)));
            Ok(())
        }
        async fn listen(&self, _tx: mpsc::Sender<InboundMessage>) -> Result<()> {
            Ok(())
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    struct Wired {
        manager: Arc<ChannelManager>,
        bus: Arc<dyn MessageBus>,
        sent: Arc<Mutex<Vec<(String, Option<String>)>>>,
        gateway: Arc<Gateway>,
    }

    async fn wired(bindings: Vec<Binding>) -> Wired {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let sessions = Arc::new(SessionTable::new());
        let router = Arc::new(ResponseRouter::new(sessions));
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&bus),
            Arc::new(MemoryKv::new()),
            router,
            64,
        ));
        let manager = Arc::new(ChannelManager::new(
            Arc::new(BindingRegistry::new(bindings)),
            Arc::clone(&gateway),
        ));
        let sent = Arc::new(Mutex::new(Vec::new()));
        manager
            .register(Arc::new(RecordingAdapter {
                id: "webhook".into(),
                sent: Arc::clone(&sent),
            }))
            .await
            .unwrap();
        Wired {
            manager,
            bus,
            sent,
            gateway,
        }
    }

    fn default_binding(agent: &str) -> Binding {
        Binding {
            channel: Some("default".into()),
            agent_id: agent.into(),
            ..Binding::default()
        }
    }

    #[tokio::test]
    async fn duplicate_adapter_rejected() {
        let w = wired(vec![default_binding("a")]).await;
        let err = w
            .manager
            .register(Arc::new(RecordingAdapter {
                id: "webhook".into(),
                sent: Arc::new(Mutex::new(Vec::new())),
            }))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn inbound_routes_to_bound_agent_inbox() {
        let w = wired(vec![default_binding("helper")]).await;
        let mut sub = w.bus.subscribe("agent.helper.inbox", Some("agents")).await.unwrap();

        let outcome = w
            .manager
            .route_inbound(InboundMessage::new("webhook", "alice", "do the thing"))
            .await
            .unwrap();
        assert_eq!(outcome, InjectOutcome::Dispatched);

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.envelope.data["text"], "do the thing");
        assert_eq!(delivery.envelope.metadata["userId"], "alice");
        assert!(delivery.envelope.reply_to.is_some());
        delivery.ack().await;
    }

    #[tokio::test]
    async fn unmatched_message_is_an_error() {
        let w = wired(vec![Binding {
            peer: Some("bob".into()),
            agent_id: "bob-agent".into(),
            ..Binding::default()
        }])
        .await;
        let err = w
            .manager
            .route_inbound(InboundMessage::new("webhook", "alice", "hi"))
            .await;
        assert!(matches!(err, Err(Error::Channel(_))));
    }

    #[tokio::test]
    async fn replies_fan_back_to_the_adapter() {
        let w = wired(vec![default_binding("helper")]).await;
        let _pump = w.gateway.start().await.unwrap();
        let mut sub = w.bus.subscribe("agent.helper.inbox", Some("agents")).await.unwrap();

        w.manager
            .route_inbound(InboundMessage::new("webhook", "alice", "hello"))
            .await
            .unwrap();
        let delivery = sub.next().await.unwrap();
        delivery.ack().await;

        // Simulate the agent's reply stream.
        let reply = delivery.envelope.reply(
            kind::TASK_RESPONSE,
            "agent://helper",
            serde_json::json!({"text": "hi alice"}),
        );
        let done = delivery
            .envelope
            .reply(kind::TASK_DONE, "agent://helper", serde_json::json!({}));
        let reply_to = delivery.envelope.reply_to.clone().unwrap();
        w.bus.publish_core(&reply_to, &reply).await.unwrap();
        w.bus.publish_core(&reply_to, &done).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let sent = w.sent.lock().clone();
        assert_eq!(sent, vec![("hi alice".to_string(), Some("alice".to_string()))]);
    }
}
