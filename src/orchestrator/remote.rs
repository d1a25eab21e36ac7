//! Federated dispatch: a stub entry for agents living on other nodes.
//!
//! Dispatch creates a private inbox, bridges its subscription into an
//! [`AsyncEventQueue`], and publishes the request to the target agent's
//! durable inbox with `replyTo` pointing at the private inbox. The queue
//! yields each decoded event until a terminal envelope arrives or the
//! configured deadline fires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::event_queue::AsyncEventQueue;
use super::registry::AgentEntry;
use crate::bus::MessageBus;
use crate::error::{Error, Result};
use crate::protocol::{MessageEnvelope, subject_for};

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteAgentEntry {
    agent_id: String,
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
}

impl RemoteAgentEntry {
    pub fn new(agent_id: impl Into<String>, bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
        Self {
            agent_id: agent_id.into(),
            bus,
            timeout,
        }
    }
}

#[async_trait]
impl AgentEntry for RemoteAgentEntry {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn status(&self) -> String {
        // Remote control blocks are not replicated; the stub only knows
        // the agent by address.
        "REMOTE".to_string()
    }

    async fn dispatch(&self, mut envelope: MessageEnvelope) -> Result<AsyncEventQueue<MessageEnvelope>> {
        let target = format!("agent://{}", self.agent_id);
        envelope.target = target.clone();
        let subject = subject_for(&target)?;

        let inbox = self.bus.new_inbox();
        envelope.reply_to = Some(inbox.clone());
        let mut sub = self.bus.subscribe(&inbox, None).await?;

        self.bus.ensure_stream(&subject).await?;
        self.bus.publish(&subject.name, &envelope).await?;

        let queue = AsyncEventQueue::new();
        let feeder = queue.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    delivery = sub.next() => {
                        match delivery {
                            Some(delivery) => {
                                let terminal = delivery.envelope.is_terminal();
                                feeder.push(delivery.envelope.clone());
                                delivery.ack().await;
                                if terminal {
                                    feeder.complete();
                                    break;
                                }
                            }
                            None => {
                                feeder.complete();
                                break;
                            }
                        }
                    }
                    _ = &mut deadline => {
                        feeder.error(Error::Timeout(timeout));
                        break;
                    }
                }
            }
        });

        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::protocol::kind;

    fn request(text: &str) -> MessageEnvelope {
        MessageEnvelope::new(
            kind::TASK_REQUEST,
            "agent://caller",
            "agent://worker",
            serde_json::json!({"text": text}),
        )
    }

    #[tokio::test]
    async fn remote_dispatch_streams_until_terminal() {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let mut inbox_sub = bus.subscribe("agent.worker.inbox", Some("agents")).await.unwrap();

        // A stand-in worker node: answer each request then finish.
        let worker_bus = Arc::clone(&bus);
        tokio::spawn(async move {
            while let Some(delivery) = inbox_sub.next().await {
                let reply_to = delivery.envelope.reply_to.clone().unwrap();
                let reply = delivery.envelope.reply(
                    kind::TASK_RESPONSE,
                    "agent://worker",
                    serde_json::json!({"text": "worker says hi"}),
                );
                let done = delivery
                    .envelope
                    .reply(kind::TASK_DONE, "agent://worker", serde_json::json!({}));
                worker_bus.publish_core(&reply_to, &reply).await.unwrap();
                worker_bus.publish_core(&reply_to, &done).await.unwrap();
                delivery.ack().await;
            }
        });

        let entry = RemoteAgentEntry::new("worker", Arc::clone(&bus), Duration::from_secs(5));
        let queue = entry.dispatch(request("hello")).await.unwrap();
        let events = queue.collect().await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, kind::TASK_RESPONSE);
        assert_eq!(events[1].kind, kind::TASK_DONE);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_remote_times_out() {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        // Subscribe the inbox so the publish is not dropped, but never reply.
        let _quiet = bus.subscribe("agent.worker.inbox", Some("agents")).await.unwrap();

        let entry = RemoteAgentEntry::new("worker", bus, Duration::from_secs(30));
        let queue = entry.dispatch(request("anyone there?")).await.unwrap();
        assert!(matches!(queue.collect().await, Err(Error::Timeout(_))));
    }
}
