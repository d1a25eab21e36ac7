//! The channel adapter seam.
//!
//! A channel is any external transport (chat service, webhook, CLI
//! bridge) that produces inbound task text and accepts outbound replies.
//! Concrete adapters live outside the core; the manager only sees this
//! trait.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// A message received from a channel peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Which channel this came from (adapter name).
    pub channel: String,
    /// Peer identifier (user ID, chat ID, webhook source…).
    pub sender: String,
    pub content: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender: sender.into(),
            content: content.into(),
            team: None,
            account: None,
            metadata: HashMap::new(),
        }
    }
}

/// Transport abstraction for sending and receiving channel messages.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique adapter name (e.g. `"telegram"`, `"webhook"`).
    fn name(&self) -> &str;

    /// Deliver a reply to the given recipient.
    async fn send(&self, message: &str, recipient: Option<&str>) -> Result<()>;

    /// Run until disconnect, forwarding inbound messages on `tx`.
    async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Lightweight liveness probe.
    async fn health_check(&self) -> bool;
}
