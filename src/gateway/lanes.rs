//! Per-conversation ordering lanes.
//!
//! Messages sharing a lane key `(agentId, channelId, userId)` are processed
//! strictly in arrival order; different lanes run in parallel. While a
//! lane's front message is in flight, later arrivals buffer, bounded by a
//! backpressure watermark.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::protocol::MessageEnvelope;

pub const DEFAULT_WATERMARK: usize = 1024;

/// The per-conversation serialization boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaneKey {
    pub agent_id: String,
    pub channel_id: String,
    pub user_id: String,
}

impl LaneKey {
    pub fn new(
        agent_id: impl Into<String>,
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Display for LaneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.agent_id, self.channel_id, self.user_id)
    }
}

/// Outcome of [`LaneQueues::submit`].
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The lane was idle; the caller must drive it (starting with this
    /// message) until [`LaneQueues::complete`] returns `None`.
    Start(MessageEnvelope),
    /// The lane is busy; the message was buffered behind the front.
    Buffered,
}

#[derive(Default)]
struct Lane {
    queue: VecDeque<MessageEnvelope>,
    in_flight: bool,
}

/// Process-local lane registry.
pub struct LaneQueues {
    watermark: usize,
    lanes: Mutex<HashMap<LaneKey, Lane>>,
}

impl LaneQueues {
    pub fn new(watermark: usize) -> Self {
        Self {
            watermark,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue a message on its lane.
    pub fn submit(&self, key: &LaneKey, envelope: MessageEnvelope) -> Result<SubmitOutcome> {
        let mut lanes = self.lanes.lock();
        let lane = lanes.entry(key.clone()).or_default();
        if lane.in_flight {
            if lane.queue.len() >= self.watermark {
                return Err(Error::Backpressure {
                    lane: key.to_string(),
                    watermark: self.watermark,
                });
            }
            lane.queue.push_back(envelope);
            Ok(SubmitOutcome::Buffered)
        } else {
            lane.in_flight = true;
            Ok(SubmitOutcome::Start(envelope))
        }
    }

    /// Mark the lane's front message finished. Returns the next buffered
    /// message, or `None` when the lane drained (it then goes idle and is
    /// removed).
    pub fn complete(&self, key: &LaneKey) -> Option<MessageEnvelope> {
        let mut lanes = self.lanes.lock();
        let Some(lane) = lanes.get_mut(key) else {
            return None;
        };
        match lane.queue.pop_front() {
            Some(next) => Some(next),
            None => {
                lanes.remove(key);
                None
            }
        }
    }

    /// Number of buffered (not in-flight) messages on a lane.
    pub fn depth(&self, key: &LaneKey) -> usize {
        self.lanes.lock().get(key).map_or(0, |l| l.queue.len())
    }
}

impl Default for LaneQueues {
    fn default() -> Self {
        Self::new(DEFAULT_WATERMARK)
    }
}
