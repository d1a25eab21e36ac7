//! Live WebSocket session table.

use dashmap::DashMap;
use tokio::sync::mpsc;

/// A frame queued for a client socket.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    /// Close with a WebSocket close code (1001 on server shutdown).
    Close(u16),
}

/// Maps session ID → the sender feeding that socket's write half.
pub struct SessionTable {
    sessions: DashMap<String, mpsc::UnboundedSender<OutboundFrame>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session_id: &str, tx: mpsc::UnboundedSender<OutboundFrame>) {
        self.sessions.insert(session_id.to_string(), tx);
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queue a text frame for a session. Returns `false` when the session
    /// is gone (client reconnect case — callers drop the frame silently).
    pub fn send(&self, session_id: &str, frame: String) -> bool {
        match self.sessions.get(session_id) {
            Some(tx) => tx.send(OutboundFrame::Text(frame)).is_ok(),
            None => false,
        }
    }

    /// Ask every open socket to close with `code` and clear the table.
    pub fn close_all(&self, code: u16) {
        for entry in self.sessions.iter() {
            let _ = entry.value().send(OutboundFrame::Close(code));
        }
        self.sessions.clear();
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_to_live_session() {
        let table = SessionTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.insert("s1", tx);

        assert!(table.send("s1", "{}".into()));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text("{}".into()));
    }

    #[test]
    fn send_to_missing_session_is_false() {
        let table = SessionTable::new();
        assert!(!table.send("ghost", "{}".into()));
    }

    #[test]
    fn close_all_sends_close_and_clears() {
        let table = SessionTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.insert("s1", tx);

        table.close_all(1001);
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Close(1001));
        assert!(table.is_empty());
    }
}
