//! Push→pull bridge between bus subscriptions and agent-event iteration.
//!
//! Producers push without awaiting; a consumer awaiting an empty queue is
//! fulfilled directly by the next push, otherwise pushes buffer.
//! `complete` and `error` are terminal and idempotent, and buffered items
//! always drain before an error is observed. Cancelling the consumer
//! drops the buffer and discards future pushes.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

enum Terminal {
    Complete,
    Error(Error),
}

struct Inner<T> {
    buffer: VecDeque<T>,
    waiter: Option<oneshot::Sender<Option<Result<T>>>>,
    terminal: Option<Terminal>,
    error_delivered: bool,
    cancelled: bool,
}

pub struct AsyncEventQueue<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for AsyncEventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> AsyncEventQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                buffer: VecDeque::new(),
                waiter: None,
                terminal: None,
                error_delivered: false,
                cancelled: false,
            })),
        }
    }

    /// Enqueue an item (no await). Returns `false` when the queue is
    /// terminal or cancelled and the item was discarded.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.cancelled || inner.terminal.is_some() {
            return false;
        }
        if let Some(waiter) = inner.waiter.take() {
            // A consumer is parked: hand the item over directly.
            if waiter.send(Some(Ok(item))).is_ok() {
                return true;
            }
            return false;
        }
        inner.buffer.push_back(item);
        true
    }

    /// Terminal success. Idempotent; later pushes are discarded.
    pub fn complete(&self) {
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() || inner.cancelled {
            return;
        }
        inner.terminal = Some(Terminal::Complete);
        if inner.buffer.is_empty()
            && let Some(waiter) = inner.waiter.take()
        {
            let _ = waiter.send(None);
        }
    }

    /// Terminal failure. Idempotent; observed only after the buffer drains.
    pub fn error(&self, err: Error) {
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() || inner.cancelled {
            return;
        }
        if inner.buffer.is_empty()
            && let Some(waiter) = inner.waiter.take()
        {
            inner.terminal = Some(Terminal::Complete);
            inner.error_delivered = true;
            let _ = waiter.send(Some(Err(err)));
            return;
        }
        inner.terminal = Some(Terminal::Error(err));
    }

    /// Drop buffered items and discard everything still to come.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancelled = true;
        inner.buffer.clear();
        if let Some(waiter) = inner.waiter.take() {
            let _ = waiter.send(None);
        }
    }

    /// Await the next item. `None` once the queue completed (or was
    /// cancelled); a terminal error is yielded exactly once, after all
    /// buffered items.
    pub async fn next(&self) -> Option<Result<T>> {
        let receiver = {
            let mut inner = self.inner.lock();
            if inner.cancelled {
                return None;
            }
            if let Some(item) = inner.buffer.pop_front() {
                return Some(Ok(item));
            }
            match inner.terminal.take() {
                Some(Terminal::Error(err)) if !inner.error_delivered => {
                    inner.terminal = Some(Terminal::Complete);
                    inner.error_delivered = true;
                    return Some(Err(err));
                }
                Some(terminal) => {
                    inner.terminal = Some(terminal);
                    return None;
                }
                None => {}
            }
            let (tx, rx) = oneshot::channel();
            inner.waiter = Some(tx);
            rx
        };
        receiver.await.ok().flatten()
    }

    /// Drain everything until the terminal, collecting items.
    pub async fn collect(&self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(next) = self.next().await {
            items.push(next?);
        }
        Ok(items)
    }
}

impl<T: Send + 'static> Default for AsyncEventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
