//! Circuit breaker protecting outbound dependency calls.
//!
//! Closed → Open when `failure_threshold` failures land inside
//! `failure_window`; Open → HalfOpen once `cooldown` elapses; the single
//! HalfOpen probe closes the breaker on success and reopens it on failure.
//! Calls while Open (or while a probe is already in flight) fail fast.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: usize,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(30),
            cooldown: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// One breaker per dependency; safe for concurrent use.
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Admission check. Transitions Open → HalfOpen when the cooldown has
    /// elapsed and reserves the probe slot.
    pub fn allow(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        dependency: self.dependency.clone(),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(Error::CircuitOpen {
                        dependency: self.dependency.clone(),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failures.clear();
        inner.probe_in_flight = false;
        if inner.state != BreakerState::Closed {
            tracing::info!(dependency = %self.dependency, "circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                tracing::warn!(dependency = %self.dependency, "probe failed; circuit reopened");
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                inner.failures.push_back(now);
                while let Some(front) = inner.failures.front() {
                    if now.duration_since(*front) >= self.config.failure_window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.failures.clear();
                    tracing::warn!(dependency = %self.dependency, "failure threshold reached; circuit opened");
                }
            }
        }
    }

    /// Run `op` under the breaker, recording the outcome.
    pub async fn call<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.allow()?;
        match op.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}
