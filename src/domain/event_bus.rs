//! Broadcast channel for state diffs.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. The proxy
//! poller publishes a [`StateDiff`] every time REAPER's state changes, and
//! every WebSocket session subscribes to forward them to its client.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Changed lines of one poll, as pushed to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDiff {
    /// `\n`-joined changed lines, forwarded verbatim as a text frame.
    pub payload: String,
    /// When the poller published the diff.
    pub published_at: DateTime<Utc>,
}

impl StateDiff {
    /// Wraps a payload stamped with the current time.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            published_at: Utc::now(),
        }
    }
}

/// Broadcast bus for [`StateDiff`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity.
/// When the ring buffer is full, the oldest diffs are dropped for lagging
/// receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StateDiff>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a diff to all subscribers.
    ///
    /// Returns the number of receivers that received the diff.
    /// If there are no active receivers, the diff is silently dropped.
    pub fn publish(&self, diff: StateDiff) -> usize {
        self.sender.send(diff).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future diffs.
    ///
    /// Each WebSocket session should call this once on connect.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateDiff> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
