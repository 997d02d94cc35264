//! Change feed
//!
//! Every acknowledged set/delete and every completed compaction is offered
//! to each registered subscriber. Delivery never blocks the writer: a full
//! queue drops the event for that subscriber, a disconnected one is pruned.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::entry::{now_millis, Entry};

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Set,
    Delete,
    Compaction,
}

/// Payload delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub key: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    /// Sequence of the mutation; `None` for compaction events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Unix millis
    pub timestamp: u64,
}

impl ChangeEvent {
    /// Event for an acknowledged mutation
    pub fn from_entry(entry: &Entry) -> Self {
        let (kind, value) = if entry.tombstone {
            (EventKind::Delete, None)
        } else {
            (EventKind::Set, Some(entry.value.clone()))
        };

        Self {
            kind,
            key: entry.key.clone(),
            value,
            sequence: Some(entry.sequence),
            timestamp: entry.timestamp,
        }
    }

    /// Event for a finished compaction
    pub fn compaction(summary: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Compaction,
            key: b"compaction".to_vec(),
            value: Some(summary.into().into_bytes()),
            sequence: None,
            timestamp: now_millis(),
        }
    }
}

/// Registered delivery channels
pub struct SubscriberRegistry {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
    capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SubscriberRegistry {
    /// `capacity` applies to channels created by `subscribe_bounded`
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            capacity,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register an existing channel; registering the same channel twice is
    /// a no-op
    pub fn subscribe(&self, sender: Sender<ChangeEvent>) {
        let mut subscribers = self.subscribers.write();
        if !subscribers.iter().any(|s| s.same_channel(&sender)) {
            subscribers.push(sender);
        }
    }

    /// Create a bounded channel, register it, and return its receiving end
    pub fn subscribe_bounded(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = channel::bounded(self.capacity);
        self.subscribe(tx);
        rx
    }

    /// Remove a channel; returns whether it was registered
    pub fn unsubscribe(&self, sender: &Sender<ChangeEvent>) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| !s.same_channel(sender));
        subscribers.len() != before
    }

    /// Offer an event to every subscriber without blocking
    pub fn publish(&self, event: &ChangeEvent) {
        let mut disconnected = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                match subscriber.try_send(event.clone()) {
                    Ok(()) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            kind = ?event.kind,
                            sequence = ?event.sequence,
                            "subscriber channel is full, dropping event"
                        );
                    }
                    Err(TrySendError::Disconnected(_)) => disconnected.push(subscriber.clone()),
                }
            }
        }

        if !disconnected.is_empty() {
            self.prune(&disconnected);
        }
    }

    /// Drop subscribers whose receivers are gone
    fn prune(&self, gone: &[Sender<ChangeEvent>]) {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| !gone.iter().any(|g| g.same_channel(s)));
        let removed = before - subscribers.len();
        if removed > 0 {
            tracing::debug!(removed, "pruned disconnected subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Events successfully queued across all subscribers
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events dropped because a subscriber queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
