//! Message bus abstraction for job intake and outcome signalling.
//!
//! [`MessageBus`] is the seam between the dispatcher and whatever transport
//! carries job messages. [`InProcessBus`] is the in-memory implementation
//! used by the server (fed by the HTTP intake bridge) and by tests. It keeps
//! a bounded ring buffer of recently published messages so callers can
//! inspect outcomes after the fact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Maximum number of messages retained in the ring buffer.
const MAX_RECENT_MESSAGES: usize = 256;

/// Per-subscriber channel depth.
const SUBSCRIBER_BUFFER: usize = 64;

/// A message delivered on a topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    /// Decode the payload as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| Error::Validation(format!("invalid payload on {}: {e}", self.topic)))
    }
}

/// Publish/subscribe transport. Delivery is at-least-once from the
/// consumer's point of view; handlers must be idempotent.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Bind a topic and return the stream of messages published to it.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusMessage>>;

    /// Publish a payload on a topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// InProcessBus
// ---------------------------------------------------------------------------

/// In-memory bus with per-topic fan-out and a ring buffer of recent messages.
pub struct InProcessBus {
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>,
    recent: RwLock<VecDeque<BusMessage>>,
    closed: AtomicBool,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_MESSAGES)),
            closed: AtomicBool::new(false),
        }
    }

    /// Close the bus. Existing subscriptions end and further calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Return the `n` most recent messages (newest first).
    pub fn recent_messages(&self, n: usize) -> Vec<BusMessage> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }

    /// Return every retained message published on `topic` (oldest first).
    pub fn messages_on(&self, topic: &str) -> Vec<BusMessage> {
        let recent = self.recent.read();
        recent
            .iter()
            .rev()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Bus("bus is closed".into()));
        }
        Ok(())
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusMessage>> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        tracing::debug!(topic, "Subscribed");
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;

        let message = BusMessage {
            topic: topic.to_string(),
            payload,
            published_at: Utc::now(),
        };

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_MESSAGES {
                recent.pop_back();
            }
            recent.push_front(message.clone());
        }

        // Clone senders out so no lock is held across the await.
        let senders: Vec<_> = self
            .subscribers
            .read()
            .get(topic)
            .cloned()
            .unwrap_or_default();

        for tx in &senders {
            // A dropped receiver just means that subscriber went away.
            let _ = tx.send(message.clone()).await;
        }

        if senders.iter().any(|tx| tx.is_closed()) {
            if let Some(list) = self.subscribers.write().get_mut(topic) {
                list.retain(|tx| !tx.is_closed());
            }
        }

        Ok(())
    }
}
