//! In-process work queue with visibility timeouts.
//!
//! Mirrors the storage-queue model: a received message is hidden for a
//! visibility timeout and must be deleted with its pop receipt, otherwise it
//! becomes visible again and its dequeue count keeps growing.

use crate::types::{AppError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// A message as seen by a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    /// Receipt from the latest receive. Empty for peeked messages.
    pub pop_receipt: String,
    pub content: String,
    pub dequeue_count: u32,
    pub insertion_time: DateTime<Utc>,
}

struct StoredMessage {
    id: String,
    pop_receipt: Option<String>,
    content: String,
    dequeue_count: u32,
    insertion_time: DateTime<Utc>,
    visible_at: Instant,
}

impl StoredMessage {
    fn to_message(&self) -> QueueMessage {
        QueueMessage {
            id: self.id.clone(),
            pop_receipt: self.pop_receipt.clone().unwrap_or_default(),
            content: self.content.clone(),
            dequeue_count: self.dequeue_count,
            insertion_time: self.insertion_time,
        }
    }
}

#[derive(Default)]
pub struct WorkQueue {
    name: String,
    messages: Mutex<VecDeque<StoredMessage>>,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message and return its id.
    pub fn send_message(&self, content: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.messages.lock().push_back(StoredMessage {
            id: id.clone(),
            pop_receipt: None,
            content: content.into(),
            dequeue_count: 0,
            insertion_time: Utc::now(),
            visible_at: Instant::now(),
        });
        debug!(queue = %self.name, message_id = %id, "Sent message");
        id
    }

    /// Look at up to `max` visible messages without hiding them.
    pub fn peek_messages(&self, max: usize) -> Vec<QueueMessage> {
        let now = Instant::now();
        self.messages
            .lock()
            .iter()
            .filter(|m| m.visible_at <= now)
            .take(max)
            .map(|m| {
                let mut msg = m.to_message();
                msg.pop_receipt.clear();
                msg
            })
            .collect()
    }

    /// Receive up to `max` visible messages, hiding them for `visibility_timeout`.
    pub fn receive_messages(&self, max: usize, visibility_timeout: Duration) -> Vec<QueueMessage> {
        let now = Instant::now();
        let mut messages = self.messages.lock();
        let mut received = Vec::new();

        for stored in messages.iter_mut() {
            if received.len() >= max {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            stored.dequeue_count += 1;
            stored.pop_receipt = Some(Uuid::new_v4().to_string());
            stored.visible_at = now + visibility_timeout;
            received.push(stored.to_message());
        }

        received
    }

    /// Delete a received message. The pop receipt must match the latest receive.
    pub fn delete_message(&self, id: &str, pop_receipt: &str) -> Result<()> {
        let mut messages = self.messages.lock();
        let pos = Self::position(&messages, id, pop_receipt)?;
        messages.remove(pos);
        debug!(queue = %self.name, message_id = %id, "Deleted message");
        Ok(())
    }

    /// Replace a received message's content and visibility.
    ///
    /// Returns the new pop receipt, which invalidates the old one.
    pub fn update_message(
        &self,
        id: &str,
        pop_receipt: &str,
        content: Option<String>,
        visibility_timeout: Duration,
    ) -> Result<String> {
        let mut messages = self.messages.lock();
        let pos = Self::position(&messages, id, pop_receipt)?;
        let receipt = Uuid::new_v4().to_string();

        if let Some(stored) = messages.get_mut(pos) {
            if let Some(content) = content {
                stored.content = content;
            }
            stored.visible_at = Instant::now() + visibility_timeout;
            stored.pop_receipt = Some(receipt.clone());
        }

        Ok(receipt)
    }

    /// Remove every message. Returns how many were dropped.
    pub fn clear_messages(&self) -> usize {
        let mut messages = self.messages.lock();
        let count = messages.len();
        messages.clear();
        count
    }

    /// Number of messages, visible or not.
    pub fn approximate_len(&self) -> usize {
        self.messages.lock().len()
    }

    fn position(messages: &VecDeque<StoredMessage>, id: &str, pop_receipt: &str) -> Result<usize> {
        let pos = messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Queue message {}", id)))?;

        match messages[pos].pop_receipt.as_deref() {
            Some(receipt) if receipt == pop_receipt => Ok(pos),
            _ => Err(AppError::InvalidInput(format!(
                "Pop receipt mismatch for message {}",
                id
            ))),
        }
    }
}
