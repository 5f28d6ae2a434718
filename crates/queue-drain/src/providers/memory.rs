//! In-memory queue transport for tests and local development.
//!
//! Behaves like a small SQS: queues are addressed by URL, received messages stay
//! invisible for the queue's visibility timeout and come back if they are not
//! deleted, and long polls wait up to the requested time for a message to show
//! up. FIFO queues hand out one message group at a time, in send order.
//!
//! Clones share the same queues, so a test can keep one handle for inspection
//! while the engine owns another.

use crate::error::{BatchEntryFailure, TransportError};
use crate::message::{
    attributes, BatchResult, DeleteEntry, QueueAttributes, ReceiptHandle, ReceivedMessage,
    SendEntry,
};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const URL_PREFIX: &str = "memory://queues/";

/// How often a long poll re-checks an empty queue
const POLL_INTERVAL: Duration = Duration::from_millis(25);

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Internal Storage Structures
// ============================================================================

struct StoredMessage {
    message_id: String,
    body: String,
    group_id: Option<String>,
    /// Receipt of the latest delivery, if the message is in flight
    receipt: Option<String>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

struct MemoryQueue {
    name: String,
    fifo: bool,
    visibility_timeout: Duration,
    messages: VecDeque<StoredMessage>,
}

impl MemoryQueue {
    fn new(name: &str, attrs: &QueueAttributes) -> Self {
        let visibility_timeout = attrs
            .get(attributes::VISIBILITY_TIMEOUT)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(DEFAULT_VISIBILITY_TIMEOUT, Duration::from_secs);

        Self {
            name: name.to_string(),
            fifo: attrs
                .get(attributes::FIFO_QUEUE)
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            visibility_timeout,
            messages: VecDeque::new(),
        }
    }

    fn visible_count(&self, now: Instant) -> usize {
        self.messages.iter().filter(|m| m.is_visible(now)).count()
    }

    /// Hand out up to `max` visible messages and hide them
    fn take_visible(&mut self, max: usize, now: Instant) -> Vec<ReceivedMessage> {
        // A FIFO group with a message in flight is blocked until it is deleted
        let blocked_groups: HashSet<String> = if self.fifo {
            self.messages
                .iter()
                .filter(|m| !m.is_visible(now))
                .filter_map(|m| m.group_id.clone())
                .collect()
        } else {
            HashSet::new()
        };

        let mut received = Vec::new();
        for message in self.messages.iter_mut() {
            if received.len() >= max {
                break;
            }
            if !message.is_visible(now) {
                continue;
            }
            if let Some(group) = &message.group_id {
                if blocked_groups.contains(group) {
                    continue;
                }
            }

            let receipt = Uuid::new_v4().to_string();
            message.receipt = Some(receipt.clone());
            message.invisible_until = Some(now + self.visibility_timeout);
            received.push(ReceivedMessage::new(
                message.message_id.clone(),
                message.body.clone(),
                ReceiptHandle::new(receipt),
            ));
        }

        received
    }

    fn remove_by_receipt(&mut self, receipt: &str) -> bool {
        let position = self
            .messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt));
        match position {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// In-Memory Transport
// ============================================================================

/// [`QueueTransport`] keeping every queue in process memory
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    queues: Arc<RwLock<HashMap<String, MemoryQueue>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL under which a queue of this name is addressed
    pub fn queue_url(queue_name: &str) -> String {
        format!("{}{}", URL_PREFIX, queue_name)
    }

    /// Total number of stored messages, in flight or not
    pub fn message_count(&self, queue_url: &str) -> Option<usize> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue_url)
            .map(|q| q.messages.len())
    }

    fn with_queue<T>(
        &self,
        queue_url: &str,
        f: impl FnOnce(&mut MemoryQueue) -> T,
    ) -> Result<T, TransportError> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        let queue = queues
            .get_mut(queue_url)
            .ok_or_else(|| not_found(queue_url))?;
        Ok(f(queue))
    }
}

fn not_found(queue_url: &str) -> TransportError {
    TransportError::QueueNotFound(format!("The specified queue does not exist: '{}'", queue_url))
}

fn entry_failure(id: &str, code: &str, message: &str) -> BatchEntryFailure {
    BatchEntryFailure {
        id: id.to_string(),
        code: code.to_string(),
        message: message.to_string(),
        sender_fault: true,
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn create_queue(
        &self,
        queue_name: &str,
        attributes: &QueueAttributes,
    ) -> Result<String, TransportError> {
        let queue_url = Self::queue_url(queue_name);
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(queue_url.clone())
            .or_insert_with(|| MemoryQueue::new(queue_name, attributes));
        Ok(queue_url)
    }

    async fn get_queue_url(&self, queue_name: &str) -> Result<String, TransportError> {
        let queue_url = Self::queue_url(queue_name);
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        if queues.contains_key(&queue_url) {
            Ok(queue_url)
        } else {
            Err(TransportError::QueueNotFound(format!(
                "The specified queue does not exist: '{}'",
                queue_name
            )))
        }
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[SendEntry],
    ) -> Result<BatchResult, TransportError> {
        self.with_queue(queue_url, |queue| {
            let mut result = BatchResult::default();
            for entry in entries {
                if entry.body.is_empty() {
                    result.failed.push(entry_failure(
                        &entry.id,
                        "InvalidParameterValue",
                        "The message body must not be empty",
                    ));
                    continue;
                }
                if queue.fifo && entry.message_group_id.is_none() {
                    result.failed.push(entry_failure(
                        &entry.id,
                        "MissingParameter",
                        "The request must contain the parameter MessageGroupId",
                    ));
                    continue;
                }

                queue.messages.push_back(StoredMessage {
                    message_id: Uuid::new_v4().to_string(),
                    body: entry.body.clone(),
                    group_id: entry.message_group_id.clone(),
                    receipt: None,
                    invisible_until: None,
                });
                result.successful.push(entry.id.clone());
            }
            result
        })
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let deadline = Instant::now() + Duration::from_secs(u64::from(wait_seconds));

        loop {
            let now = Instant::now();
            let received =
                self.with_queue(queue_url, |queue| queue.take_visible(max_messages as usize, now))?;

            if !received.is_empty() || now >= deadline {
                return Ok(received);
            }

            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete_message_batch(
        &self,
        queue_url: &str,
        entries: &[DeleteEntry],
    ) -> Result<BatchResult, TransportError> {
        self.with_queue(queue_url, |queue| {
            let mut result = BatchResult::default();
            for entry in entries {
                if queue.remove_by_receipt(entry.receipt_handle.as_str()) {
                    result.successful.push(entry.id.clone());
                } else {
                    result.failed.push(entry_failure(
                        &entry.id,
                        "ReceiptHandleIsInvalid",
                        "The receipt handle is not valid for this queue",
                    ));
                }
            }
            result
        })
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), TransportError> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        queues
            .remove(queue_url)
            .map(|_| ())
            .ok_or_else(|| not_found(queue_url))
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[&str],
    ) -> Result<QueueAttributes, TransportError> {
        let now = Instant::now();
        self.with_queue(queue_url, |queue| {
            let mut attrs = QueueAttributes::new();
            for name in attribute_names {
                let value = match *name {
                    attributes::APPROXIMATE_NUMBER_OF_MESSAGES => {
                        queue.visible_count(now).to_string()
                    }
                    attributes::QUEUE_ARN => {
                        format!("arn:aws:sqs:memory:000000000000:{}", queue.name)
                    }
                    attributes::VISIBILITY_TIMEOUT => {
                        queue.visibility_timeout.as_secs().to_string()
                    }
                    attributes::FIFO_QUEUE if queue.fifo => "true".to_string(),
                    _ => continue,
                };
                attrs.insert(name.to_string(), value);
            }
            attrs
        })
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryTransport")
            .field("queues", &queues.keys().collect::<Vec<_>>())
            .finish()
    }
}
