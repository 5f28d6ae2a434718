//! Message types exchanged with the queue transport.

use crate::error::BatchEntryFailure;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute names understood by the queue service
pub mod attributes {
    pub const VISIBILITY_TIMEOUT: &str = "VisibilityTimeout";
    pub const RECEIVE_MESSAGE_WAIT_TIME_SECONDS: &str = "ReceiveMessageWaitTimeSeconds";
    pub const FIFO_QUEUE: &str = "FifoQueue";
    pub const CONTENT_BASED_DEDUPLICATION: &str = "ContentBasedDeduplication";
    pub const APPROXIMATE_NUMBER_OF_MESSAGES: &str = "ApproximateNumberOfMessages";
    pub const QUEUE_ARN: &str = "QueueArn";
}

/// Queue attributes keyed by service attribute name
pub type QueueAttributes = HashMap<String, String>;

/// One entry of a batch send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEntry {
    /// Chunk-local id used to correlate failures with payloads
    pub id: String,
    pub body: String,
    /// Ordering group, required by FIFO queues
    pub message_group_id: Option<String>,
}

impl SendEntry {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            message_group_id: None,
        }
    }

    pub fn with_message_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.message_group_id = Some(group_id.into());
        self
    }
}

/// One entry of a batch delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    pub id: String,
    pub receipt_handle: ReceiptHandle,
}

/// Outcome of a batch send or delete, split per entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Ids of the entries the service accepted
    pub successful: Vec<String>,
    pub failed: Vec<BatchEntryFailure>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Opaque token identifying one delivery of a message; needed to delete it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message received from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    pub receipt_handle: ReceiptHandle,
}

impl ReceivedMessage {
    pub fn new(
        message_id: impl Into<String>,
        body: impl Into<String>,
        receipt_handle: ReceiptHandle,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            receipt_handle,
        }
    }
}

/// What a handler is invoked with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// A single message body (batch size of one)
    Single(String),
    /// Message bodies in the order the transport returned them
    Batch(Vec<String>),
}

impl Payload {
    /// Number of message bodies carried
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(bodies) => bodies.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into the carried bodies
    pub fn into_bodies(self) -> Vec<String> {
        match self {
            Self::Single(body) => vec![body],
            Self::Batch(bodies) => bodies,
        }
    }
}

/// Point-in-time queue statistics; fetched fresh, never cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Approximate number of visible messages
    pub message_count: u64,
    pub queue_arn: String,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
