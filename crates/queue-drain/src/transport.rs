//! The queue service surface the engine depends on.

use crate::error::TransportError;
use crate::message::{BatchResult, DeleteEntry, QueueAttributes, ReceivedMessage, SendEntry};
use async_trait::async_trait;

/// Interface implemented by queue service transports (AWS SQS, in-memory, ...)
///
/// Implementations perform one service call per method and never retry.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Create a queue (or return the existing one) and return its URL
    async fn create_queue(
        &self,
        queue_name: &str,
        attributes: &QueueAttributes,
    ) -> Result<String, TransportError>;

    /// Resolve the URL of an existing queue
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, TransportError>;

    /// Send up to ten messages in one call
    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[SendEntry],
    ) -> Result<BatchResult, TransportError>;

    /// Long-poll for up to `max_messages` messages, waiting at most `wait_seconds`
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Delete received messages by receipt handle
    async fn delete_message_batch(
        &self,
        queue_url: &str,
        entries: &[DeleteEntry],
    ) -> Result<BatchResult, TransportError>;

    /// Delete the queue and all its messages
    async fn delete_queue(&self, queue_url: &str) -> Result<(), TransportError>;

    /// Fetch the named queue attributes
    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[&str],
    ) -> Result<QueueAttributes, TransportError>;
}
