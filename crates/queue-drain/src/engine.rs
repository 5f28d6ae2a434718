//! The queue engine: provisioning, bulk enqueue, and the consumption loop.
//!
//! A [`QueueEngine`] owns one logical queue handle. The usual lifecycle is:
//!
//! 1. build the engine from a [`QueueConfig`] and a [`QueueTransport`]
//! 2. [`create`](QueueEngine::create) the queue (or [`connect`](QueueEngine::connect)
//!    to an existing one)
//! 3. optionally [`fill`](QueueEngine::fill) it
//! 4. [`process`](QueueEngine::process) it until it is observed empty
//!
//! ## Consumption loop
//!
//! Every iteration long-polls for up to `batch_size` messages, hands them to the
//! [`MessageHandler`], deletes them (before the handler when `delete_immediately`
//! is set, after it otherwise) and then probes the approximate visible message
//! count. The loop ends when that count is zero, at which point the
//! [`FinishHandler`] runs once. Probing the count rather than looking at the
//! receive result keeps the loop alive while messages are in flight elsewhere.
//!
//! Nothing is retried: transport errors, partial batch failures and handler
//! errors all end the loop and are returned to the caller.

use crate::config::{QueueConfig, MAX_BATCH_SIZE};
use crate::error::{FailedDelete, FailedSend, QueueError, TransportError};
use crate::handler::{FinishHandler, MessageHandler, NoopHandler};
use crate::message::{
    attributes, DeleteEntry, Payload, QueueAttributes, QueueStats, ReceivedMessage, SendEntry,
};
use crate::name::QueueName;
use crate::transport::QueueTransport;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

/// How a consumption run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue was observed empty and the finish handler ran
    Drained,
    /// The shutdown signal was raised before the queue emptied
    Cancelled,
}

/// Summary of a consumption run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// Receive/dispatch/delete cycles completed
    pub iterations: u64,
    /// Messages handed to the handler
    pub messages_processed: u64,
    pub outcome: DrainOutcome,
}

/// Client for one queue: creation, enqueueing, consumption and inspection
pub struct QueueEngine {
    name: QueueName,
    config: QueueConfig,
    transport: Arc<dyn QueueTransport>,
    handler: Arc<dyn MessageHandler>,
    on_finish: Arc<dyn FinishHandler>,
    queue_url: Option<String>,
}

impl QueueEngine {
    /// Build an engine for the configured queue
    ///
    /// The effective queue name gets a `.fifo` suffix when `fifo` is set and the
    /// suffix is missing; validation runs against that final name.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidName`] if the effective name is malformed
    /// - [`QueueError::InvalidConfiguration`] if a numeric option is out of range
    pub fn new(config: QueueConfig, transport: Arc<dyn QueueTransport>) -> Result<Self, QueueError> {
        let name = QueueName::resolve(&config.queue_name, config.fifo)?;
        config.validate()?;

        let config = QueueConfig {
            queue_name: name.to_string(),
            ..config
        };

        Ok(Self {
            name,
            config,
            transport,
            handler: Arc::new(NoopHandler),
            on_finish: Arc::new(NoopHandler),
            queue_url: None,
        })
    }

    /// Set the handler invoked with received messages
    pub fn with_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Set the callback invoked when the queue is observed empty
    pub fn with_finish_handler(mut self, on_finish: impl FinishHandler + 'static) -> Self {
        self.on_finish = Arc::new(on_finish);
        self
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// URL of the provisioned queue, if any
    pub fn queue_url(&self) -> Option<&str> {
        self.queue_url.as_deref()
    }

    /// Create the queue (idempotent on the service side) and remember its URL
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn create(&mut self) -> Result<(), QueueError> {
        let attributes = self.queue_attributes();
        let queue_url = self
            .transport
            .create_queue(self.name.as_str(), &attributes)
            .await
            .map_err(|e| QueueError::transport("create the queue", e))?;

        info!(queue_url = %queue_url, fifo = self.config.fifo, "Queue created");
        self.queue_url = Some(queue_url);
        Ok(())
    }

    /// Attach to an existing queue without changing its attributes
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn connect(&mut self) -> Result<(), QueueError> {
        let queue_url = self
            .transport
            .get_queue_url(self.name.as_str())
            .await
            .map_err(|e| QueueError::transport("resolve the queue url", e))?;

        info!(queue_url = %queue_url, "Connected to existing queue");
        self.queue_url = Some(queue_url);
        Ok(())
    }

    /// Enqueue one message
    pub async fn fill_one(&self, message: impl Into<String>) -> Result<usize, QueueError> {
        self.fill(std::iter::once(message.into())).await
    }

    /// Enqueue messages in order, in chunks of at most ten
    ///
    /// Chunks are sent one after another so FIFO queues keep the caller's order.
    /// If the service rejects any entry of a chunk, the call fails with
    /// [`QueueError::PartialSendFailure`]; chunks sent before it stay enqueued and
    /// later chunks are not attempted.
    ///
    /// Returns the number of messages enqueued.
    #[instrument(skip(self, messages), fields(queue = %self.name))]
    pub async fn fill<I, S>(&self, messages: I) -> Result<usize, QueueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue_url = self.require_url("fill")?;
        let messages: Vec<String> = messages.into_iter().map(Into::into).collect();

        let mut sent = 0;
        for chunk in messages.chunks(MAX_BATCH_SIZE as usize) {
            let entries = self.encode_batch(chunk);
            let result = self
                .transport
                .send_message_batch(queue_url, &entries)
                .await
                .map_err(|e| QueueError::transport("send a message batch", e))?;

            if !result.is_complete() {
                let failures: Vec<FailedSend> = result
                    .failed
                    .into_iter()
                    .map(|failure| FailedSend {
                        body: entry_at(chunk, &failure.id).cloned().unwrap_or_default(),
                        failure,
                    })
                    .collect();
                warn!(
                    failed = failures.len(),
                    already_sent = sent,
                    "Service rejected part of a message batch"
                );
                return Err(QueueError::PartialSendFailure { failures });
            }

            sent += chunk.len();
            debug!(chunk_size = chunk.len(), sent, "Message batch sent");
        }

        info!(sent, "Messages enqueued");
        Ok(sent)
    }

    /// Consume the queue until it is observed empty
    ///
    /// # Errors
    ///
    /// - [`QueueError::NotProvisioned`] before `create`/`connect`; no call is made
    /// - [`QueueError::UnexpectedBatchSize`] if a single-message receive returns more
    /// - [`QueueError::HandlerFailed`] if the handler fails; the loop does not resume
    /// - [`QueueError::PartialDeleteFailure`] or [`QueueError::TransportFailure`]
    pub async fn process(&self) -> Result<DrainSummary, QueueError> {
        self.run(None).await
    }

    /// Consume the queue until it is observed empty or `shutdown` turns true
    ///
    /// The flag is checked before each receive; an iteration that has started
    /// always runs to completion. A cancelled run does not invoke the finish
    /// handler.
    pub async fn process_until(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<DrainSummary, QueueError> {
        self.run(Some(shutdown)).await
    }

    #[instrument(skip(self, shutdown), fields(queue = %self.name))]
    async fn run(
        &self,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<DrainSummary, QueueError> {
        let queue_url = self.require_url("process")?;

        info!(
            batch_size = self.config.batch_size,
            wait_seconds = self.config.long_polling_interval,
            delete_immediately = self.config.delete_immediately,
            "Starting consumption loop"
        );

        let mut iterations = 0;
        let mut messages_processed = 0;

        loop {
            let cancelled = shutdown.as_ref().is_some_and(|rx| *rx.borrow());
            if cancelled {
                info!(iterations, messages_processed, "Consumption cancelled");
                return Ok(DrainSummary {
                    iterations,
                    messages_processed,
                    outcome: DrainOutcome::Cancelled,
                });
            }

            messages_processed += self.poll_once(queue_url).await? as u64;
            iterations += 1;

            let remaining = self.get_queue_size().await?;
            if remaining == 0 {
                info!(iterations, messages_processed, "Queue drained");
                self.on_finish.on_finish().await;
                return Ok(DrainSummary {
                    iterations,
                    messages_processed,
                    outcome: DrainOutcome::Drained,
                });
            }

            debug!(remaining, "Messages remain, polling again");
        }
    }

    /// One receive/dispatch/delete cycle; returns the number of messages handled
    async fn poll_once(&self, queue_url: &str) -> Result<usize, QueueError> {
        let messages = self
            .transport
            .receive_messages(
                queue_url,
                self.config.batch_size,
                self.config.long_polling_interval,
            )
            .await
            .map_err(|e| QueueError::transport("receive messages", e))?;

        if messages.is_empty() {
            debug!("Receive returned no messages");
            return Ok(0);
        }

        debug!(count = messages.len(), "Messages received");

        if self.config.delete_immediately {
            self.delete_messages(queue_url, &messages).await?;
        }

        let payload = self.decode_payload(&messages)?;
        if let Err(e) = self.handler.handle(payload).await {
            error!(error = %e, count = messages.len(), "Message handler failed");
            return Err(QueueError::HandlerFailed(e));
        }

        if !self.config.delete_immediately {
            self.delete_messages(queue_url, &messages).await?;
        }

        Ok(messages.len())
    }

    /// Shape received messages for the handler according to the batch size
    fn decode_payload(&self, messages: &[ReceivedMessage]) -> Result<Payload, QueueError> {
        if self.config.batch_size > 1 {
            return Ok(Payload::Batch(
                messages.iter().map(|m| m.body.clone()).collect(),
            ));
        }

        match messages {
            [message] => Ok(Payload::Single(message.body.clone())),
            _ => Err(QueueError::UnexpectedBatchSize {
                expected: self.config.batch_size,
                received: messages.len(),
            }),
        }
    }

    /// Delete received messages; every entry must succeed
    async fn delete_messages(
        &self,
        queue_url: &str,
        messages: &[ReceivedMessage],
    ) -> Result<(), QueueError> {
        for chunk in messages.chunks(MAX_BATCH_SIZE as usize) {
            let entries: Vec<DeleteEntry> = chunk
                .iter()
                .enumerate()
                .map(|(index, message)| DeleteEntry {
                    id: index.to_string(),
                    receipt_handle: message.receipt_handle.clone(),
                })
                .collect();

            let result = self
                .transport
                .delete_message_batch(queue_url, &entries)
                .await
                .map_err(|e| QueueError::transport("delete received messages", e))?;

            if !result.is_complete() {
                let failures: Vec<FailedDelete> = result
                    .failed
                    .into_iter()
                    .map(|failure| FailedDelete {
                        receipt_handle: entry_at(chunk, &failure.id)
                            .map(|m| m.receipt_handle.to_string())
                            .unwrap_or_default(),
                        failure,
                    })
                    .collect();
                warn!(failed = failures.len(), "Service rejected message deletions");
                return Err(QueueError::PartialDeleteFailure { failures });
            }
        }

        debug!(count = messages.len(), "Messages deleted");
        Ok(())
    }

    /// Delete the queue
    ///
    /// The call is attempted even if the queue was never provisioned, so the
    /// service reports what is wrong. The stored URL is kept; using the engine
    /// afterwards yields transport errors.
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn delete(&self) -> Result<(), QueueError> {
        let queue_url = self.queue_url.as_deref().unwrap_or_default();
        self.transport
            .delete_queue(queue_url)
            .await
            .map_err(|e| QueueError::transport("delete the queue", e))?;

        info!("Queue deleted");
        Ok(())
    }

    /// Fetch the approximate number of visible messages
    pub async fn get_queue_size(&self) -> Result<u64, QueueError> {
        Ok(self.get_stats().await?.message_count)
    }

    /// Fetch the approximate visible message count and the queue ARN
    pub async fn get_stats(&self) -> Result<QueueStats, QueueError> {
        let queue_url = self.require_url("get_stats")?;
        let mut attrs = self
            .transport
            .get_queue_attributes(
                queue_url,
                &[attributes::APPROXIMATE_NUMBER_OF_MESSAGES, attributes::QUEUE_ARN],
            )
            .await
            .map_err(|e| QueueError::transport("fetch queue attributes", e))?;

        let message_count = attrs
            .get(attributes::APPROXIMATE_NUMBER_OF_MESSAGES)
            .ok_or_else(|| {
                TransportError::Serialization(format!(
                    "{} missing from attributes",
                    attributes::APPROXIMATE_NUMBER_OF_MESSAGES
                ))
            })
            .and_then(|count| {
                count.parse::<u64>().map_err(|e| {
                    TransportError::Serialization(format!("invalid message count {:?}: {}", count, e))
                })
            })
            .map_err(|e| QueueError::transport("fetch queue attributes", e))?;

        let queue_arn = attrs.remove(attributes::QUEUE_ARN).ok_or_else(|| {
            QueueError::transport(
                "fetch queue attributes",
                TransportError::Serialization(format!(
                    "{} missing from attributes",
                    attributes::QUEUE_ARN
                )),
            )
        })?;

        Ok(QueueStats {
            message_count,
            queue_arn,
        })
    }

    /// Attributes sent with CreateQueue
    pub(crate) fn queue_attributes(&self) -> QueueAttributes {
        let mut attrs = QueueAttributes::new();
        attrs.insert(
            attributes::VISIBILITY_TIMEOUT.to_string(),
            self.config.visibility_timeout.to_string(),
        );
        attrs.insert(
            attributes::RECEIVE_MESSAGE_WAIT_TIME_SECONDS.to_string(),
            self.config.long_polling_interval.to_string(),
        );

        if self.config.fifo {
            attrs.insert(attributes::FIFO_QUEUE.to_string(), "true".to_string());
            attrs.insert(
                attributes::CONTENT_BASED_DEDUPLICATION.to_string(),
                "true".to_string(),
            );
        }

        attrs
    }

    /// Build batch entries with chunk-local ids
    ///
    /// Every message of a FIFO queue joins the same message group.
    pub(crate) fn encode_batch(&self, messages: &[String]) -> Vec<SendEntry> {
        messages
            .iter()
            .enumerate()
            .map(|(index, body)| {
                let entry = SendEntry::new(index.to_string(), body.clone());
                if self.config.fifo {
                    entry.with_message_group_id(self.config.message_group_id.clone())
                } else {
                    entry
                }
            })
            .collect()
    }

    fn require_url(&self, operation: &str) -> Result<&str, QueueError> {
        self.queue_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| QueueError::not_provisioned(operation))
    }
}

impl fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEngine")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("queue_url", &self.queue_url)
            .finish()
    }
}

/// Look up the item a chunk-local batch id refers to
fn entry_at<'a, T>(chunk: &'a [T], id: &str) -> Option<&'a T> {
    id.parse::<usize>().ok().and_then(|index| chunk.get(index))
}
