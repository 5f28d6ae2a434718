//! # Queue Drain
//!
//! Client library for SQS-style queues that are filled in bulk and then drained
//! by a long-polling consumption loop.
//!
//! This library provides:
//! - Queue provisioning with validated names and derived FIFO settings
//! - Bulk enqueueing in service-sized batches
//! - A receive, dispatch, delete loop that stops once the queue is observed empty
//! - Queue deletion and size inspection
//!
//! ## Module Organization
//!
//! - [`engine`] - The queue engine and its consumption loop
//! - [`config`] - Queue and AWS connection settings
//! - [`name`] - Queue name validation and FIFO naming
//! - [`message`] - Batch entries, received messages and handler payloads
//! - [`handler`] - Message and finish handler strategies
//! - [`transport`] - The queue service interface
//! - [`providers`] - AWS SQS and in-memory transports
//! - [`error`] - Error types for all queue operations
//!
//! ## Example
//!
//! ```no_run
//! use queue_drain::handler::handler_fn;
//! use queue_drain::providers::InMemoryTransport;
//! use queue_drain::{HandlerError, Payload, QueueConfig, QueueEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = QueueEngine::new(
//!     QueueConfig::new("jobs").with_batch_size(5),
//!     Arc::new(InMemoryTransport::new()),
//! )?
//! .with_handler(handler_fn(|payload: Payload| async move {
//!     println!("{:?}", payload);
//!     Ok::<(), HandlerError>(())
//! }));
//!
//! engine.create().await?;
//! engine.fill((0..25).map(|i| i.to_string())).await?;
//! let summary = engine.process().await?;
//! println!("processed {} messages", summary.messages_processed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod message;
pub mod name;
pub mod providers;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use config::{AwsSqsConfig, QueueConfig};
pub use engine::{DrainOutcome, DrainSummary, QueueEngine};
pub use error::{
    BatchEntryFailure, FailedDelete, FailedSend, HandlerError, QueueError, TransportError,
    ValidationError,
};
pub use handler::{FinishHandler, MessageHandler, NoopHandler};
pub use message::{Payload, QueueStats, ReceiptHandle, ReceivedMessage};
pub use name::QueueName;
pub use transport::QueueTransport;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
