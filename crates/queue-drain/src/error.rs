//! Error types for queue operations.

use std::fmt;
use thiserror::Error;

/// Boxed error returned by user-supplied handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`QueueEngine`](crate::engine::QueueEngine) operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid queue name: {0}")]
    InvalidName(#[from] ValidationError),

    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfiguration { field: String, message: String },

    #[error("The queue hasn't been created yet. Call 'create' or 'connect' before '{operation}'")]
    NotProvisioned { operation: String },

    #[error("Failed to enqueue the following messages:\n{}", render_list(.failures))]
    PartialSendFailure { failures: Vec<FailedSend> },

    #[error("Failed to delete the following messages:\n{}", render_list(.failures))]
    PartialDeleteFailure { failures: Vec<FailedDelete> },

    #[error("The configured batch size is {expected} but the receive call returned {received} messages")]
    UnexpectedBatchSize { expected: u32, received: usize },

    #[error("Encountered an error while attempting to {operation}: {source}")]
    TransportFailure {
        operation: String,
        #[source]
        source: TransportError,
    },

    #[error("Message handler failed: {0}")]
    HandlerFailed(#[source] HandlerError),
}

impl QueueError {
    pub(crate) fn transport(operation: &str, source: TransportError) -> Self {
        Self::TransportFailure {
            operation: operation.to_string(),
            source,
        }
    }

    pub(crate) fn not_provisioned(operation: &str) -> Self {
        Self::NotProvisioned {
            operation: operation.to_string(),
        }
    }

    /// Check if the underlying cause is transient
    ///
    /// Only transport failures can be transient; the engine itself never retries.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransportFailure { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// A message the transport refused to enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSend {
    pub body: String,
    pub failure: BatchEntryFailure,
}

impl fmt::Display for FailedSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.body, self.failure)
    }
}

/// A received message whose deletion the transport rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelete {
    pub receipt_handle: String,
    pub failure: BatchEntryFailure,
}

impl fmt::Display for FailedDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receipt {}: {}", self.receipt_handle, self.failure)
    }
}

/// Per-entry failure reported by a batch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntryFailure {
    /// Chunk-local entry id the failure refers to
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

impl fmt::Display for BatchEntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[entry {}] {}", self.id, self.code)?;
        if !self.message.is_empty() {
            write!(f, " - {}", self.message)?;
        }
        if self.sender_fault {
            write!(f, " (sender fault)")?;
        }
        Ok(())
    }
}

fn render_list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("  {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors raised by a [`QueueTransport`](crate::transport::QueueTransport)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Service error: {code} - {message}")]
    Service { code: String, message: String },

    #[error("Malformed service response: {0}")]
    Serialization(String),

    #[error("Invalid transport configuration: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Check if error is transient and could succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::Network(_) => true,
            Self::QueueNotFound(_) => false,
            Self::InvalidReceipt(_) => false,
            Self::Service { .. } => true,
            Self::Serialization(_) => false,
            Self::Configuration(_) => false,
        }
    }
}

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
