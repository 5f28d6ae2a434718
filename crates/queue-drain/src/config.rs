//! Queue and transport configuration.

use crate::error::QueueError;
use serde::{Deserialize, Serialize};

/// Largest number of messages a single receive or batch send may carry
pub const MAX_BATCH_SIZE: u32 = 10;

/// Longest long-poll wait the service accepts, in seconds
pub const MAX_LONG_POLLING_INTERVAL_SECONDS: u32 = 20;

/// Longest visibility timeout the service accepts, in seconds (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u32 = 43_200;

/// Default region used when none is configured
pub const DEFAULT_REGION: &str = "us-west-2";

/// Options for one logical queue handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name; `.fifo` is appended for FIFO queues when missing
    pub queue_name: String,

    /// Create a FIFO queue (strict ordering, content-based deduplication)
    pub fifo: bool,

    /// Seconds a received message stays hidden from other consumers
    pub visibility_timeout: u32,

    /// Seconds each receive call waits for messages
    pub long_polling_interval: u32,

    /// Messages requested per receive call. With `1` the handler receives a
    /// single message; above that it receives a list.
    pub batch_size: u32,

    /// Delete messages as soon as they are received, before the handler runs.
    /// A handler failure then loses those messages instead of redelivering them.
    pub delete_immediately: bool,

    /// Message group used for every message sent to a FIFO queue
    pub message_group_id: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: String::new(),
            fifo: false,
            visibility_timeout: 600,
            long_polling_interval: MAX_LONG_POLLING_INTERVAL_SECONDS,
            batch_size: 1,
            delete_immediately: false,
            message_group_id: "1".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create configuration for the named queue with default options
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }

    pub fn with_fifo(mut self, fifo: bool) -> Self {
        self.fifo = fifo;
        self
    }

    pub fn with_visibility_timeout(mut self, seconds: u32) -> Self {
        self.visibility_timeout = seconds;
        self
    }

    pub fn with_long_polling_interval(mut self, seconds: u32) -> Self {
        self.long_polling_interval = seconds;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_delete_immediately(mut self, delete_immediately: bool) -> Self {
        self.delete_immediately = delete_immediately;
        self
    }

    pub fn with_message_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.message_group_id = group_id.into();
        self
    }

    /// Check numeric options against the service limits
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(QueueError::InvalidConfiguration {
                field: "batch_size".to_string(),
                message: format!("must be between 1 and {}", MAX_BATCH_SIZE),
            });
        }

        if self.long_polling_interval > MAX_LONG_POLLING_INTERVAL_SECONDS {
            return Err(QueueError::InvalidConfiguration {
                field: "long_polling_interval".to_string(),
                message: format!(
                    "must be between 0 and {} seconds",
                    MAX_LONG_POLLING_INTERVAL_SECONDS
                ),
            });
        }

        if self.visibility_timeout > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(QueueError::InvalidConfiguration {
                field: "visibility_timeout".to_string(),
                message: format!(
                    "must be between 0 and {} seconds",
                    MAX_VISIBILITY_TIMEOUT_SECONDS
                ),
            });
        }

        if self.fifo && self.message_group_id.is_empty() {
            return Err(QueueError::InvalidConfiguration {
                field: "message_group_id".to_string(),
                message: "FIFO queues require a message group id".to_string(),
            });
        }

        Ok(())
    }
}

/// AWS SQS transport configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSqsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Override of the regional endpoint, e.g. a local emulator
    pub endpoint: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for AwsSqsConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            endpoint: None,
            // Must stay above the longest long-poll wait
            request_timeout_seconds: 30,
        }
    }
}

impl AwsSqsConfig {
    /// Endpoint requests are sent to
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://sqs.{}.amazonaws.com", self.region),
        }
    }
}

impl std::fmt::Debug for AwsSqsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSqsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("endpoint", &self.endpoint)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
