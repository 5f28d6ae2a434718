//! Queue name validation, including FIFO suffix handling.

use crate::error::ValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

/// Maximum length of a queue name, `.fifo` suffix included
pub const MAX_QUEUE_NAME_LENGTH: usize = 80;

/// Suffix that FIFO queue names must carry
pub const FIFO_SUFFIX: &str = ".fifo";

/// Matches valid standard queue names. The only valid non-standard names
/// belong to FIFO queues, which carry [`FIFO_SUFFIX`].
fn standard_name_matcher() -> &'static Regex {
    static MATCHER: OnceLock<Regex> = OnceLock::new();
    MATCHER.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,80}$").expect("static pattern is valid"))
}

/// Ensure a queue name is 1-80 characters long and uses only legal characters.
///
/// The length check runs on the full name, so a FIFO name leaves 75 characters
/// for the part before the suffix.
pub fn validate(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "queue_name".to_string(),
        });
    }

    if name.len() > MAX_QUEUE_NAME_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: "queue_name".to_string(),
            message: format!(
                "queue names cannot be longer than {} characters",
                MAX_QUEUE_NAME_LENGTH
            ),
        });
    }

    let base = name.strip_suffix(FIFO_SUFFIX).unwrap_or(name);
    if !standard_name_matcher().is_match(base) {
        return Err(ValidationError::InvalidFormat {
            field: "queue_name".to_string(),
            message: format!("'{}' contains invalid characters", base),
        });
    }

    Ok(())
}

/// Check whether the name ends with the FIFO suffix
pub fn is_fifo_name(name: &str) -> bool {
    name.ends_with(FIFO_SUFFIX)
}

/// Append the FIFO suffix when FIFO mode is requested and it is missing
pub fn derive_fifo_name(name: &str, fifo: bool) -> String {
    if fifo && !is_fifo_name(name) {
        format!("{}{}", name, FIFO_SUFFIX)
    } else {
        name.to_string()
    }
}

/// Validated queue name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        validate(&name)?;
        Ok(Self(name))
    }

    /// Derive the effective name for the requested queue type, then validate it
    pub fn resolve(name: &str, fifo: bool) -> Result<Self, ValidationError> {
        Self::new(derive_fifo_name(name, fifo))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_fifo(&self) -> bool {
        is_fifo_name(&self.0)
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

#[cfg(test)]
#[path = "name_tests.rs"]
mod tests;
