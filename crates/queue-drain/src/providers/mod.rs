//! Queue transport implementations.
//!
//! This module contains concrete implementations of the
//! [`QueueTransport`](crate::transport::QueueTransport) trait.

pub mod aws;
pub mod memory;

pub use aws::{AwsCredentials, AwsSqsTransport};
pub use memory::InMemoryTransport;
