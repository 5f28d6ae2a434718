//! Strategies invoked by the consumption loop.
//!
//! A [`MessageHandler`] receives every message (or batch of messages) pulled from
//! the queue; a [`FinishHandler`] runs once when the queue is observed empty. Both
//! default to no-ops, and closures can be adapted with [`handler_fn`] and
//! [`finish_fn`].

use crate::error::HandlerError;
use crate::message::Payload;
use async_trait::async_trait;
use std::future::Future;

/// Processes message payloads pulled from the queue
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one payload. An error stops the consumption loop.
    async fn handle(&self, payload: Payload) -> Result<(), HandlerError>;
}

/// Invoked when the consumption loop observes an empty queue
#[async_trait]
pub trait FinishHandler: Send + Sync {
    async fn on_finish(&self);
}

/// Handler that accepts and discards every payload
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait]
impl MessageHandler for NoopHandler {
    async fn handle(&self, _payload: Payload) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[async_trait]
impl FinishHandler for NoopHandler {
    async fn on_finish(&self) {}
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`MessageHandler`]
///
/// ```
/// use queue_drain::handler::handler_fn;
/// use queue_drain::{HandlerError, Payload};
///
/// let handler = handler_fn(|payload: Payload| async move {
///     for body in payload.into_bodies() {
///         println!("{}", body);
///     }
///     Ok::<(), HandlerError>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, payload: Payload) -> Result<(), HandlerError> {
        (self.0)(payload).await
    }
}

/// Adapter turning an async closure into a [`FinishHandler`]
pub struct FnFinish<F>(F);

/// Wrap an async closure as a [`FinishHandler`]
pub fn finish_fn<F, Fut>(f: F) -> FnFinish<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnFinish(f)
}

#[async_trait]
impl<F, Fut> FinishHandler for FnFinish<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn on_finish(&self) {
        (self.0)().await
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
