//! Common test utilities for queue-drain integration tests
//!
//! This module provides:
//! - A recording message handler and finish handler
//! - Engine builders over the in-memory transport

use async_trait::async_trait;
use queue_drain::providers::InMemoryTransport;
use queue_drain::{
    FinishHandler, HandlerError, MessageHandler, Payload, QueueConfig, QueueEngine,
    QueueTransport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Recording Handler
// ============================================================================

/// Handler recording every payload; optionally fails the first `failures` calls
#[derive(Clone, Default)]
pub struct RecordingHandler {
    payloads: Arc<Mutex<Vec<Payload>>>,
    failures_left: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` invocations after recording them
    #[allow(dead_code)]
    pub fn failing(count: usize) -> Self {
        let handler = Self::default();
        handler.failures_left.store(count, Ordering::SeqCst);
        handler
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.payloads.lock().unwrap().clone()
    }

    /// Every body received, flattened in order
    pub fn bodies(&self) -> Vec<String> {
        self.payloads()
            .into_iter()
            .flat_map(Payload::into_bodies)
            .collect()
    }

    pub fn finish_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, payload: Payload) -> Result<(), HandlerError> {
        self.payloads.lock().unwrap().push(payload);

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            return Err("simulated handler failure".into());
        }
        Ok(())
    }
}

#[async_trait]
impl FinishHandler for RecordingHandler {
    async fn on_finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Engine Builders
// ============================================================================

/// Engine over `transport` wired to `handler` for both strategies
pub fn engine_with(
    config: QueueConfig,
    transport: Arc<dyn QueueTransport>,
    handler: &RecordingHandler,
) -> QueueEngine {
    QueueEngine::new(config, transport)
        .unwrap()
        .with_handler(handler.clone())
        .with_finish_handler(handler.clone())
}

/// Engine over a shared in-memory transport with a queue already created
#[allow(dead_code)]
pub async fn provisioned_memory_engine(
    config: QueueConfig,
    transport: &InMemoryTransport,
    handler: &RecordingHandler,
) -> QueueEngine {
    let mut engine = engine_with(config, Arc::new(transport.clone()), handler);
    engine.create().await.unwrap();
    engine
}
