//! Tests for handler strategies.

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_noop_handler_accepts_everything() {
    let handler = NoopHandler;
    assert!(handler.handle(Payload::Single("a".to_string())).await.is_ok());
    assert!(handler.handle(Payload::Batch(Vec::new())).await.is_ok());
    handler.on_finish().await;
}

#[tokio::test]
async fn test_handler_fn_receives_payload() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |payload: Payload| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().extend(payload.into_bodies());
            Ok::<(), HandlerError>(())
        }
    });

    handler
        .handle(Payload::Batch(vec!["a".to_string(), "b".to_string()]))
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_handler_fn_propagates_errors() {
    let handler =
        handler_fn(|_payload: Payload| async move { Err::<(), HandlerError>("boom".into()) });

    let error = handler
        .handle(Payload::Single("a".to_string()))
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "boom");
}

#[tokio::test]
async fn test_finish_fn_runs_closure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let finish = finish_fn(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    finish.on_finish().await;
    finish.on_finish().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_handlers_are_object_safe() {
    let _handler: Arc<dyn MessageHandler> = Arc::new(NoopHandler);
    let _finish: Arc<dyn FinishHandler> = Arc::new(NoopHandler);
}
