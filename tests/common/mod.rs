//! Shared test helpers for integration tests

use deferral::prelude::*;
use std::rc::Rc;

/// Fresh deterministic task queue
pub fn queue() -> Rc<TaskQueue> {
    Rc::new(TaskQueue::new())
}

/// Drain the queue and return the promise's settled result
pub fn run_and_result(queue: &Rc<TaskQueue>, promise: &Deferred) -> Option<Value> {
    queue
        .run_to_completion()
        .expect("test drained the queue re-entrantly");
    promise.result()
}

/// Initialize tracing output for a test run (respects RUST_LOG)
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
