//! Deferral: a deterministic deferred-value (promise) core written in Rust
//!
//! Deferral implements the promise abstraction from first principles: a
//! [`Deferred`] represents the eventual result of an asynchronous
//! computation, with chainable continuations (`then`/`catch`) and
//! multi-value combinators (`all`, `race`). There are no threads and no
//! timers under the hood; "asynchrony" is purely scheduling order on a
//! single-threaded FIFO [`TaskQueue`] driven by virtual time, which makes
//! every execution deterministic and replayable.
//!
//! # Features
//!
//! - **Strict scheduling discipline**: continuations never run inside the
//!   call that registers them or the call that settles their promise
//! - **Injectable scheduling**: the core depends only on the [`Schedule`]
//!   trait, so a host event loop can replace the shipped queue
//! - **Deterministic testing**: virtual-time delayed tasks and a manual
//!   drain loop, no sleeps and no flaky timing
//!
//! # Quick Start
//!
//! ```
//! use deferral::prelude::*;
//! use std::rc::Rc;
//!
//! fn main() -> deferral::Result<()> {
//!     let queue = Rc::new(TaskQueue::new());
//!     let answer = Deferred::new(queue.clone(), |r| {
//!         r.resolve(Value::from(41));
//!         Ok(())
//!     })
//!     .then(Some(handler(|v| Ok(Value::from(v.to_number() + 1.0)))), None);
//!
//!     queue.run_to_completion()?;
//!     assert_eq!(answer.result(), Some(Value::from(42)));
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`promise`] (state machine, chaining, combinators), [`value`], [`error`](Error) |
//! | **Scheduling** | [`task_queue`] |
//! | **Convenience** | [`prelude`] |
// Clippy configuration for the deferral core.
//
// - type_complexity: handler plumbing nests Rc<dyn Fn> inside Option
#![allow(clippy::type_complexity)]

pub mod prelude;
pub mod promise;
pub mod task_queue;
pub mod value;

mod error;

pub use error::{Error, Result};
pub use promise::{handler, Completion, Deferred, Handler, PromiseState, Resolver};
pub use task_queue::{QueueStats, RunResult, Schedule, Task, TaskQueue};
pub use value::Value;

/// Deferral version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
