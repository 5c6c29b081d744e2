//! Prelude module for convenient imports
//!
//! This module provides the most commonly used types and functions for
//! working with deferral. Import everything from this module for quick
//! access:
//!
//! ```
//! use deferral::prelude::*;
//! use std::rc::Rc;
//!
//! let queue = Rc::new(TaskQueue::new());
//! let p = Deferred::resolve(queue.clone(), Value::from("ready"));
//! queue.run_to_completion().unwrap();
//! assert!(p.is_fulfilled());
//! ```

// Deferred values and chaining
pub use crate::promise::{handler, Completion, Deferred, Handler, PromiseState, Resolver};

// Settlement payloads
pub use crate::value::Value;

// Task scheduling
pub use crate::task_queue::{QueueStats, RunResult, Schedule, Task, TaskQueue};

// Error handling
pub use crate::error::{Error, Result};

// Version constant
pub use crate::VERSION;
