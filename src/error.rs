//! Error types for the deferral core

use thiserror::Error;

use crate::value::Value;

/// Main error type for deferral
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A chained promise was resolved with itself. Adoption is a single
    /// flatten step, so a self-referential result can never settle; it is
    /// reported instead of left pending forever.
    #[error("TypeError: chaining cycle detected for promise")]
    AdoptionCycle,

    /// The task queue was drained from inside one of its own tasks.
    /// Draining is not re-entrant; the inner call would observe the queue
    /// mid-mutation.
    #[error("task queue drained re-entrantly from inside a task")]
    ReentrantDrain,
}

impl Error {
    /// Convert this error into a rejection reason.
    ///
    /// Rejection reasons are ordinary [`Value`]s, so library-detected
    /// failures (like an adoption cycle) surface to promise consumers the
    /// same way a thrown value does.
    pub fn to_reason(&self) -> Value {
        Value::String(self.to_string())
    }
}

/// Result type alias for deferral
pub type Result<T> = std::result::Result<T, Error>;
