//! Deferred values
//!
//! This module implements the promise state machine and the chaining
//! engine. A [`Deferred`] is a shared handle to one eventual settlement:
//! it starts `Pending`, transitions exactly once to `Fulfilled` or
//! `Rejected`, and delivers that outcome to continuations registered with
//! [`Deferred::then`] and [`Deferred::catch`].
//!
//! Continuations never run inside the call that registers them, and never
//! inside the call that settles the promise. Every handler invocation is
//! deferred through the promise's [`Schedule`] seam, so a `then` chain
//! executes link by link on successive queue turns.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

use crate::error::Error;
use crate::task_queue::Schedule;
use crate::value::Value;

mod combinators;

/// Completion of a handler or executor body: `Ok` is a normal return,
/// `Err` carries a thrown value.
pub type Completion = std::result::Result<Value, Value>;

/// A continuation handler
pub type Handler = Rc<dyn Fn(Value) -> Completion>;

/// Wrap a closure as a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(Value) -> Completion + 'static,
{
    Rc::new(f)
}

/// Promise state enum
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PromiseState {
    /// Not yet settled
    Pending,
    /// Settled with a value
    Fulfilled,
    /// Settled with a reason
    Rejected,
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromiseState::Pending => write!(f, "pending"),
            PromiseState::Fulfilled => write!(f, "fulfilled"),
            PromiseState::Rejected => write!(f, "rejected"),
        }
    }
}

/// Which settlement a reaction responds to
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ReactionKind {
    Fulfill,
    Reject,
}

/// A registered continuation: an optional handler plus the child promise
/// to settle with its outcome
struct Reaction {
    kind: ReactionKind,
    handler: Option<Handler>,
    target: Deferred,
}

/// Shared mutable promise state. Private to this module; only the
/// [`Resolver`] created at construction and the chaining engine touch it.
struct Inner {
    state: PromiseState,
    result: Option<Value>,
    reactions: Vec<Reaction>,
}

/// A deferred value: the eventual result of an asynchronous computation.
///
/// Cloning is cheap and shares the underlying settlement; the creator,
/// every chained child, and every combinator subscription hold clones of
/// the same state.
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<RefCell<Inner>>,
    queue: Rc<dyn Schedule>,
}

impl Deferred {
    /// Create a promise and run `executor` synchronously with its
    /// [`Resolver`]. Returning `Err(reason)` from the executor is the
    /// synchronous throw: the promise rejects with that reason.
    pub fn new<E>(queue: Rc<dyn Schedule>, executor: E) -> Deferred
    where
        E: FnOnce(Resolver) -> std::result::Result<(), Value>,
    {
        let (promise, resolver) = Deferred::with_resolvers(queue);
        if let Err(reason) = executor(resolver.clone()) {
            resolver.reject(reason);
        }
        promise
    }

    /// Create a pending promise along with its settlement capability, for
    /// callers that settle from outside an executor body.
    pub fn with_resolvers(queue: Rc<dyn Schedule>) -> (Deferred, Resolver) {
        let promise = Deferred::pending(queue);
        let resolver = Resolver {
            promise: promise.clone(),
        };
        (promise, resolver)
    }

    fn pending(queue: Rc<dyn Schedule>) -> Deferred {
        Deferred {
            inner: Rc::new(RefCell::new(Inner {
                state: PromiseState::Pending,
                result: None,
                reactions: Vec::new(),
            })),
            queue,
        }
    }

    /// Current state
    pub fn state(&self) -> PromiseState {
        self.inner.borrow().state
    }

    /// The settled value or reason, if settled
    pub fn result(&self) -> Option<Value> {
        self.inner.borrow().result.clone()
    }

    /// Check if the promise has not settled yet
    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// Check if the promise fulfilled
    pub fn is_fulfilled(&self) -> bool {
        self.state() == PromiseState::Fulfilled
    }

    /// Check if the promise rejected
    pub fn is_rejected(&self) -> bool {
        self.state() == PromiseState::Rejected
    }

    /// Identity comparison: do both handles share one settlement?
    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register continuations and return the chained child promise.
    ///
    /// The handler matching the eventual outcome runs with the settled
    /// payload and its completion settles the child: a normal return
    /// fulfills it, a thrown value rejects it, and a returned promise is
    /// adopted (one flatten step). A missing handler forwards the parent's
    /// outcome to the child unchanged, which is how rejections propagate
    /// past `then(f, None)` and fulfillments past `catch`.
    pub fn then(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Deferred {
        let child = Deferred::pending(self.queue.clone());
        self.register(ReactionKind::Fulfill, on_fulfilled, child.clone());
        self.register(ReactionKind::Reject, on_rejected, child.clone());
        child
    }

    /// Sugar for `then(None, Some(on_rejected))`
    pub fn catch(&self, on_rejected: Handler) -> Deferred {
        self.then(None, Some(on_rejected))
    }

    fn register(&self, kind: ReactionKind, handler: Option<Handler>, target: Deferred) {
        let mut inner = self.inner.borrow_mut();
        match (inner.state, kind) {
            (PromiseState::Pending, _) => {
                inner.reactions.push(Reaction {
                    kind,
                    handler,
                    target,
                });
            }
            (PromiseState::Fulfilled, ReactionKind::Fulfill)
            | (PromiseState::Rejected, ReactionKind::Reject) => {
                let value = inner.result.clone().unwrap_or(Value::Undefined);
                drop(inner);
                self.defer(
                    Reaction {
                        kind,
                        handler,
                        target,
                    },
                    value,
                );
            }
            // Settled to the other kind: this reaction can never fire.
            _ => {}
        }
    }

    fn settle(&self, kind: ReactionKind, value: Value) {
        let reactions = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != PromiseState::Pending {
                return; // first settlement wins
            }
            inner.state = match kind {
                ReactionKind::Fulfill => PromiseState::Fulfilled,
                ReactionKind::Reject => PromiseState::Rejected,
            };
            inner.result = Some(value.clone());
            std::mem::take(&mut inner.reactions)
        };
        trace!(state = %self.state(), waiters = reactions.len(), "promise settled");

        // Fire the matching kind in registration order; the other kind is
        // discarded, its reactions can never run now.
        for reaction in reactions {
            if reaction.kind == kind {
                self.defer(reaction, value.clone());
            }
        }
    }

    /// Hand a reaction to the task queue. User code never runs inside the
    /// call that registers it or the call that settles the parent.
    fn defer(&self, reaction: Reaction, value: Value) {
        self.queue.schedule(Box::new(move || fire(reaction, value)));
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => write!(f, "Deferred {{ state: {:?} }}", inner.state),
            Err(_) => write!(f, "Deferred {{ state: <borrowed> }}"),
        }
    }
}

/// Run one reaction on a queue turn: forward, transform, or adopt.
fn fire(reaction: Reaction, value: Value) {
    let Reaction {
        kind,
        handler,
        target,
    } = reaction;

    match handler {
        // No matching handler: the parent's outcome propagates untouched.
        None => match kind {
            ReactionKind::Fulfill => target.settle(ReactionKind::Fulfill, value),
            ReactionKind::Reject => target.settle(ReactionKind::Reject, value),
        },
        Some(h) => match h(value) {
            Ok(Value::Promise(inner)) => adopt(inner, target),
            Ok(result) => target.settle(ReactionKind::Fulfill, result),
            Err(thrown) => target.settle(ReactionKind::Reject, thrown),
        },
    }
}

/// One flatten step: `child` settles with whatever `inner` settles with.
/// A promise adopting itself could never settle, so that case rejects
/// with the cycle reason instead.
fn adopt(inner: Deferred, child: Deferred) {
    if inner.ptr_eq(&child) {
        child.settle(ReactionKind::Reject, Error::AdoptionCycle.to_reason());
        return;
    }
    inner.register(ReactionKind::Fulfill, None, child.clone());
    inner.register(ReactionKind::Reject, None, child);
}

/// Settlement capability for a promise: the resolve/reject pair handed to
/// the executor, as one clonable handle.
#[derive(Clone)]
pub struct Resolver {
    promise: Deferred,
}

impl Resolver {
    /// Fulfill the promise, if it is still pending
    pub fn resolve(&self, value: Value) {
        self.promise.settle(ReactionKind::Fulfill, value);
    }

    /// Reject the promise, if it is still pending
    pub fn reject(&self, reason: Value) {
        self.promise.settle(ReactionKind::Reject, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_queue::TaskQueue;
    use std::cell::Cell;

    fn queue() -> Rc<TaskQueue> {
        Rc::new(TaskQueue::new())
    }

    #[test]
    fn test_promise_lifecycle() {
        let (p, r) = Deferred::with_resolvers(queue());
        assert_eq!(p.state(), PromiseState::Pending);
        assert_eq!(p.result(), None);

        r.resolve(Value::from(42));
        assert_eq!(p.state(), PromiseState::Fulfilled);
        assert_eq!(p.result(), Some(Value::from(42)));
    }

    #[test]
    fn test_first_settlement_wins() {
        let (p, r) = Deferred::with_resolvers(queue());
        r.resolve(Value::from(1));
        r.reject(Value::from("too late"));
        r.resolve(Value::from(2));

        assert_eq!(p.state(), PromiseState::Fulfilled);
        assert_eq!(p.result(), Some(Value::from(1)));
    }

    #[test]
    fn test_executor_runs_synchronously() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let p = Deferred::new(queue(), move |r| {
            flag.set(true);
            r.resolve(Value::Null);
            Ok(())
        });
        assert!(ran.get());
        assert!(p.is_fulfilled());
    }

    #[test]
    fn test_executor_throw_rejects() {
        let p = Deferred::new(queue(), |_r| Err(Value::from("boom")));
        assert!(p.is_rejected());
        assert_eq!(p.result(), Some(Value::from("boom")));
    }

    #[test]
    fn test_then_defers_even_on_settled_parent() {
        let q = queue();
        let (p, r) = Deferred::with_resolvers(q.clone());
        r.resolve(Value::from(7));

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let child = p.then(
            Some(handler(move |v| {
                flag.set(true);
                Ok(v)
            })),
            None,
        );

        // Registration alone runs nothing and settles nothing.
        assert!(!ran.get());
        assert!(child.is_pending());

        q.run_to_completion().unwrap();
        assert!(ran.get());
        assert_eq!(child.result(), Some(Value::from(7)));
    }

    #[test]
    fn test_non_matching_reaction_is_discarded() {
        let q = queue();
        let (p, r) = Deferred::with_resolvers(q.clone());

        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        p.then(
            None,
            Some(handler(move |e| {
                flag.set(true);
                Ok(e)
            })),
        );

        r.resolve(Value::from(1));
        q.run_to_completion().unwrap();
        assert!(!called.get());
    }
}
