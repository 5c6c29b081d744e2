//! Combinators
//!
//! Aggregate operations that compose many deferred values into one. All of
//! them are built purely on the settlement core and the chaining engine:
//! each input is subscribed through `then`, and first-settlement-wins on
//! the output promise does the rest.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{handler, Deferred};
use crate::task_queue::Schedule;
use crate::value::Value;

impl Deferred {
    /// Lift a value into a fulfilled promise.
    ///
    /// A value that already is a promise is returned as-is, the exact same
    /// instance; nothing is wrapped or re-settled.
    pub fn resolve(queue: Rc<dyn Schedule>, value: Value) -> Deferred {
        if let Value::Promise(existing) = value {
            return existing;
        }
        let (promise, resolver) = Deferred::with_resolvers(queue);
        resolver.resolve(value);
        promise
    }

    /// Create a promise immediately rejected with `reason`
    pub fn reject(queue: Rc<dyn Schedule>, reason: Value) -> Deferred {
        let (promise, resolver) = Deferred::with_resolvers(queue);
        resolver.reject(reason);
        promise
    }

    /// Settle with the outcome of whichever input settles first, fulfilled
    /// or rejected. Later settlements of the other inputs are observed and
    /// ignored; nothing cancels the losers. With no inputs the result
    /// stays pending forever.
    pub fn race(queue: Rc<dyn Schedule>, inputs: Vec<Deferred>) -> Deferred {
        let (promise, resolver) = Deferred::with_resolvers(queue);

        for input in &inputs {
            let on_win = {
                let resolver = resolver.clone();
                handler(move |value| {
                    resolver.resolve(value);
                    Ok(Value::Undefined)
                })
            };
            let on_lose = {
                let resolver = resolver.clone();
                handler(move |reason| {
                    resolver.reject(reason);
                    Ok(Value::Undefined)
                })
            };
            input.then(Some(on_win), Some(on_lose));
        }
        promise
    }

    /// Fulfill with a list of every input's result, positionally aligned
    /// with `inputs`, once all of them fulfill; reject with the first
    /// rejection reason observed. An empty input list fulfills immediately
    /// with the empty list.
    ///
    /// Each input records into its own slot, so completion is independent
    /// of arrival order.
    pub fn all(queue: Rc<dyn Schedule>, inputs: Vec<Deferred>) -> Deferred {
        let (promise, resolver) = Deferred::with_resolvers(queue);
        if inputs.is_empty() {
            resolver.resolve(Value::List(Vec::new()));
            return promise;
        }

        let slots: Rc<RefCell<Vec<Option<Value>>>> =
            Rc::new(RefCell::new(vec![None; inputs.len()]));
        let remaining = Rc::new(Cell::new(inputs.len()));

        for (i, input) in inputs.iter().enumerate() {
            let on_fulfilled = {
                let slots = slots.clone();
                let remaining = remaining.clone();
                let resolver = resolver.clone();
                handler(move |value| {
                    slots.borrow_mut()[i] = Some(value);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let results: Vec<Value> = slots
                            .borrow_mut()
                            .iter_mut()
                            .map(|slot| slot.take().unwrap_or(Value::Undefined))
                            .collect();
                        resolver.resolve(Value::List(results));
                    }
                    Ok(Value::Undefined)
                })
            };
            let on_rejected = {
                let resolver = resolver.clone();
                handler(move |reason| {
                    resolver.reject(reason);
                    Ok(Value::Undefined)
                })
            };
            input.then(Some(on_fulfilled), Some(on_rejected));
        }
        promise
    }
}
