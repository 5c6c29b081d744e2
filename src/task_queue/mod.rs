//! Task Queue
//!
//! The deferred-callback facility the promise core schedules through: "run
//! this callback after the current synchronous turn, in FIFO order, without
//! blocking". The core only depends on the [`Schedule`] trait, so any host
//! facility can be injected; [`TaskQueue`] is the shipped implementation, a
//! deterministic single-threaded queue with virtual-time delayed tasks.
//!
//! Time never passes on its own. Immediate tasks run when the queue is
//! drained; delayed tasks become ready when virtual time is advanced, either
//! explicitly via [`TaskQueue::advance_time`] or automatically by
//! [`TaskQueue::run_to_completion`].

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// A deferred callback
pub type Task = Box<dyn FnOnce()>;

/// The scheduling seam between the promise core and its host.
///
/// Implementations must run scheduled tasks strictly after the current
/// synchronous turn, in FIFO order.
pub trait Schedule {
    /// Enqueue a callback to run later
    fn schedule(&self, task: Task);
}

/// A task waiting on virtual time
struct DelayedTask {
    /// Unique timer ID
    id: u64,
    /// When the task should fire (virtual time in ms)
    fire_at: u64,
    /// Is this task cancelled?
    cancelled: bool,
    /// The callback to run
    task: Task,
}

/// Result of running the queue to completion via `run_to_completion()`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    /// Total number of immediate tasks that were dequeued and run
    pub tasks_processed: usize,
    /// Total number of delayed tasks promoted to the ready queue
    pub timers_fired: usize,
    /// Number of drain iterations (each iteration = one budgeted drain pass)
    pub iterations: usize,
    /// The virtual time when the queue went idle
    pub final_time: u64,
}

/// Runtime statistics for the task queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total immediate tasks scheduled
    pub tasks_scheduled: u64,
    /// Total tasks run across all drains
    pub tasks_run: u64,
    /// Total delayed tasks scheduled
    pub timers_scheduled: u64,
    /// Total delayed tasks cancelled before firing
    pub timers_cancelled: u64,
    /// Total drain passes
    pub drains: u64,
    /// Maximum tasks run in a single drain pass
    pub max_tasks_per_drain: u64,
}

/// The deterministic FIFO task queue
pub struct TaskQueue {
    /// Immediate tasks, ready to run on the next drain
    ready: RefCell<VecDeque<Task>>,
    /// Delayed tasks waiting on virtual time
    delayed: RefCell<Vec<DelayedTask>>,
    /// Current virtual time in milliseconds
    virtual_time: Cell<u64>,
    /// Next timer ID
    next_timer_id: Cell<u64>,
    /// Maximum tasks to run per drain pass (starvation protection)
    task_budget: Cell<usize>,
    /// Is a drain currently in progress?
    draining: Cell<bool>,
    /// Runtime statistics
    stats: RefCell<QueueStats>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Create a new, empty task queue at virtual time zero
    pub fn new() -> Self {
        Self {
            ready: RefCell::new(VecDeque::new()),
            delayed: RefCell::new(Vec::new()),
            virtual_time: Cell::new(0),
            next_timer_id: Cell::new(1),
            task_budget: Cell::new(10_000),
            draining: Cell::new(false),
            stats: RefCell::new(QueueStats::default()),
        }
    }

    /// Enqueue an immediate task
    pub fn enqueue(&self, task: Task) {
        self.ready.borrow_mut().push_back(task);
        self.stats.borrow_mut().tasks_scheduled += 1;
        trace!(pending = self.ready.borrow().len(), "task scheduled");
    }

    /// Schedule a task to fire once `delay_ms` of virtual time has passed.
    /// Returns a timer ID usable with [`TaskQueue::cancel`].
    pub fn schedule_delayed(&self, task: Task, delay_ms: u64) -> u64 {
        let id = self.next_timer_id.get();
        self.next_timer_id.set(id + 1);

        let fire_at = self.virtual_time.get() + delay_ms;
        self.delayed.borrow_mut().push(DelayedTask {
            id,
            fire_at,
            cancelled: false,
            task,
        });
        self.stats.borrow_mut().timers_scheduled += 1;
        trace!(id, fire_at, "delayed task scheduled");
        id
    }

    /// Cancel a delayed task by ID. Returns `true` if the task was still
    /// waiting; a task that already fired (or was already cancelled) cannot
    /// be cancelled and yields `false`.
    pub fn cancel(&self, id: u64) -> bool {
        for entry in self.delayed.borrow_mut().iter_mut() {
            if entry.id == id && !entry.cancelled {
                entry.cancelled = true;
                self.stats.borrow_mut().timers_cancelled += 1;
                return true;
            }
        }
        false
    }

    /// Get current virtual time
    pub fn current_time(&self) -> u64 {
        self.virtual_time.get()
    }

    /// Advance virtual time, promoting any delayed tasks that come due
    pub fn advance_time(&self, ms: u64) {
        self.virtual_time.set(self.virtual_time.get() + ms);
        self.promote_due();
    }

    /// Check if there are tasks ready to run
    pub fn has_ready_tasks(&self) -> bool {
        !self.ready.borrow().is_empty()
    }

    /// Check if the queue has any pending work, immediate or delayed
    pub fn has_pending_work(&self) -> bool {
        self.has_ready_tasks() || self.next_fire_time().is_some()
    }

    /// Number of immediate tasks waiting to run
    pub fn pending_task_count(&self) -> usize {
        self.ready.borrow().len()
    }

    /// Number of delayed tasks still waiting to fire
    pub fn pending_timer_count(&self) -> usize {
        self.delayed.borrow().iter().filter(|t| !t.cancelled).count()
    }

    /// The virtual time of the next delayed task, if any
    pub fn next_fire_time(&self) -> Option<u64> {
        self.delayed
            .borrow()
            .iter()
            .filter(|t| !t.cancelled)
            .map(|t| t.fire_at)
            .min()
    }

    /// Move every due, non-cancelled delayed task into the ready queue, in
    /// fire-time order (ties broken by scheduling order). Cancelled entries
    /// are discarded as they are encountered. Returns the number promoted.
    fn promote_due(&self) -> usize {
        let now = self.virtual_time.get();
        let mut due = Vec::new();
        {
            let mut delayed = self.delayed.borrow_mut();
            let mut i = 0;
            while i < delayed.len() {
                if delayed[i].cancelled {
                    delayed.remove(i);
                } else if delayed[i].fire_at <= now {
                    due.push(delayed.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        due.sort_by_key(|t| (t.fire_at, t.id));

        let count = due.len();
        let mut ready = self.ready.borrow_mut();
        for entry in due {
            ready.push_back(entry.task);
        }
        count
    }

    /// Run ready tasks until the queue is empty or the per-drain budget is
    /// hit. Tasks scheduled while draining run in the same pass, budget
    /// permitting. Returns the number of tasks run.
    ///
    /// Calling this from inside a task is re-entrant draining and is
    /// reported as [`Error::ReentrantDrain`].
    pub fn drain_ready(&self) -> Result<usize> {
        if self.draining.get() {
            return Err(Error::ReentrantDrain);
        }
        self.draining.set(true);

        let budget = self.task_budget.get();
        let mut ran = 0;
        while ran < budget {
            // The borrow must end before the task runs; tasks re-enter the
            // queue to schedule their successors.
            let next = self.ready.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }

        self.draining.set(false);

        let mut stats = self.stats.borrow_mut();
        stats.tasks_run += ran as u64;
        stats.drains += 1;
        if ran as u64 > stats.max_tasks_per_drain {
            stats.max_tasks_per_drain = ran as u64;
        }
        drop(stats);

        debug!(ran, remaining = self.ready.borrow().len(), "drained ready tasks");
        Ok(ran)
    }

    /// Run the queue until no work remains:
    ///   1. Drain ready tasks (budget-bounded, repeating until empty)
    ///   2. If a delayed task exists, advance virtual time to it
    ///   3. Repeat from step 1
    ///
    /// Promises that never settle leave no work here; a chain waiting on
    /// one simply stays pending after this returns.
    pub fn run_to_completion(&self) -> Result<RunResult> {
        let mut result = RunResult::default();

        loop {
            let ran = self.drain_ready()?;
            result.tasks_processed += ran;
            result.iterations += 1;

            if self.has_ready_tasks() {
                // Budget cut the pass short; keep draining.
                continue;
            }

            match self.next_fire_time() {
                Some(fire_at) => {
                    self.virtual_time.set(fire_at);
                    result.timers_fired += self.promote_due();
                }
                None => break,
            }
        }

        result.final_time = self.virtual_time.get();
        Ok(result)
    }

    /// Set the maximum number of tasks to run per drain pass
    pub fn set_task_budget(&self, limit: usize) {
        self.task_budget.set(limit);
    }

    /// Get the current per-drain task budget
    pub fn task_budget(&self) -> usize {
        self.task_budget.get()
    }

    /// Get a snapshot of the current queue statistics
    pub fn stats(&self) -> QueueStats {
        self.stats.borrow().clone()
    }

    /// Reset all queue statistics to zero
    pub fn reset_stats(&self) {
        *self.stats.borrow_mut() = QueueStats::default();
    }
}

impl Schedule for TaskQueue {
    fn schedule(&self, task: Task) {
        self.enqueue(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_queue_creation() {
        let queue = TaskQueue::new();
        assert_eq!(queue.current_time(), 0);
        assert!(!queue.has_pending_work());
    }

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let queue = TaskQueue::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            queue.enqueue(Box::new(move || order.borrow_mut().push(i)));
        }
        queue.drain_ready().unwrap();

        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_task_scheduled_while_draining_runs_in_same_pass() {
        let queue = Rc::new(TaskQueue::new());
        let order = Rc::new(RefCell::new(Vec::new()));

        let inner_order = order.clone();
        let inner_queue = queue.clone();
        queue.enqueue(Box::new(move || {
            inner_order.borrow_mut().push("first");
            let order = inner_order.clone();
            inner_queue.enqueue(Box::new(move || order.borrow_mut().push("second")));
        }));

        let ran = queue.drain_ready().unwrap();
        assert_eq!(ran, 2);
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_delayed_task_waits_for_virtual_time() {
        let queue = TaskQueue::new();
        let fired = Rc::new(Cell::new(false));

        let flag = fired.clone();
        queue.schedule_delayed(Box::new(move || flag.set(true)), 100);

        queue.drain_ready().unwrap();
        assert!(!fired.get());

        queue.advance_time(99);
        queue.drain_ready().unwrap();
        assert!(!fired.get());

        queue.advance_time(1);
        queue.drain_ready().unwrap();
        assert!(fired.get());
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let queue = TaskQueue::new();
        let fired = Rc::new(Cell::new(false));

        let flag = fired.clone();
        let id = queue.schedule_delayed(Box::new(move || flag.set(true)), 50);
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));

        queue.advance_time(50);
        queue.drain_ready().unwrap();
        assert!(!fired.get());
    }

    #[test]
    fn test_budget_bounds_a_single_drain() {
        let queue = TaskQueue::new();
        let count = Rc::new(Cell::new(0u32));

        queue.set_task_budget(2);
        for _ in 0..5 {
            let count = count.clone();
            queue.enqueue(Box::new(move || count.set(count.get() + 1)));
        }

        assert_eq!(queue.drain_ready().unwrap(), 2);
        assert_eq!(count.get(), 2);
        assert_eq!(queue.pending_task_count(), 3);
    }

    #[test]
    fn test_run_to_completion_interleaves_timers() {
        let queue = TaskQueue::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let late = order.clone();
        queue.schedule_delayed(Box::new(move || late.borrow_mut().push("late")), 20);
        let early = order.clone();
        queue.schedule_delayed(Box::new(move || early.borrow_mut().push("early")), 10);
        let now = order.clone();
        queue.enqueue(Box::new(move || now.borrow_mut().push("now")));

        let result = queue.run_to_completion().unwrap();
        assert_eq!(*order.borrow(), vec!["now", "early", "late"]);
        assert_eq!(result.tasks_processed, 3);
        assert_eq!(result.timers_fired, 2);
        assert_eq!(result.final_time, 20);
    }

    #[test]
    fn test_stats_track_scheduling_and_drains() {
        let queue = TaskQueue::new();
        queue.enqueue(Box::new(|| {}));
        queue.enqueue(Box::new(|| {}));
        queue.schedule_delayed(Box::new(|| {}), 5);
        queue.run_to_completion().unwrap();

        let stats = queue.stats();
        assert_eq!(stats.tasks_scheduled, 2);
        assert_eq!(stats.tasks_run, 3);
        assert_eq!(stats.timers_scheduled, 1);
        assert!(stats.drains >= 1);

        queue.reset_stats();
        assert_eq!(queue.stats().tasks_run, 0);
    }
}
