#![forbid(unsafe_code)]

//! Deferred-execution adapter.
//!
//! The primitive needs exactly one capability from its host: run a unit of
//! work later, after the current synchronous call stack has unwound, in FIFO
//! order relative to every other deferred unit. [`Scheduler`] is that seam.
//!
//! [`MicrotaskQueue`] is the reference implementation: an in-memory FIFO
//! that the host drains explicitly. It never runs a task from inside
//! [`defer`](Scheduler::defer), so it can never re-enter the code that
//! scheduled the work.
//!
//! # Invariants
//!
//! 1. Tasks run in the order they were deferred.
//! 2. A task deferred while the queue is draining runs in the same drain,
//!    after every task that was already queued.
//! 3. No borrow of the queue is held while a task runs.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Shared handle to a scheduler, as held by every future.
pub type SchedulerRef = Rc<dyn Scheduler>;

/// "Run this later, after the current turn, in FIFO order."
pub trait Scheduler {
    /// Enqueue `task`. Implementations must not run it before returning.
    fn defer(&self, task: Task);
}

/// Configuration for [`MicrotaskQueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueConfig {
    /// Upper bound on tasks run by a single
    /// [`run_until_idle`](MicrotaskQueue::run_until_idle) call.
    /// `None` drains until the queue is empty. Default: `None`.
    pub turn_budget: Option<usize>,
}

impl QueueConfig {
    #[must_use]
    pub fn with_turn_budget(mut self, budget: usize) -> Self {
        self.turn_budget = Some(budget);
        self
    }
}

/// Result of one [`run_until_idle`](MicrotaskQueue::run_until_idle) call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks executed.
    pub ran: usize,
    /// Whether the drain stopped because the turn budget ran out while
    /// tasks were still queued.
    pub exhausted_budget: bool,
}

/// In-memory FIFO microtask queue.
#[derive(Default)]
pub struct MicrotaskQueue {
    config: QueueConfig,
    tasks: RefCell<VecDeque<Task>>,
}

impl MicrotaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            config,
            tasks: RefCell::new(VecDeque::new()),
        }
    }

    /// Create a queue already wrapped for sharing with futures.
    #[must_use]
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::new())
    }

    /// A type-erased handle to this queue.
    #[must_use]
    pub fn scheduler(self: &Rc<Self>) -> SchedulerRef {
        Rc::clone(self) as SchedulerRef
    }

    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run the oldest task, if any. Returns whether a task ran.
    pub fn run_once(&self) -> bool {
        let next = self.tasks.borrow_mut().pop_front();
        match next {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty or the turn budget is spent.
    pub fn run_until_idle(&self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            if self.config.turn_budget.is_some_and(|budget| report.ran >= budget) {
                report.exhausted_budget = !self.is_idle();
                break;
            }
            if !self.run_once() {
                break;
            }
            report.ran += 1;
        }
        if report.exhausted_budget {
            tracing::debug!(
                ran = report.ran,
                remaining = self.pending(),
                "microtask drain stopped at turn budget"
            );
        } else {
            tracing::trace!(ran = report.ran, "microtask queue idle");
        }
        report
    }
}

impl Scheduler for MicrotaskQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .finish()
    }
}
