#![forbid(unsafe_code)]

//! The settleable future and its continuation registry.
//!
//! # Design
//!
//! [`Future`] is a cheap, cloneable handle to `Rc`-shared storage. The
//! storage is a single [`Slot`] that is either `Pending(observers)` or
//! `Settled(outcome)`, so "observers exist only while pending" holds by
//! construction rather than by bookkeeping.
//!
//! Settlement swaps the slot to `Settled` and drains the observer list in
//! one pass. Every drained continuation, and every registration against an
//! already-settled future, is handed to the [`Scheduler`](crate::Scheduler)
//! as its own task. Callbacks therefore never run inside `register`, inside
//! a settlement call, or inside another callback.
//!
//! # Invariants
//!
//! 1. A future leaves `Pending` at most once; later settlement attempts are
//!    no-ops.
//! 2. Observers are never appended to or read after settlement.
//! 3. Each registered continuation is dispatched exactly once, in
//!    registration order.
//! 4. No borrow of the slot is held while host code runs.
//!
//! # Failure Modes
//!
//! - **Callback returns `Err`**: the dependent future is rejected with the
//!   thrown value. Nothing reaches the scheduler.
//! - **Initializer returns `Err`**: the future is rejected unless it has
//!   already settled. A future still adopting another one counts as pending.
//! - **Unobserved rejection**: silently kept; reporting it is the host's job.

mod resolve;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TypeError;
use crate::scheduler::SchedulerRef;
use crate::value::{Function, Value};

pub(crate) use resolve::resolve;

static NEXT_FUTURE_ID: AtomicU64 = AtomicU64::new(1);

fn next_future_id() -> u64 {
    NEXT_FUTURE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A continuation callback. `Ok` feeds the dependent future's resolution
/// procedure, `Err` rejects it.
pub type Callback = Box<dyn FnOnce(Value) -> Result<Value, Value>>;

/// Lifecycle state of a [`Future`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for FutureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Fulfilled => f.write_str("fulfilled"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// The final result of a settled future.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Fulfilled(Value),
    Rejected(Value),
}

impl Outcome {
    #[must_use]
    pub fn state(&self) -> FutureState {
        match self {
            Self::Fulfilled(_) => FutureState::Fulfilled,
            Self::Rejected(_) => FutureState::Rejected,
        }
    }
}

/// One `register` call: the dependent future plus its callbacks.
struct Continuation {
    dependent: Future,
    on_fulfilled: Option<Callback>,
    on_rejected: Option<Callback>,
}

enum Slot {
    Pending(Vec<Continuation>),
    Settled(Outcome),
}

struct FutureInner {
    id: u64,
    scheduler: SchedulerRef,
    slot: RefCell<Slot>,
}

/// A value or failure that may not be available yet.
///
/// Cloning a `Future` creates a new handle to the **same** state.
#[derive(Clone)]
pub struct Future {
    inner: Rc<FutureInner>,
}

impl Future {
    // ── Constructors ─────────────────────────────────────────────────

    fn pending(scheduler: &SchedulerRef) -> Self {
        Self::with_slot(scheduler, Slot::Pending(Vec::new()))
    }

    fn with_slot(scheduler: &SchedulerRef, slot: Slot) -> Self {
        Self {
            inner: Rc::new(FutureInner {
                id: next_future_id(),
                scheduler: Rc::clone(scheduler),
                slot: RefCell::new(slot),
            }),
        }
    }

    /// Create a pending future and run `initializer` synchronously with
    /// its settle capabilities.
    ///
    /// If the initializer returns `Err(thrown)` while the future is still
    /// pending, the future is rejected with `thrown`.
    pub fn new(
        scheduler: &SchedulerRef,
        initializer: impl FnOnce(Settle) -> Result<(), Value>,
    ) -> Self {
        let future = Self::pending(scheduler);
        let settle = Settle::new(future.clone());
        if let Err(thrown) = initializer(settle) {
            if future.is_pending() {
                tracing::debug!(
                    future = future.id(),
                    reason = thrown.kind(),
                    "initializer raised; rejecting"
                );
                future.settle(Outcome::Rejected(thrown));
            } else {
                tracing::debug!(
                    future = future.id(),
                    "initializer raised after settling; ignored"
                );
            }
        }
        future
    }

    /// Construct from a host value. The initializer is called with `Undefined`
    /// as receiver and the two settle capabilities as [`Function`]s.
    ///
    /// # Errors
    ///
    /// [`TypeError::InitializerNotCallable`] if `initializer` is not a
    /// function. No future is created in that case.
    pub fn construct(scheduler: &SchedulerRef, initializer: &Value) -> Result<Self, TypeError> {
        let Some(initializer) = initializer.as_function().cloned() else {
            return Err(TypeError::InitializerNotCallable);
        };
        Ok(Self::new(scheduler, move |settle| {
            let (fulfill, reject) = settle.into_functions();
            initializer
                .call(&Value::Undefined, &[fulfill.into(), reject.into()])
                .map(drop)
        }))
    }

    /// A future run through the resolution procedure with `value`.
    ///
    /// Passing another future yields a new future that adopts its outcome.
    pub fn resolved(scheduler: &SchedulerRef, value: impl Into<Value>) -> Self {
        let future = Self::pending(scheduler);
        resolve(&future, value.into());
        future
    }

    /// A future already rejected with `reason`. The reason is stored as-is,
    /// even if it is thenable.
    pub fn rejected(scheduler: &SchedulerRef, reason: impl Into<Value>) -> Self {
        Self::with_slot(scheduler, Slot::Settled(Outcome::Rejected(reason.into())))
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Attach callbacks and return the dependent future they drive.
    ///
    /// An absent callback passes the outcome through unchanged. The decision
    /// to dispatch is made here; the callback itself always runs on a later
    /// scheduler turn.
    pub fn register(&self, on_fulfilled: Option<Callback>, on_rejected: Option<Callback>) -> Self {
        let dependent = Self::pending(&self.inner.scheduler);
        let continuation = Continuation {
            dependent: dependent.clone(),
            on_fulfilled,
            on_rejected,
        };

        let outcome = {
            let mut slot = self.inner.slot.borrow_mut();
            match &mut *slot {
                Slot::Pending(observers) => {
                    observers.push(continuation);
                    return dependent;
                }
                Slot::Settled(outcome) => outcome.clone(),
            }
        };
        self.dispatch(outcome, continuation);
        dependent
    }

    /// Register a fulfillment callback; rejections pass through.
    pub fn then(&self, on_fulfilled: impl FnOnce(Value) -> Result<Value, Value> + 'static) -> Self {
        self.register(Some(Box::new(on_fulfilled)), None)
    }

    /// Register a rejection callback; fulfillments pass through.
    pub fn catch(&self, on_rejected: impl FnOnce(Value) -> Result<Value, Value> + 'static) -> Self {
        self.register(None, Some(Box::new(on_rejected)))
    }

    /// Register host callbacks. Non-callable arguments count as absent.
    pub fn then_values(&self, on_fulfilled: &Value, on_rejected: &Value) -> Self {
        self.register(host_callback(on_fulfilled), host_callback(on_rejected))
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// Process-unique id, for diagnostics only.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn state(&self) -> FutureState {
        match &*self.inner.slot.borrow() {
            Slot::Pending(_) => FutureState::Pending,
            Slot::Settled(outcome) => outcome.state(),
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == FutureState::Pending
    }

    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        match &*self.inner.slot.borrow() {
            Slot::Pending(_) => None,
            Slot::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// The fulfillment value, if fulfilled.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        match self.outcome() {
            Some(Outcome::Fulfilled(v)) => Some(v),
            _ => None,
        }
    }

    /// The rejection reason, if rejected.
    #[must_use]
    pub fn reason(&self) -> Option<Value> {
        match self.outcome() {
            Some(Outcome::Rejected(r)) => Some(r),
            _ => None,
        }
    }

    /// Continuations waiting for settlement. Always 0 once settled.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        match &*self.inner.slot.borrow() {
            Slot::Pending(observers) => observers.len(),
            Slot::Settled(_) => 0,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &SchedulerRef {
        &self.inner.scheduler
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Settlement ───────────────────────────────────────────────────

    /// Terminal transition out of `Pending`. No-op when already settled.
    pub(crate) fn settle(&self, outcome: Outcome) {
        let observers = {
            let mut slot = self.inner.slot.borrow_mut();
            let Slot::Pending(observers) = &mut *slot else {
                tracing::trace!(future = self.id(), "already settled; ignoring");
                return;
            };
            let observers = std::mem::take(observers);
            *slot = Slot::Settled(outcome.clone());
            observers
        };
        tracing::trace!(
            future = self.id(),
            state = %outcome.state(),
            observers = observers.len(),
            "settled"
        );
        for continuation in observers {
            self.dispatch(outcome.clone(), continuation);
        }
    }

    /// Schedule one continuation against a known outcome.
    fn dispatch(&self, outcome: Outcome, continuation: Continuation) {
        let Continuation {
            dependent,
            on_fulfilled,
            on_rejected,
        } = continuation;
        let source = self.id();
        tracing::trace!(future = source, dependent = dependent.id(), "dispatch scheduled");

        self.inner.scheduler.defer(Box::new(move || {
            let (callback, result) = match outcome {
                Outcome::Fulfilled(value) => match on_fulfilled {
                    Some(cb) => (true, cb(value)),
                    None => (false, Ok(value)),
                },
                Outcome::Rejected(reason) => match on_rejected {
                    Some(cb) => (true, cb(reason)),
                    None => (false, Err(reason)),
                },
            };
            match result {
                Ok(value) => resolve(&dependent, value),
                Err(reason) => {
                    if callback {
                        tracing::debug!(
                            future = source,
                            dependent = dependent.id(),
                            reason = reason.kind(),
                            "continuation raised"
                        );
                    }
                    dependent.settle(Outcome::Rejected(reason));
                }
            }
        }));
    }
}

impl fmt::Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Future");
        s.field("id", &self.inner.id);
        match self.inner.slot.try_borrow() {
            Ok(slot) => match &*slot {
                Slot::Pending(observers) => s
                    .field("state", &FutureState::Pending)
                    .field("observers", &observers.len()),
                Slot::Settled(Outcome::Fulfilled(v)) => {
                    s.field("state", &FutureState::Fulfilled).field("value", v)
                }
                Slot::Settled(Outcome::Rejected(r)) => {
                    s.field("state", &FutureState::Rejected).field("reason", r)
                }
            },
            Err(_) => s.field("state", &"<borrowed>"),
        };
        s.finish()
    }
}

fn host_callback(value: &Value) -> Option<Callback> {
    let function = value.as_function()?.clone();
    Some(Box::new(move |arg| function.call(&Value::Undefined, &[arg])))
}

// ─── Settle capabilities ─────────────────────────────────────────────────────

/// The fulfill/reject pair handed to an initializer.
///
/// Calls are honoured for as long as the future is pending. A `fulfill`
/// that starts adopting another future leaves it pending, so a later
/// `reject` still decides the outcome. Once settled, every call is ignored.
#[derive(Clone)]
pub struct Settle {
    future: Future,
}

impl Settle {
    fn new(future: Future) -> Self {
        Self { future }
    }

    /// Run the resolution procedure with `value`.
    pub fn fulfill(&self, value: impl Into<Value>) {
        if self.future.is_pending() {
            resolve(&self.future, value.into());
        } else {
            tracing::debug!(future = self.future.id(), "late fulfill ignored");
        }
    }

    /// Reject with `reason`, without inspecting it.
    pub fn reject(&self, reason: impl Into<Value>) {
        if self.future.is_pending() {
            self.future.settle(Outcome::Rejected(reason.into()));
        } else {
            tracing::debug!(future = self.future.id(), "late reject ignored");
        }
    }

    /// The future these capabilities settle.
    #[must_use]
    pub fn future(&self) -> &Future {
        &self.future
    }

    /// Expose the pair as host functions taking one argument each.
    #[must_use]
    pub fn into_functions(self) -> (Function, Function) {
        let fulfill = {
            let settle = self.clone();
            Function::unary(move |value| {
                settle.fulfill(value);
                Ok(Value::Undefined)
            })
        };
        let reject = Function::unary(move |reason| {
            self.reject(reason);
            Ok(Value::Undefined)
        });
        (fulfill, reject)
    }
}

impl fmt::Debug for Settle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settle")
            .field("future", &self.future.id())
            .field("state", &self.future.state())
            .finish()
    }
}
