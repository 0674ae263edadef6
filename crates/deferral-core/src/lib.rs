#![forbid(unsafe_code)]

//! Deferred values: a single-threaded future/promise primitive.
//!
//! A [`Future`] holds an outcome that may not exist yet. Consumers attach
//! continuations with [`Future::register`] (or the [`then`](Future::then) /
//! [`catch`](Future::catch) shorthands); each registration returns a new
//! dependent future driven by what the continuation produces.
//!
//! - Settlement is one-shot: the first fulfill or reject wins.
//! - Continuations run exactly once, in registration order, always on a
//!   later turn of the injected [`Scheduler`], never inline.
//! - Fulfilling with another future, or with any host value exposing a
//!   callable `then` member, adopts that value's eventual outcome.
//! - Rejection reasons are stored verbatim and never unwrapped.
//!
//! Failures inside continuations, initializers, or foreign `then` members
//! become rejections of the nearest future. The only error returned to a
//! caller is [`TypeError::InitializerNotCallable`] from
//! [`Future::construct`].
//!
//! # Example
//!
//! ```
//! use deferral_core::{Future, MicrotaskQueue, Value};
//!
//! let queue = MicrotaskQueue::shared();
//! let scheduler = queue.scheduler();
//!
//! let doubled = Future::resolved(&scheduler, 21)
//!     .then(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) * 2.0)));
//! assert!(doubled.is_pending());
//!
//! queue.run_until_idle();
//! assert_eq!(doubled.value(), Some(Value::from(42)));
//! ```

pub mod error;
pub mod future;
pub mod scheduler;
pub mod value;

pub use error::TypeError;
pub use future::{Callback, Future, FutureState, Outcome, Settle};
pub use scheduler::{DrainReport, MicrotaskQueue, QueueConfig, Scheduler, SchedulerRef, Task};
pub use value::{Function, Object, Value, then_member};
