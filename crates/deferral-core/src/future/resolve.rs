#![forbid(unsafe_code)]

//! The resolution procedure: settle a future's success channel with an
//! arbitrary value, unwrapping anything future-like along the way.
//!
//! Order of checks for `resolve(promise, x)`:
//!
//! 1. `x` is `promise` itself: reject with [`TypeError::SelfResolution`].
//! 2. `x` is a native [`Future`]: adopt its outcome, now or when it settles.
//! 3. `x` exposes a callable `then` member: call it with `x` as receiver and
//!    a fresh `(resolve, reject)` capability pair guarded by one latch.
//! 4. Anything else, including a non-callable `then`: fulfill with `x`.
//!
//! Failures reading or calling `then` become rejections. A failure raised
//! after one of the capabilities already fired is ignored.

use std::cell::Cell;
use std::rc::Rc;

use super::{Future, Outcome};
use crate::error::TypeError;
use crate::value::{Function, Value, then_member};

/// Run the resolution procedure for `promise` with `x`.
pub(crate) fn resolve(promise: &Future, x: Value) {
    if let Value::Future(source) = &x {
        if source.ptr_eq(promise) {
            tracing::debug!(future = promise.id(), "resolved with itself; rejecting");
            promise.settle(Outcome::Rejected(TypeError::SelfResolution.into()));
        } else {
            adopt(promise, source);
        }
        return;
    }

    match then_member(&x) {
        Err(thrown) => {
            tracing::debug!(
                future = promise.id(),
                reason = thrown.kind(),
                "reading `then` raised; rejecting"
            );
            promise.settle(Outcome::Rejected(thrown));
        }
        Ok(Some(Value::Function(then))) => assimilate(promise, x, &then),
        Ok(_) => promise.settle(Outcome::Fulfilled(x)),
    }
}

/// Take on the outcome of another native future.
fn adopt(promise: &Future, source: &Future) {
    match source.outcome() {
        Some(outcome) => promise.settle(outcome),
        None => {
            tracing::trace!(future = promise.id(), source = source.id(), "adopting pending future");
            let on_fulfilled = promise.clone();
            let on_rejected = promise.clone();
            // The dependent future returned here is never observed.
            let _ = source.register(
                Some(Box::new(move |value| {
                    resolve(&on_fulfilled, value);
                    Ok(Value::Undefined)
                })),
                Some(Box::new(move |reason| {
                    on_rejected.settle(Outcome::Rejected(reason));
                    Ok(Value::Undefined)
                })),
            );
        }
    }
}

/// Call a foreign `then` with a latched capability pair.
fn assimilate(promise: &Future, thenable: Value, then: &Function) {
    let latch = Rc::new(Cell::new(false));

    let resolve_promise = {
        let promise = promise.clone();
        let latch = Rc::clone(&latch);
        Function::unary(move |y| {
            if latch.replace(true) {
                tracing::debug!(future = promise.id(), "thenable resolve after latch; ignored");
            } else {
                resolve(&promise, y);
            }
            Ok(Value::Undefined)
        })
    };
    let reject_promise = {
        let promise = promise.clone();
        let latch = Rc::clone(&latch);
        Function::unary(move |r| {
            if latch.replace(true) {
                tracing::debug!(future = promise.id(), "thenable reject after latch; ignored");
            } else {
                promise.settle(Outcome::Rejected(r));
            }
            Ok(Value::Undefined)
        })
    };

    let result = then.call(&thenable, &[resolve_promise.into(), reject_promise.into()]);
    if let Err(thrown) = result {
        if latch.replace(true) {
            tracing::debug!(
                future = promise.id(),
                "thenable raised after settling; ignored"
            );
        } else {
            tracing::debug!(
                future = promise.id(),
                reason = thrown.kind(),
                "calling `then` raised; rejecting"
            );
            promise.settle(Outcome::Rejected(thrown));
        }
    }
}
