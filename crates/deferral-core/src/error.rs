#![forbid(unsafe_code)]

//! Type errors raised by the primitive itself.
//!
//! Everything else that can go wrong at runtime is a thrown [`Value`]
//! carried in a `Result<_, Value>` and ends up as a rejection.
//!
//! [`Value`]: crate::value::Value

use thiserror::Error;

/// Errors the primitive produces on its own account.
///
/// `InitializerNotCallable` is returned synchronously from
/// [`Future::construct`](crate::Future::construct). `SelfResolution` never
/// escapes as an `Err`; it is delivered as the rejection reason of the
/// future that was resolved with itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("a future cannot be resolved with itself")]
    SelfResolution,

    #[error("future initializer is not callable")]
    InitializerNotCallable,
}
