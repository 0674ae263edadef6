#![forbid(unsafe_code)]

//! End-to-end checks of settlement, registration, and the resolution
//! procedure, driven through the public API only.
//!
//! 1. Single settlement.
//! 2. Self-resolution rejects with a type error.
//! 3. Observers fire in registration order.
//! 4. Late registration fires once, asynchronously.
//! 5. Nested futures unwrap.
//! 6. Foreign thenable double-call guard.
//! 7. Rejection reasons are not assimilated.
//! 8. Thrown initializer rejects.
//! 9. Continuation failure rejects the dependent future.
//! 10. Resolution diagnostics are emitted through `tracing`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use deferral_core::{
    Function, Future, FutureState, MicrotaskQueue, Object, Outcome, SchedulerRef, Settle,
    TypeError, Value,
};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

// ── Helpers ─────────────────────────────────────────────────────────────

fn setup() -> (Rc<MicrotaskQueue>, SchedulerRef) {
    let queue = MicrotaskQueue::shared();
    let scheduler = queue.scheduler();
    (queue, scheduler)
}

/// A pending future plus a handle to its capabilities.
fn deferred(sched: &SchedulerRef) -> (Future, Settle) {
    let slot: Rc<RefCell<Option<Settle>>> = Rc::default();
    let keep = Rc::clone(&slot);
    let future = Future::new(sched, move |s| {
        *keep.borrow_mut() = Some(s);
        Ok(())
    });
    let settle = slot.borrow_mut().take().expect("initializer runs synchronously");
    (future, settle)
}

fn capability(args: &[Value], i: usize) -> Function {
    args[i].as_function().cloned().expect("capability is callable")
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Single settlement
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn settled_future_ignores_further_settlement() {
    let (queue, sched) = setup();
    let (future, settle) = deferred(&sched);

    settle.fulfill(1);
    settle.reject("nope");
    settle.fulfill(2);
    queue.run_until_idle();

    assert_eq!(future.outcome(), Some(Outcome::Fulfilled(Value::from(1))));
}

#[test]
fn rejected_future_ignores_fulfill() {
    let (queue, sched) = setup();
    let (future, settle) = deferred(&sched);

    settle.reject("first");
    settle.fulfill(Future::resolved(&sched, 2));
    queue.run_until_idle();

    assert_eq!(future.reason(), Some(Value::from("first")));
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Self-resolution
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn self_resolution_rejects_and_never_hangs() {
    let (queue, sched) = setup();
    let future = Future::new(&sched, |s| {
        let me = s.future().clone();
        s.fulfill(me);
        Ok(())
    });
    queue.run_until_idle();

    assert_eq!(future.state(), FutureState::Rejected);
    let reason = future.reason().expect("rejected");
    assert_eq!(reason.as_error(), Some(&TypeError::SelfResolution));
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Observer order
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn observers_fire_in_registration_order() {
    let (queue, sched) = setup();
    let (future, settle) = deferred(&sched);
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    for tag in ["A", "B", "C"] {
        let log = Rc::clone(&log);
        let _ = future.then(move |v| {
            log.borrow_mut().push(tag);
            Ok(v)
        });
    }
    settle.fulfill("go");
    queue.run_until_idle();

    assert_eq!(*log.borrow(), vec!["A", "B", "C"]);
}

#[test]
fn mixed_fulfill_and_reject_observers_keep_order() {
    let (queue, sched) = setup();
    let (future, settle) = deferred(&sched);
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let l1 = Rc::clone(&log);
    let _ = future.catch(move |r| {
        l1.borrow_mut().push("catch-1");
        Ok(r)
    });
    let _ = future.then(|v| Ok(v));
    let l2 = Rc::clone(&log);
    let _ = future.catch(move |r| {
        l2.borrow_mut().push("catch-2");
        Ok(r)
    });
    settle.reject("E");
    queue.run_until_idle();

    assert_eq!(*log.borrow(), vec!["catch-1", "catch-2"]);
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Late registration
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn late_registration_fires_exactly_once_after_return() {
    let (queue, sched) = setup();
    let future = Future::resolved(&sched, 5);
    let calls = Rc::new(RefCell::new(0u32));

    let counter = Rc::clone(&calls);
    let dependent = future.then(move |v| {
        *counter.borrow_mut() += 1;
        Ok(v)
    });
    assert_eq!(*calls.borrow(), 0, "must not run before register returns");

    queue.run_until_idle();
    queue.run_until_idle();
    assert_eq!(*calls.borrow(), 1);
    assert_eq!(dependent.value(), Some(Value::from(5)));
}

#[test]
fn registration_from_inside_a_callback_is_deferred() {
    let (queue, sched) = setup();
    let future = Future::resolved(&sched, 1);
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let outer_log = Rc::clone(&log);
    let again = future.clone();
    let _ = future.then(move |v| {
        let inner_log = Rc::clone(&outer_log);
        let _ = again.then(move |v| {
            inner_log.borrow_mut().push("inner");
            Ok(v)
        });
        outer_log.borrow_mut().push("outer-done");
        Ok(v)
    });
    queue.run_until_idle();

    assert_eq!(*log.borrow(), vec!["outer-done", "inner"]);
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Assimilation chain
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn nested_static_resolve_unwraps_to_value() {
    let (queue, sched) = setup();
    let future = Future::resolved(
        &sched,
        Future::resolved(&sched, Future::resolved(&sched, 42)),
    );
    queue.run_until_idle();

    let value = future.value().expect("fulfilled");
    assert_eq!(value, Value::from(42));
    assert!(value.as_future().is_none());
}

#[test]
fn continuation_returning_pending_future_waits_for_it() {
    let (queue, sched) = setup();
    let (inner, settle) = deferred(&sched);
    let inner_for_cb = inner.clone();
    let dependent = Future::resolved(&sched, 1).then(move |_| Ok(inner_for_cb.into()));

    queue.run_until_idle();
    assert!(dependent.is_pending());

    settle.fulfill("inner");
    queue.run_until_idle();
    assert_eq!(dependent.value(), Some(Value::from("inner")));
}

#[test]
fn long_chain_propagates() {
    let (queue, sched) = setup();
    let mut tail = Future::resolved(&sched, 0);
    for _ in 0..100 {
        tail = tail.then(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) + 1.0)));
    }
    queue.run_until_idle();
    assert_eq!(tail.value(), Some(Value::from(100)));
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Foreign thenable double-call guard
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn thenable_resolve_then_reject_fulfills_with_first() {
    let (queue, sched) = setup();
    let thenable = Object::new().with(
        "then",
        Function::new(|_, args| {
            capability(args, 0).call(&Value::Undefined, &[Value::from(1)])?;
            capability(args, 1).call(&Value::Undefined, &[Value::from("err")])
        }),
    );
    let future = Future::resolved(&sched, thenable);
    let rejected = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&rejected);
    let _ = future.catch(move |r| {
        *flag.borrow_mut() = true;
        Ok(r)
    });
    queue.run_until_idle();

    assert_eq!(future.value(), Some(Value::from(1)));
    assert!(!*rejected.borrow());
}

#[test]
fn thenable_returned_from_continuation_is_assimilated() {
    let (queue, sched) = setup();
    let dependent = Future::resolved(&sched, 1).then(|_| {
        Ok(Object::new()
            .with(
                "then",
                Function::new(|_, args| {
                    capability(args, 0).call(&Value::Undefined, &[Value::from("via thenable")])
                }),
            )
            .into())
    });
    queue.run_until_idle();
    assert_eq!(dependent.value(), Some(Value::from("via thenable")));
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Rejection is not assimilated
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn static_reject_keeps_thenable_reason_verbatim() {
    let (queue, sched) = setup();
    let thenable = Object::new().with(
        "then",
        Function::new(|_, args| capability(args, 0).call(&Value::Undefined, &[Value::from(1)])),
    );
    let future = Future::rejected(&sched, thenable.clone());
    queue.run_until_idle();
    assert_eq!(future.reason(), Some(Value::Object(thenable)));
}

#[test]
fn reject_capability_keeps_future_reason_verbatim() {
    let (queue, sched) = setup();
    let (future, settle) = deferred(&sched);
    let reason = Future::resolved(&sched, 1);
    settle.reject(reason.clone());
    queue.run_until_idle();
    assert_eq!(future.reason(), Some(Value::Future(reason)));
}

// ═════════════════════════════════════════════════════════════════════════
// 8. Thrown initializer
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn thrown_initializer_rejects_with_thrown_value() {
    let (_queue, sched) = setup();
    let initializer = Function::new(|_, _| Err(Value::from("E")));
    let future = Future::construct(&sched, &initializer.into()).expect("callable initializer");
    assert_eq!(future.reason(), Some(Value::from("E")));
}

#[test]
fn non_callable_initializer_fails_synchronously() {
    let (queue, sched) = setup();
    let err = Future::construct(&sched, &Object::new().into()).expect_err("not callable");
    assert_eq!(err, TypeError::InitializerNotCallable);
    assert!(queue.is_idle());
}

// ═════════════════════════════════════════════════════════════════════════
// 9. Continuation failure
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn throwing_continuation_rejects_dependent() {
    let (queue, sched) = setup();
    let dependent = Future::resolved(&sched, 1).then(|_| Err(Value::from("E")));
    let recovered = dependent.catch(|r| Ok(r));
    queue.run_until_idle();

    assert_eq!(dependent.reason(), Some(Value::from("E")));
    assert_eq!(recovered.value(), Some(Value::from("E")));
}

#[test]
fn throwing_rejection_handler_rejects_dependent() {
    let (queue, sched) = setup();
    let dependent = Future::rejected(&sched, "first").catch(|_| Err(Value::from("second")));
    queue.run_until_idle();
    assert_eq!(dependent.reason(), Some(Value::from("second")));
}

// ═════════════════════════════════════════════════════════════════════════
// 10. Diagnostics
// ═════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Captured {
    messages: Vec<String>,
    debug: Vec<String>,
}

struct CaptureLayer {
    state: Arc<Mutex<Captured>>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Msg {
            message: Option<String>,
        }
        impl tracing::field::Visit for Msg {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                }
            }
        }
        let mut msg = Msg { message: None };
        event.record(&mut msg);
        if let Some(message) = msg.message {
            let mut state = self.state.lock().expect("capture lock");
            if *event.metadata().level() == tracing::Level::DEBUG {
                state.debug.push(message.clone());
            }
            state.messages.push(message);
        }
    }
}

#[test]
fn self_resolution_and_continuation_failure_are_logged() {
    let state = Arc::new(Mutex::new(Captured::default()));
    let subscriber = tracing_subscriber::registry().with(CaptureLayer {
        state: Arc::clone(&state),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let (queue, sched) = setup();
    let _ = Future::new(&sched, |s| {
        let me = s.future().clone();
        s.fulfill(me);
        Ok(())
    });
    let _ = Future::resolved(&sched, 1).then(|_| Err(Value::from("E")));
    queue.run_until_idle();

    let captured = state.lock().expect("capture lock");
    assert!(
        captured
            .messages
            .iter()
            .any(|m| m.contains("resolved with itself")),
        "expected self-resolution event, got {:?}",
        captured.messages
    );
    assert!(
        captured
            .messages
            .iter()
            .any(|m| m.contains("continuation raised")),
        "expected continuation failure event"
    );
}

#[test]
fn ignored_late_capability_calls_are_logged_at_debug() {
    let state = Arc::new(Mutex::new(Captured::default()));
    let subscriber = tracing_subscriber::registry().with(CaptureLayer {
        state: Arc::clone(&state),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let (queue, sched) = setup();
    let (_future, settle) = deferred(&sched);
    settle.fulfill(1);
    settle.reject("late");

    let thenable = Object::new().with(
        "then",
        Function::new(|_, args| {
            capability(args, 0).call(&Value::Undefined, &[Value::from(1)])?;
            capability(args, 1).call(&Value::Undefined, &[Value::from("late")])
        }),
    );
    let _ = Future::resolved(&sched, thenable);
    queue.run_until_idle();

    let captured = state.lock().expect("capture lock");
    for expected in ["late reject ignored", "thenable reject after latch; ignored"] {
        assert!(
            captured.debug.iter().any(|m| m == expected),
            "expected debug event {expected:?}, got {:?}",
            captured.debug
        );
    }
}
