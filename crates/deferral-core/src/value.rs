#![forbid(unsafe_code)]

//! The tagged value that flows through settlement and resolution.
//!
//! A [`Value`] is either a primitive, a native [`Future`], or a host-side
//! structured value ([`Object`]) or callable ([`Function`]). Hosts that
//! bridge a scripting layer map their values onto this enum; the primitive
//! never inspects a value beyond the single [`then_member`] probe.
//!
//! # Identity
//!
//! `Object`, `Function` and `Future` are reference types: cloning shares the
//! underlying storage and equality is pointer identity. Primitives and
//! [`TypeError`] compare by content.
//!
//! # Member access
//!
//! Members are either plain data or accessors. An accessor runs host code on
//! every read and may fail with a thrown `Value`, which is how a throwing
//! `then` getter is expressed. Reads never hold a borrow of the member table
//! while host code runs, so accessors and callables may freely mutate the
//! object they belong to.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::TypeError;
use crate::future::Future;

/// Name of the member probed during thenable assimilation.
pub const THEN: &str = "then";

/// Signature of a host callable: `(receiver, args) -> Ok(result) | Err(thrown)`.
pub type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, Value>;

/// Signature of a member accessor: `(receiver) -> Ok(value) | Err(thrown)`.
pub type Getter = dyn Fn(&Value) -> Result<Value, Value>;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Error(TypeError),
    Object(Object),
    Function(Function),
    Future(Future),
}

impl Value {
    /// Whether the value can be invoked.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_future(&self) -> Option<&Future> {
        match self {
            Self::Future(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_error(&self) -> Option<&TypeError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Short type tag, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Error(_) => "error",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Future(_) => "future",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Future(a), Self::Future(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Error(e) => write!(f, "Error({e:?})"),
            Self::Object(o) => fmt::Debug::fmt(o, f),
            Self::Function(func) => fmt::Debug::fmt(func, f),
            Self::Future(fut) => fmt::Debug::fmt(fut, f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<TypeError> for Value {
    fn from(e: TypeError) -> Self {
        Self::Error(e)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Self::Object(o)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

impl From<Future> for Value {
    fn from(f: Future) -> Self {
        Self::Future(f)
    }
}

// ─── Members ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Member {
    Data(Value),
    Accessor(Rc<Getter>),
}

#[derive(Default)]
struct MemberTable {
    entries: RefCell<BTreeMap<Rc<str>, Member>>,
}

impl MemberTable {
    fn insert(&self, key: &str, member: Member) {
        self.entries.borrow_mut().insert(Rc::from(key), member);
    }

    /// Read `key`, running its accessor against `receiver` if it has one.
    /// Absent members read as `Undefined`.
    fn read(&self, key: &str, receiver: &Value) -> Result<Value, Value> {
        // Clone out so the borrow is released before host code runs.
        let member = self.entries.borrow().get(key).cloned();
        match member {
            None => Ok(Value::Undefined),
            Some(Member::Data(v)) => Ok(v),
            Some(Member::Accessor(getter)) => getter(receiver),
        }
    }

    fn keys(&self) -> Vec<Rc<str>> {
        self.entries.borrow().keys().cloned().collect()
    }
}

// ─── Object ──────────────────────────────────────────────────────────────────

/// A shared structured value with named members.
#[derive(Clone, Default)]
pub struct Object {
    members: Rc<MemberTable>,
}

impl Object {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Store a data member.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.members.insert(key, Member::Data(value.into()));
    }

    /// Install an accessor that runs on every read of `key`.
    pub fn define_getter(
        &self,
        key: &str,
        getter: impl Fn(&Value) -> Result<Value, Value> + 'static,
    ) {
        self.members.insert(key, Member::Accessor(Rc::new(getter)));
    }

    /// Read a member. Accessor failures surface as `Err(thrown)`.
    pub fn get(&self, key: &str) -> Result<Value, Value> {
        self.members.read(key, &Value::Object(self.clone()))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.members, &other.members)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("members", &self.members.keys())
            .finish()
    }
}

// ─── Function ────────────────────────────────────────────────────────────────

struct FunctionInner {
    call: Box<NativeFn>,
    members: MemberTable,
}

/// A shared host callable. Like [`Object`], it has its own member table.
#[derive(Clone)]
pub struct Function {
    inner: Rc<FunctionInner>,
}

impl Function {
    pub fn new(call: impl Fn(&Value, &[Value]) -> Result<Value, Value> + 'static) -> Self {
        Self {
            inner: Rc::new(FunctionInner {
                call: Box::new(call),
                members: MemberTable::default(),
            }),
        }
    }

    /// A callable that only looks at its first argument (`Undefined` if
    /// none was passed) and ignores the receiver.
    pub fn unary(call: impl Fn(Value) -> Result<Value, Value> + 'static) -> Self {
        Self::new(move |_, args| call(args.first().cloned().unwrap_or_default()))
    }

    /// Invoke with an explicit receiver.
    pub fn call(&self, receiver: &Value, args: &[Value]) -> Result<Value, Value> {
        (self.inner.call)(receiver, args)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.inner.members.insert(key, Member::Data(value.into()));
    }

    pub fn define_getter(
        &self,
        key: &str,
        getter: impl Fn(&Value) -> Result<Value, Value> + 'static,
    ) {
        self.inner
            .members
            .insert(key, Member::Accessor(Rc::new(getter)));
    }

    pub fn get(&self, key: &str) -> Result<Value, Value> {
        self.inner.members.read(key, &Value::Function(self.clone()))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("members", &self.inner.members.keys())
            .finish_non_exhaustive()
    }
}

// ─── Probe ───────────────────────────────────────────────────────────────────

/// Probe `value` for a `then` member.
///
/// - Primitives and errors: `Ok(None)`.
/// - Objects and functions: the member, or `Ok(None)` when it reads as
///   `Undefined`. A throwing accessor yields `Err(thrown)`.
/// - Native futures: a callable that registers on the future, so a native
///   future handed to foreign code looks like any other thenable.
pub fn then_member(value: &Value) -> Result<Option<Value>, Value> {
    let member = match value {
        Value::Object(o) => o.get(THEN)?,
        Value::Function(f) => f.get(THEN)?,
        Value::Future(fut) => {
            let fut = fut.clone();
            let then = Function::new(move |_, args| {
                let on_fulfilled = args.first().cloned().unwrap_or_default();
                let on_rejected = args.get(1).cloned().unwrap_or_default();
                Ok(Value::Future(fut.then_values(&on_fulfilled, &on_rejected)))
            });
            return Ok(Some(Value::Function(then)));
        }
        _ => return Ok(None),
    };
    Ok(match member {
        Value::Undefined => None,
        other => Some(other),
    })
}
