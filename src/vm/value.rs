//! Runtime values manipulated by the VM.
//!
//! Values are shared between concurrently running tasks, so every heap
//! object is reference counted with `Arc` and mutable containers sit behind
//! an `RwLock`. Reference cycles are never collected.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};

use crossbeam::channel::{self, Receiver, Sender};
use indexmap::IndexMap;

use crate::error::RuntimeError;

use super::chunk::{ClassDef, CompiledFunction, Constant};
use super::vm::Vm;

/// Signature of a host function callable from scripts.
pub type BuiltinFn = fn(&mut Vm, Vec<Value>) -> Result<Value, RuntimeError>;

/// Hashable subset of values, used as map keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashKey {
    Int(i64),
    String(String),
    Bool(bool),
    Null,
}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            HashKey::Int(n) => n.hash(state),
            HashKey::String(s) => s.hash(state),
            HashKey::Bool(b) => b.hash(state),
            HashKey::Null => {}
        }
    }
}

impl HashKey {
    /// Convert a Value to a HashKey if possible.
    pub fn from_value(value: &Value) -> Option<HashKey> {
        match value {
            Value::Int(n) => Some(HashKey::Int(*n)),
            Value::String(s) => Some(HashKey::String(s.clone())),
            Value::Bool(b) => Some(HashKey::Bool(*b)),
            Value::Null => Some(HashKey::Null),
            // Floats are not hashable due to NaN != NaN issues
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            HashKey::Int(n) => Value::Int(*n),
            HashKey::String(s) => Value::String(s.clone()),
            HashKey::Bool(b) => Value::Bool(*b),
            HashKey::Null => Value::Null,
        }
    }
}

/// Globals and constants a closure runs against. Shared by every task
/// spawned from the same program.
#[derive(Debug)]
pub struct Environment {
    pub constants: Arc<[Constant]>,
    pub globals: RwLock<Vec<Value>>,
}

impl Environment {
    pub fn new(constants: Vec<Constant>, num_globals: usize) -> Self {
        Self {
            constants: constants.into(),
            globals: RwLock::new(vec![Value::Null; num_globals]),
        }
    }
}

/// A compiled function together with the values it captured.
pub struct Closure {
    pub function: Arc<CompiledFunction>,
    /// Captured values, fixed at creation.
    pub free: Vec<Value>,
    pub env: Arc<Environment>,
}

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

/// A struct instance: fields in declaration order.
#[derive(Debug, Clone)]
pub struct Instance {
    pub class: Arc<ClassDef>,
    pub fields: IndexMap<String, Value>,
}

/// A bounded blocking queue. Script-created channels carry both ends;
/// the result channel of a spawned task is receive-only so that it
/// disconnects when the task dies without a result.
#[derive(Clone)]
pub struct Channel {
    pub sender: Option<Sender<Value>>,
    pub receiver: Receiver<Value>,
    pub capacity: usize,
}

impl Channel {
    /// Capacity 0 is a pure rendezvous: every send waits for a receiver.
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender: Some(sender),
            receiver,
            capacity,
        }
    }

    pub fn receive_only(receiver: Receiver<Value>, capacity: usize) -> Self {
        Self {
            sender: None,
            receiver,
            capacity,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PromiseState {
    Pending,
    Resolved(Value),
    Rejected(Value),
}

/// Result slot of a cooperative task.
pub type Promise = Arc<Mutex<PromiseState>>;

pub fn new_promise() -> Promise {
    Arc::new(Mutex::new(PromiseState::Pending))
}

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
    Array(Arc<RwLock<Vec<Value>>>),
    /// Hash/Map value (ordered, O(1) lookup using IndexMap)
    Hash(Arc<RwLock<IndexMap<HashKey, Value>>>),
    Closure(Arc<Closure>),
    Builtin(Builtin),
    Class(Arc<ClassDef>),
    Instance(Arc<RwLock<Instance>>),
    Channel(Channel),
    Promise(Promise),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn hash(entries: IndexMap<HashKey, Value>) -> Value {
        Value::Hash(Arc::new(RwLock::new(entries)))
    }

    /// Value of a scalar or struct constant. Function constants only become
    /// values through the `Closure` instruction.
    pub fn from_constant(constant: &Constant) -> Option<Value> {
        match constant {
            Constant::Int(n) => Some(Value::Int(*n)),
            Constant::Float(n) => Some(Value::Float(*n)),
            Constant::String(s) => Some(Value::String(s.clone())),
            Constant::Class(class) => Some(Value::Class(Arc::new(class.clone()))),
            Constant::Function(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::Array(_) => "array",
            Value::Hash(_) => "map",
            Value::Closure(_) | Value::Builtin(_) => "function",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::Channel(_) => "channel",
            Value::Promise(_) => "promise",
        }
    }

    /// Only `null` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    /// Language-level `==`: numeric across int/float, by content for
    /// scalars, by identity for heap objects.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Arc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Channel(a), Value::Channel(b)) => a.receiver.same_channel(&b.receiver),
            (Value::Promise(a), Value::Promise(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_value(f, &mut Vec::new(), false)
    }
}

impl Value {
    /// Identity of the shared container behind a value, if it has one.
    fn container_id(&self) -> Option<usize> {
        match self {
            Value::Array(items) => Some(Arc::as_ptr(items) as *const () as usize),
            Value::Hash(entries) => Some(Arc::as_ptr(entries) as *const () as usize),
            Value::Instance(instance) => Some(Arc::as_ptr(instance) as *const () as usize),
            Value::Promise(promise) => Some(Arc::as_ptr(promise) as *const () as usize),
            _ => None,
        }
    }

    /// Render `self`. `open` holds the containers currently being written;
    /// meeting one of them again prints a placeholder instead of recursing.
    fn write_value(
        &self,
        f: &mut fmt::Formatter<'_>,
        open: &mut Vec<usize>,
        nested: bool,
    ) -> fmt::Result {
        let id = self.container_id();
        if let Some(id) = id {
            if open.contains(&id) {
                return match self {
                    Value::Array(_) => write!(f, "[...]"),
                    Value::Promise(_) => write!(f, "<promise ...>"),
                    _ => write!(f, "{{...}}"),
                };
            }
            open.push(id);
        }
        let result = self.write_contents(f, open, nested);
        if id.is_some() {
            open.pop();
        }
        result
    }

    fn write_contents(
        &self,
        f: &mut fmt::Formatter<'_>,
        open: &mut Vec<usize>,
        nested: bool,
    ) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::String(s) if nested => write!(f, "{:?}", s),
            Value::String(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Array(items) => {
                let items = items.read().map_err(|_| fmt::Error)?;
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.write_value(f, open, true)?;
                }
                write!(f, "]")
            }
            Value::Hash(entries) => {
                let entries = entries.read().map_err(|_| fmt::Error)?;
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    key.to_value().write_value(f, open, true)?;
                    write!(f, ": ")?;
                    value.write_value(f, open, true)?;
                }
                write!(f, "}}")
            }
            Value::Closure(closure) => write!(f, "<fn {}>", closure.function.name),
            Value::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name),
            Value::Class(class) => write!(f, "<struct {}>", class.name),
            Value::Instance(instance) => {
                let instance = instance.read().map_err(|_| fmt::Error)?;
                write!(f, "{} {{", instance.class.name)?;
                for (i, (name, value)) in instance.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: ", name)?;
                    value.write_value(f, open, true)?;
                }
                write!(f, " }}")
            }
            Value::Channel(ch) => write!(f, "<channel {}>", ch.capacity),
            Value::Promise(promise) => {
                let state = promise.lock().map_err(|_| fmt::Error)?.clone();
                match state {
                    PromiseState::Pending => write!(f, "<promise pending>"),
                    PromiseState::Resolved(v) => {
                        write!(f, "<promise resolved ")?;
                        v.write_value(f, open, false)?;
                        write!(f, ">")
                    }
                    PromiseState::Rejected(v) => {
                        write!(f, "<promise rejected ")?;
                        v.write_value(f, open, false)?;
                        write!(f, ">")
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}
