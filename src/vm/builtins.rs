//! Host functions callable from scripts.
//!
//! Builtins receive their arguments as a list and return exactly one value.
//! Indices into `BUILTINS` are baked into bytecode (`GetBuiltin`), so new
//! entries go at the end.

use std::time::Duration;

use ahash::AHashMap;
use lazy_static::lazy_static;

use crate::config::MAX_CHANNEL_CAPACITY;
use crate::error::RuntimeError;
use crate::span::Span;

use super::value::{BuiltinFn, Channel, HashKey, Value};
use super::vm::Vm;
use super::vm_ops::{read_lock, write_lock};

lazy_static! {
    /// Builtins in bytecode index order.
    pub static ref BUILTINS: Vec<(&'static str, BuiltinFn)> = vec![
        ("len", builtin_len as BuiltinFn),
        ("print", builtin_print as BuiltinFn),
        ("push", builtin_push as BuiltinFn),
        ("keys", builtin_keys as BuiltinFn),
        ("type", builtin_type as BuiltinFn),
        ("str", builtin_str as BuiltinFn),
        ("channel", builtin_channel as BuiltinFn),
        ("send", builtin_send as BuiltinFn),
        ("recv", builtin_recv as BuiltinFn),
        ("setTimeout", builtin_set_timeout as BuiltinFn),
        ("sleep", builtin_sleep as BuiltinFn),
    ];

    static ref BUILTIN_INDEX: AHashMap<&'static str, usize> = BUILTINS
        .iter()
        .enumerate()
        .map(|(index, (name, _))| (*name, index))
        .collect();
}

/// Bytecode index of the builtin called `name`.
pub fn builtin_index(name: &str) -> Option<usize> {
    BUILTIN_INDEX.get(name).copied()
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::new(
            format!(
                "{}() takes {} argument(s), got {}",
                name,
                expected,
                args.len()
            ),
            Span::default(),
        ));
    }
    Ok(())
}

fn bad_argument(name: &str, value: &Value) -> RuntimeError {
    RuntimeError::type_error(
        format!("{}() does not accept {}", name, value.type_name()),
        Span::default(),
    )
}

fn millis(name: &str, value: &Value) -> Result<Duration, RuntimeError> {
    match value {
        Value::Int(ms) if *ms >= 0 => Ok(Duration::from_millis(*ms as u64)),
        Value::Float(ms) if *ms >= 0.0 => {
            Duration::try_from_secs_f64(*ms / 1000.0).map_err(|_| bad_argument(name, value))
        }
        other => Err(bad_argument(name, other)),
    }
}

fn builtin_len(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity("len", &args, 1)?;
    let length = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => read_lock(items)?.len(),
        Value::Hash(map) => read_lock(map)?.len(),
        other => return Err(bad_argument("len", other)),
    };
    Ok(Value::Int(length as i64))
}

fn builtin_print(vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    match vm.output.as_mut() {
        Some(output) => output.push(line),
        None => println!("{}", line),
    }
    Ok(Value::Null)
}

fn builtin_push(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity("push", &args, 2)?;
    match &args[0] {
        Value::Array(items) => {
            write_lock(items)?.push(args[1].clone());
            Ok(args[0].clone())
        }
        other => Err(bad_argument("push", other)),
    }
}

fn builtin_keys(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity("keys", &args, 1)?;
    match &args[0] {
        Value::Hash(map) => Ok(Value::array(
            read_lock(map)?.keys().map(HashKey::to_value).collect(),
        )),
        Value::Instance(instance) => Ok(Value::array(
            read_lock(instance)?
                .fields
                .keys()
                .map(|name| Value::String(name.clone()))
                .collect(),
        )),
        other => Err(bad_argument("keys", other)),
    }
}

fn builtin_type(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity("type", &args, 1)?;
    let name = match &args[0] {
        Value::Instance(instance) => read_lock(instance)?.class.name.clone(),
        other => other.type_name().to_string(),
    };
    Ok(Value::String(name))
}

fn builtin_str(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity("str", &args, 1)?;
    Ok(Value::String(args[0].to_string()))
}

/// `channel(capacity)`; capacity defaults to 0 (rendezvous).
fn builtin_channel(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let capacity = match args.first() {
        None => 0,
        Some(Value::Int(n)) if *n >= 0 => *n as usize,
        Some(other) => return Err(bad_argument("channel", other)),
    };
    if capacity > MAX_CHANNEL_CAPACITY {
        return Err(RuntimeError::new(
            format!(
                "channel capacity {} exceeds the maximum of {}",
                capacity, MAX_CHANNEL_CAPACITY
            ),
            Span::default(),
        ));
    }
    Ok(Value::Channel(Channel::bounded(capacity)))
}

/// Blocks while the channel is full.
fn builtin_send(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity("send", &args, 2)?;
    let sender = match &args[0] {
        Value::Channel(Channel {
            sender: Some(sender),
            ..
        }) => sender.clone(),
        other => return Err(bad_argument("send", other)),
    };
    sender
        .send(args[1].clone())
        .map_err(|_| RuntimeError::new("send on a closed channel", Span::default()))?;
    Ok(Value::Null)
}

/// Blocks until a value is available.
fn builtin_recv(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity("recv", &args, 1)?;
    match &args[0] {
        Value::Channel(ch) => ch.receiver.recv().map_err(|_| RuntimeError::TaskFailed {
            message: "receive on a channel with no senders".to_string(),
            span: Span::default(),
        }),
        other => Err(bad_argument("recv", other)),
    }
}

fn builtin_set_timeout(vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity("setTimeout", &args, 2)?;
    let delay = millis("setTimeout", &args[1])?;
    match &args[0] {
        callee @ (Value::Closure(_) | Value::Builtin(_)) => {
            vm.set_timeout(callee.clone(), delay)?;
            Ok(Value::Null)
        }
        other => Err(bad_argument("setTimeout", other)),
    }
}

fn builtin_sleep(vm: &mut Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
    arity("sleep", &args, 1)?;
    let delay = millis("sleep", &args[0])?;
    Ok(Value::Promise(vm.sleep_promise(delay)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_indices_are_stable() {
        assert_eq!(builtin_index("len"), Some(0));
        assert_eq!(builtin_index("print"), Some(1));
        assert_eq!(builtin_index("sleep"), Some(BUILTINS.len() - 1));
        assert_eq!(builtin_index("nope"), None);
    }

    #[test]
    fn test_millis_accepts_ints_and_floats() {
        assert_eq!(millis("sleep", &Value::Int(20)).unwrap(), Duration::from_millis(20));
        assert_eq!(
            millis("sleep", &Value::Float(500.0)).unwrap(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_millis_rejects_unrepresentable_floats() {
        for ms in [f64::INFINITY, 1e300, f64::NAN, -1.0] {
            assert!(millis("sleep", &Value::Float(ms)).is_err(), "{} accepted", ms);
        }
        assert!(millis("sleep", &Value::Int(-1)).is_err());
    }
}
