//! Operator semantics: arithmetic, comparison, indexing and field access.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;

use crate::error::RuntimeError;
use crate::span::Span;

use super::opcode::OpCode;
use super::value::{HashKey, Value};
use super::vm::Vm;

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, RuntimeError> {
    lock.read()
        .map_err(|_| RuntimeError::new("Value lock poisoned", Span::default()))
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, RuntimeError> {
    lock.write()
        .map_err(|_| RuntimeError::new("Value lock poisoned", Span::default()))
}

fn hash_key(value: &Value) -> Result<HashKey, RuntimeError> {
    HashKey::from_value(value).ok_or_else(|| {
        RuntimeError::type_error(
            format!("{} cannot be used as a map key", value.type_name()),
            Span::default(),
        )
    })
}

fn operand_error(op: OpCode, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::type_error(
        format!(
            "unsupported operand types for {}: {} and {}",
            op.name(),
            left.type_name(),
            right.type_name()
        ),
        Span::default(),
    )
}

impl Vm {
    pub(crate) fn binary_op(&self, op: OpCode, left: Value, right: Value) -> Result<Value, RuntimeError> {
        match op {
            OpCode::Equal => return Ok(Value::Bool(left.equals(&right))),
            OpCode::NotEqual => return Ok(Value::Bool(!left.equals(&right))),
            OpCode::Less | OpCode::LessEqual | OpCode::Greater | OpCode::GreaterEqual => {
                return compare(op, &left, &right);
            }
            _ => {}
        }

        // String concatenation: either side a string.
        if op == OpCode::Add {
            match (&left, &right) {
                (Value::String(a), b) => return Ok(Value::String(format!("{}{}", a, b))),
                (a, Value::String(b)) => return Ok(Value::String(format!("{}{}", a, b))),
                _ => {}
            }
        }

        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b),
            (Value::Int(a), Value::Float(b)) => float_arith(op, *a as f64, *b),
            (Value::Float(a), Value::Int(b)) => float_arith(op, *a, *b as f64),
            (Value::Float(a), Value::Float(b)) => float_arith(op, *a, *b),
            (Value::Array(a), Value::Array(b)) if op == OpCode::Add => {
                let mut items = read_lock(a)?.clone();
                items.extend(read_lock(b)?.iter().cloned());
                Ok(Value::array(items))
            }
            _ => Err(operand_error(op, &left, &right)),
        }
    }

    pub(crate) fn build_hash(&self, flat: Vec<Value>) -> Result<Value, RuntimeError> {
        let mut map = IndexMap::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            map.insert(hash_key(&key)?, value);
        }
        Ok(Value::hash(map))
    }

    /// `object[index]`. Out-of-range array reads yield null.
    pub(crate) fn index_value(&self, object: &Value, index: &Value) -> Result<Value, RuntimeError> {
        match (object, index) {
            (Value::Array(items), Value::Int(i)) => {
                let items = read_lock(items)?;
                Ok(usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Null))
            }
            (Value::Array(_), other) => Err(RuntimeError::type_error(
                format!("array index must be an int, got {}", other.type_name()),
                Span::default(),
            )),
            (Value::Hash(map), key) => {
                let key = hash_key(key)?;
                Ok(read_lock(map)?.get(&key).cloned().unwrap_or(Value::Null))
            }
            (Value::String(s), Value::Int(i)) => Ok(usize::try_from(*i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null)),
            (Value::Instance(_), Value::String(name)) => self.get_field(object, name),
            (other, _) => Err(RuntimeError::type_error(
                format!("cannot index into {}", other.type_name()),
                Span::default(),
            )),
        }
    }

    /// `object[index] = value`. Writing outside an array's bounds is an error.
    pub(crate) fn set_index(&self, object: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
        match (object, index) {
            (Value::Array(items), Value::Int(i)) => {
                let mut items = write_lock(items)?;
                let length = items.len();
                match usize::try_from(*i).ok().filter(|i| *i < length) {
                    Some(i) => {
                        items[i] = value;
                        Ok(())
                    }
                    None => Err(RuntimeError::IndexOutOfBounds {
                        index: *i,
                        length,
                        span: Span::default(),
                    }),
                }
            }
            (Value::Array(_), other) => Err(RuntimeError::type_error(
                format!("array index must be an int, got {}", other.type_name()),
                Span::default(),
            )),
            (Value::Hash(map), key) => {
                let key = hash_key(key)?;
                write_lock(map)?.insert(key, value);
                Ok(())
            }
            (Value::Instance(_), Value::String(name)) => self.set_field(object, name, value),
            (other, _) => Err(RuntimeError::type_error(
                format!("cannot assign into {}", other.type_name()),
                Span::default(),
            )),
        }
    }

    pub(crate) fn get_field(&self, object: &Value, name: &str) -> Result<Value, RuntimeError> {
        match object {
            Value::Instance(instance) => {
                let instance = read_lock(instance)?;
                instance
                    .fields
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RuntimeError::NoSuchField {
                        type_name: instance.class.name.clone(),
                        field: name.to_string(),
                        span: Span::default(),
                    })
            }
            // Module exports and plain maps allow dotted access.
            Value::Hash(map) => Ok(read_lock(map)?
                .get(&HashKey::String(name.to_string()))
                .cloned()
                .unwrap_or(Value::Null)),
            other => Err(RuntimeError::NoSuchField {
                type_name: other.type_name().to_string(),
                field: name.to_string(),
                span: Span::default(),
            }),
        }
    }

    /// Only declared fields can be written.
    pub(crate) fn set_field(&self, object: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
        match object {
            Value::Instance(instance) => {
                let mut instance = write_lock(instance)?;
                let class_name = instance.class.name.clone();
                match instance.fields.get_mut(name) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(RuntimeError::NoSuchField {
                        type_name: class_name,
                        field: name.to_string(),
                        span: Span::default(),
                    }),
                }
            }
            Value::Hash(map) => {
                write_lock(map)?.insert(HashKey::String(name.to_string()), value);
                Ok(())
            }
            other => Err(RuntimeError::NoSuchField {
                type_name: other.type_name().to_string(),
                field: name.to_string(),
                span: Span::default(),
            }),
        }
    }

    /// Snapshot of what a `for x in` loop walks: array elements, map keys
    /// or the characters of a string.
    pub(crate) fn iteration_items(&self, iterable: Value) -> Result<Value, RuntimeError> {
        let items = match &iterable {
            Value::Array(items) => read_lock(items)?.clone(),
            Value::Hash(map) => read_lock(map)?.keys().map(HashKey::to_value).collect(),
            Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
            other => {
                return Err(RuntimeError::type_error(
                    format!("cannot iterate over {}", other.type_name()),
                    Span::default(),
                ))
            }
        };
        Ok(Value::array(items))
    }
}

fn int_arith(op: OpCode, a: i64, b: i64) -> Result<Value, RuntimeError> {
    let result = match op {
        OpCode::Add => a.wrapping_add(b),
        OpCode::Subtract => a.wrapping_sub(b),
        OpCode::Multiply => a.wrapping_mul(b),
        OpCode::Divide | OpCode::Modulo if b == 0 => {
            return Err(RuntimeError::division_by_zero(Span::default()))
        }
        OpCode::Divide => a.wrapping_div(b),
        OpCode::Modulo => a.wrapping_rem(b),
        _ => return Err(operand_error(op, &Value::Int(a), &Value::Int(b))),
    };
    Ok(Value::Int(result))
}

fn float_arith(op: OpCode, a: f64, b: f64) -> Result<Value, RuntimeError> {
    let result = match op {
        OpCode::Add => a + b,
        OpCode::Subtract => a - b,
        OpCode::Multiply => a * b,
        OpCode::Divide | OpCode::Modulo if b == 0.0 => {
            return Err(RuntimeError::division_by_zero(Span::default()))
        }
        OpCode::Divide => a / b,
        OpCode::Modulo => a % b,
        _ => return Err(operand_error(op, &Value::Float(a), &Value::Float(b))),
    };
    Ok(Value::Float(result))
}

fn compare(op: OpCode, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => return Err(operand_error(op, left, right)),
    };
    // NaN compares false with everything.
    let result = match ordering {
        Some(ordering) => match op {
            OpCode::Less => ordering.is_lt(),
            OpCode::LessEqual => ordering.is_le(),
            OpCode::Greater => ordering.is_gt(),
            _ => ordering.is_ge(),
        },
        None => false,
    };
    Ok(Value::Bool(result))
}
