//! Function call dispatch for the VM.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::error::RuntimeError;
use crate::span::Span;

use super::chunk::ClassDef;
use super::value::{Closure, HashKey, Instance, Value};
use super::vm::{CallFrame, Completion, Vm};

impl Vm {
    /// Call the value sitting below `argc` arguments on the stack.
    /// Compiled closures get a new frame; everything else completes here and
    /// leaves its result in place of the callee and arguments.
    pub(crate) fn call_value(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee_idx = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| RuntimeError::new("Stack underflow", Span::default()))?;
        let callee = self.stack[callee_idx].clone();

        match callee {
            Value::Closure(closure) if closure.function.is_async => {
                let args = self.pop_n(argc)?;
                self.pop()?;
                let promise = self.schedule_async(closure, args);
                self.push(Value::Promise(promise))
            }
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::Builtin(builtin) => {
                let args = self.pop_n(argc)?;
                self.pop()?;
                let result = (builtin.func)(self, args)?;
                self.push(result)
            }
            Value::Class(class) => {
                let args = self.pop_n(argc)?;
                self.pop()?;
                let instance = instantiate(&class, args)?;
                self.push(instance)
            }
            other => Err(RuntimeError::not_callable(other.type_name(), Span::default())),
        }
    }

    /// Push a frame for `closure`; its arguments are already on the stack.
    fn call_closure(&mut self, closure: Arc<Closure>, argc: usize) -> Result<(), RuntimeError> {
        let function = &closure.function;
        if argc != function.num_params {
            return Err(RuntimeError::wrong_arity(
                function.num_params,
                argc,
                Span::default(),
            ));
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::FrameOverflow(Span::default()));
        }

        let stack_base = self.stack.len() - argc;
        for _ in function.num_params..function.num_locals {
            self.push(Value::Null)?;
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            stack_base,
        });
        Ok(())
    }

    /// Pop the current frame and hand `result` to its caller. Handlers the
    /// frame still had open are discarded.
    pub(crate) fn return_from_frame(
        &mut self,
        result: Value,
        floor: usize,
    ) -> Result<Option<Completion>, RuntimeError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::new("Return outside of a frame", Span::default()))?;
        let depth = self.frames.len();
        while matches!(self.exception_handlers.last(), Some(h) if h.frame_depth > depth) {
            self.exception_handlers.pop();
        }
        // Drop locals, arguments and the callee itself.
        self.stack.truncate(frame.stack_base.saturating_sub(1));

        if depth <= floor {
            return Ok(Some(Completion::Returned(result)));
        }
        self.push(result)?;
        Ok(None)
    }

    /// Call `callee` with `args` from host code and run it to completion.
    /// Async closures run their body directly instead of scheduling it.
    pub(crate) fn invoke(&mut self, callee: Value, args: Vec<Value>) -> Result<Completion, RuntimeError> {
        let argc = args.len();
        match callee {
            Value::Closure(closure) => {
                let floor = self.frames.len();
                let stack_len = self.stack.len();
                self.push(Value::Closure(Arc::clone(&closure)))?;
                for arg in args {
                    self.push(arg)?;
                }
                if let Err(err) = self.call_closure(closure, argc) {
                    self.stack.truncate(stack_len);
                    return Err(err);
                }
                self.run_frames(floor)
            }
            Value::Builtin(builtin) => Ok(Completion::Returned((builtin.func)(self, args)?)),
            Value::Class(class) => Ok(Completion::Returned(instantiate(&class, args)?)),
            other => Err(RuntimeError::not_callable(other.type_name(), Span::default())),
        }
    }

    /// Resolve an import through the configured loader.
    pub(crate) fn import_module(&mut self, path: &str) -> Result<Value, RuntimeError> {
        let loader = self.loader.clone().ok_or_else(|| RuntimeError::UnresolvedImport {
            path: path.to_string(),
            message: "no module loader configured".to_string(),
            span: Span::default(),
        })?;
        let exports = loader
            .load(path)
            .map_err(|message| RuntimeError::UnresolvedImport {
                path: path.to_string(),
                message,
                span: Span::default(),
            })?;
        tracing::debug!(path, exports = exports.len(), "imported module");

        let map: IndexMap<HashKey, Value> = exports
            .into_iter()
            .map(|(name, value)| (HashKey::String(name), value))
            .collect();
        Ok(Value::hash(map))
    }
}

/// Calling a struct creates an instance; fields without an argument are null.
fn instantiate(class: &Arc<ClassDef>, args: Vec<Value>) -> Result<Value, RuntimeError> {
    if args.len() > class.fields.len() {
        return Err(RuntimeError::wrong_arity(
            class.fields.len(),
            args.len(),
            Span::default(),
        ));
    }
    let mut args = args.into_iter();
    let fields = class
        .fields
        .iter()
        .map(|name| (name.clone(), args.next().unwrap_or(Value::Null)))
        .collect();
    Ok(Value::Instance(Arc::new(RwLock::new(Instance {
        class: Arc::clone(class),
        fields,
    }))))
}
