//! The bytecode virtual machine: stack-based execution engine.

use std::sync::Arc;

use crate::config::VmConfig;
use crate::error::RuntimeError;
use crate::span::Span;

use super::builtins::BUILTINS;
use super::chunk::{CompiledFunction, CompiledUnit, Constant};
use super::loader::ModuleLoader;
use super::opcode::{read_u16, OpCode};
use super::scheduler::{Scheduler, Settled};
use super::value::{Builtin, Closure, Environment, Value};
use super::vm_ops::read_lock;

/// A call frame on the VM call stack.
#[derive(Clone)]
pub struct CallFrame {
    /// The closure being executed.
    pub closure: Arc<Closure>,
    /// Offset of the next instruction.
    pub ip: usize,
    /// Stack index of the first argument; the callee sits just below.
    pub stack_base: usize,
}

/// An exception handler pushed by `TryEnter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Absolute offset of the catch code in the handler's frame.
    pub catch_ip: usize,
    /// Stack length when the try region was entered.
    pub stack_depth: usize,
    /// Frame count when the try region was entered.
    pub frame_depth: usize,
}

/// How a run of the dispatch loop ended.
#[derive(Debug)]
pub(crate) enum Completion {
    Returned(Value),
    /// A throw that no handler inside the run caught, with the position of
    /// the instruction that raised it.
    Threw(Value, Span),
}

/// The bytecode VM.
pub struct Vm {
    /// Value stack.
    pub(crate) stack: Vec<Value>,
    /// Call frame stack.
    pub(crate) frames: Vec<CallFrame>,
    /// Exception handler stack.
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
    pub(crate) env: Arc<Environment>,
    pub(crate) config: VmConfig,
    pub(crate) loader: Option<Arc<dyn ModuleLoader>>,
    pub(crate) scheduler: Scheduler,
    /// Captured `print` output; `None` writes to stdout.
    pub(crate) output: Option<Vec<String>>,
    main: Option<Arc<CompiledFunction>>,
    /// `(stack_len, frame_count)` at every `TryEnter`.
    #[cfg(test)]
    pub(crate) try_depths: Vec<(usize, usize)>,
    /// `(stack_len, frame_count)` after each unwind, before the caught
    /// value is pushed.
    #[cfg(test)]
    pub(crate) catch_depths: Vec<(usize, usize)>,
}

impl Vm {
    /// A VM ready to run `unit`.
    pub fn new(unit: &CompiledUnit, config: VmConfig) -> Self {
        let env = Arc::new(Environment::new(unit.constants.clone(), unit.num_globals));
        let mut vm = Self::with_env(env, config);
        vm.main = Some(Arc::new(CompiledFunction {
            name: "<main>".to_string(),
            instructions: unit.instructions.clone(),
            num_locals: 0,
            num_params: 0,
            is_async: false,
            source_map: unit.source_map.clone(),
        }));
        vm
    }

    /// A VM with no program of its own, executing against `env`. Spawned
    /// tasks run on one of these.
    pub(crate) fn with_env(env: Arc<Environment>, config: VmConfig) -> Self {
        Self {
            stack: Vec::with_capacity(config.stack_size.min(256)),
            frames: Vec::with_capacity(64),
            exception_handlers: Vec::new(),
            env,
            config,
            loader: None,
            scheduler: Scheduler::new(),
            output: None,
            main: None,
            #[cfg(test)]
            try_depths: Vec::new(),
            #[cfg(test)]
            catch_depths: Vec::new(),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Collect `print` output in memory instead of writing to stdout.
    pub fn capture_output(mut self) -> Self {
        self.output = Some(Vec::new());
        self
    }

    /// Lines printed so far when capturing.
    pub fn output(&self) -> &[String] {
        self.output.as_deref().unwrap_or(&[])
    }

    pub fn config(&self) -> VmConfig {
        self.config
    }

    /// Current value of global slot `index`.
    pub fn global(&self, index: usize) -> Option<Value> {
        self.env.globals.read().ok()?.get(index).cloned()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Execute the program, then drain pending timers and async tasks.
    /// Returns the program's value (its trailing expression, or null).
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let main = self
            .main
            .clone()
            .ok_or_else(|| RuntimeError::new("VM has no program to run", Span::default()))?;
        let closure = Arc::new(Closure {
            function: main,
            free: Vec::new(),
            env: Arc::clone(&self.env),
        });
        let result = match self.invoke(Value::Closure(closure), Vec::new())? {
            Completion::Returned(value) => value,
            Completion::Threw(value, span) => return Err(uncaught(&value, span)),
        };
        self.drain_scheduler()?;
        Ok(result)
    }

    // --- Stack helpers ---

    pub(crate) fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.config.stack_size {
            return Err(RuntimeError::StackOverflow(Span::default()));
        }
        self.stack.push(value);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::new("Stack underflow", Span::default()))
    }

    pub(crate) fn peek(&self, distance: usize) -> Result<&Value, RuntimeError> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .and_then(|idx| self.stack.get(idx))
            .ok_or_else(|| RuntimeError::new("Stack underflow", Span::default()))
    }

    /// Pop the top `count` values, in push order.
    pub(crate) fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        let at = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| RuntimeError::new("Stack underflow", Span::default()))?;
        Ok(self.stack.split_off(at))
    }

    // --- Dispatch ---

    /// Run until the frame count drops back to `floor`. Handlers owned by
    /// frames at or below `floor` are out of reach: a throw that would need
    /// them ends the run with `Completion::Threw`.
    pub(crate) fn run_frames(&mut self, floor: usize) -> Result<Completion, RuntimeError> {
        loop {
            let frame_idx = match self.frames.len().checked_sub(1) {
                Some(idx) if idx >= floor => idx,
                _ => return Err(RuntimeError::new("No active frame", Span::default())),
            };
            let closure = Arc::clone(&self.frames[frame_idx].closure);
            let ip = self.frames[frame_idx].ip;
            let code = closure.function.instructions.as_bytes();

            let op = match code.get(ip).copied().and_then(OpCode::from_u8) {
                Some(op) if ip + op.width() <= code.len() => op,
                _ => {
                    return Err(RuntimeError::new(
                        format!("Invalid instruction at offset {}", ip),
                        closure.function.source_map.lookup(ip),
                    ))
                }
            };
            self.frames[frame_idx].ip = ip + op.width();

            match self.execute(op, &code[ip + 1..], &closure, floor) {
                Ok(None) => {}
                Ok(Some(Completion::Threw(value, span))) if span.is_unknown() => {
                    let span = closure.function.source_map.lookup(ip);
                    return Ok(Completion::Threw(value, span));
                }
                Ok(Some(completion)) => return Ok(completion),
                Err(err) => return Err(err.at(closure.function.source_map.lookup(ip))),
            }
        }
    }

    /// Execute one instruction. `operands` starts right after the opcode.
    fn execute(
        &mut self,
        op: OpCode,
        operands: &[u8],
        closure: &Arc<Closure>,
        floor: usize,
    ) -> Result<Option<Completion>, RuntimeError> {
        let u16_operand = || read_u16(operands, 0) as usize;
        match op {
            OpCode::Constant => {
                let value = self.constant_value(u16_operand(), closure)?;
                self.push(value)?;
            }
            OpCode::Null => self.push(Value::Null)?,
            OpCode::True => self.push(Value::Bool(true))?,
            OpCode::False => self.push(Value::Bool(false))?,
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Dup => {
                let value = self.peek(0)?.clone();
                self.push(value)?;
            }

            OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Modulo
            | OpCode::Equal
            | OpCode::NotEqual
            | OpCode::Less
            | OpCode::LessEqual
            | OpCode::Greater
            | OpCode::GreaterEqual => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = self.binary_op(op, left, right)?;
                self.push(result)?;
            }
            OpCode::Negate => {
                let value = self.pop()?;
                let result = match value {
                    Value::Int(n) => Value::Int(n.wrapping_neg()),
                    Value::Float(n) => Value::Float(-n),
                    other => {
                        return Err(RuntimeError::type_error(
                            format!("cannot negate {}", other.type_name()),
                            Span::default(),
                        ))
                    }
                };
                self.push(result)?;
            }
            OpCode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.is_truthy()))?;
            }

            OpCode::Jump => self.jump(u16_operand()),
            OpCode::JumpIfFalse => {
                if !self.pop()?.is_truthy() {
                    self.jump(u16_operand());
                }
            }
            OpCode::JumpIfFalseNoPop => {
                if !self.peek(0)?.is_truthy() {
                    self.jump(u16_operand());
                }
            }
            OpCode::JumpIfTrueNoPop => {
                if self.peek(0)?.is_truthy() {
                    self.jump(u16_operand());
                }
            }

            OpCode::GetGlobal => {
                let value = self.read_global(u16_operand())?;
                self.push(value)?;
            }
            OpCode::SetGlobal => {
                let value = self.pop()?;
                self.write_global(u16_operand(), value)?;
            }
            OpCode::GetLocal => {
                let slot = self.local_slot(operands[0] as usize)?;
                let value = self.stack[slot].clone();
                self.push(value)?;
            }
            OpCode::SetLocal => {
                let value = self.pop()?;
                let slot = self.local_slot(operands[0] as usize)?;
                self.stack[slot] = value;
            }
            OpCode::GetFree => {
                let value = closure
                    .free
                    .get(operands[0] as usize)
                    .cloned()
                    .ok_or_else(|| RuntimeError::new("Invalid free variable", Span::default()))?;
                self.push(value)?;
            }
            OpCode::GetBuiltin => {
                let (name, func) = BUILTINS
                    .get(operands[0] as usize)
                    .copied()
                    .ok_or_else(|| RuntimeError::new("Unknown builtin", Span::default()))?;
                self.push(Value::Builtin(Builtin { name, func }))?;
            }
            OpCode::CurrentClosure => self.push(Value::Closure(Arc::clone(closure)))?,

            OpCode::BuildArray => {
                let items = self.pop_n(u16_operand())?;
                self.push(Value::array(items))?;
            }
            OpCode::BuildHash => {
                let flat = self.pop_n(u16_operand() * 2)?;
                let map = self.build_hash(flat)?;
                self.push(map)?;
            }
            OpCode::Index => {
                let index = self.pop()?;
                let object = self.pop()?;
                let value = self.index_value(&object, &index)?;
                self.push(value)?;
            }
            OpCode::SetIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                let object = self.pop()?;
                self.set_index(&object, &index, value.clone())?;
                self.push(value)?;
            }
            OpCode::GetField => {
                let name = self.constant_string(u16_operand(), closure)?;
                let object = self.pop()?;
                let value = self.get_field(&object, &name)?;
                self.push(value)?;
            }
            OpCode::SetField => {
                let name = self.constant_string(u16_operand(), closure)?;
                let value = self.pop()?;
                let object = self.pop()?;
                self.set_field(&object, &name, value.clone())?;
                self.push(value)?;
            }

            OpCode::Call => self.call_value(operands[0] as usize)?,
            OpCode::Return => {
                let result = self.pop()?;
                return self.return_from_frame(result, floor);
            }
            OpCode::Closure => {
                let idx = u16_operand();
                let function = match closure.env.constants.get(idx) {
                    Some(Constant::Function(function)) => Arc::clone(function),
                    _ => {
                        return Err(RuntimeError::new(
                            format!("Constant {} is not a function", idx),
                            Span::default(),
                        ))
                    }
                };
                let free = self.pop_n(operands[2] as usize)?;
                self.push(Value::Closure(Arc::new(Closure {
                    function,
                    free,
                    env: Arc::clone(&closure.env),
                })))?;
            }

            OpCode::TryEnter => {
                #[cfg(test)]
                self.try_depths.push((self.stack.len(), self.frames.len()));
                self.exception_handlers.push(ExceptionHandler {
                    catch_ip: u16_operand(),
                    stack_depth: self.stack.len(),
                    frame_depth: self.frames.len(),
                });
            }
            OpCode::TryExit => {
                self.exception_handlers.pop();
            }
            OpCode::Throw => {
                let value = self.pop()?;
                if let Some(value) = self.throw_value(value, floor) {
                    return Ok(Some(Completion::Threw(value, Span::default())));
                }
            }

            OpCode::Spawn => self.spawn_task(operands[0] as usize)?,
            OpCode::Await => {
                let target = self.pop()?;
                match self.await_value(target)? {
                    Settled::Resolved(value) => self.push(value)?,
                    Settled::Rejected(reason) => {
                        if let Some(value) = self.throw_value(reason, floor) {
                            return Ok(Some(Completion::Threw(value, Span::default())));
                        }
                    }
                }
            }

            OpCode::Import => {
                let path = self.constant_string(u16_operand(), closure)?;
                let module = self.import_module(&path)?;
                self.push(module)?;
            }

            OpCode::IterPrepare => {
                let iterable = self.pop()?;
                let items = self.iteration_items(iterable)?;
                self.push(items)?;
            }
            OpCode::Length => {
                let value = self.pop()?;
                let length = match &value {
                    Value::Array(items) => read_lock(items)?.len(),
                    other => {
                        return Err(RuntimeError::type_error(
                            format!("cannot take length of {}", other.type_name()),
                            Span::default(),
                        ))
                    }
                };
                self.push(Value::Int(length as i64))?;
            }
        }
        Ok(None)
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = target;
        }
    }

    fn local_slot(&self, slot: usize) -> Result<usize, RuntimeError> {
        let base = self.frames.last().map_or(0, |frame| frame.stack_base);
        let idx = base + slot;
        if idx < self.stack.len() {
            Ok(idx)
        } else {
            Err(RuntimeError::new(
                format!("Invalid local slot {}", slot),
                Span::default(),
            ))
        }
    }

    fn constant_value(&self, idx: usize, closure: &Arc<Closure>) -> Result<Value, RuntimeError> {
        match closure.env.constants.get(idx) {
            Some(Constant::Function(function)) => Ok(Value::Closure(Arc::new(Closure {
                function: Arc::clone(function),
                free: Vec::new(),
                env: Arc::clone(&closure.env),
            }))),
            Some(constant) => Value::from_constant(constant)
                .ok_or_else(|| RuntimeError::new("Invalid constant", Span::default())),
            None => Err(RuntimeError::new(
                format!("Constant index {} out of range", idx),
                Span::default(),
            )),
        }
    }

    fn constant_string(&self, idx: usize, closure: &Arc<Closure>) -> Result<String, RuntimeError> {
        match closure.env.constants.get(idx) {
            Some(Constant::String(s)) => Ok(s.clone()),
            _ => Err(RuntimeError::new(
                format!("Constant {} is not a string", idx),
                Span::default(),
            )),
        }
    }

    fn read_global(&self, idx: usize) -> Result<Value, RuntimeError> {
        let globals = self
            .env
            .globals
            .read()
            .map_err(|_| RuntimeError::new("Globals lock poisoned", Span::default()))?;
        Ok(globals.get(idx).cloned().unwrap_or(Value::Null))
    }

    fn write_global(&self, idx: usize, value: Value) -> Result<(), RuntimeError> {
        let mut globals = self
            .env
            .globals
            .write()
            .map_err(|_| RuntimeError::new("Globals lock poisoned", Span::default()))?;
        if idx >= globals.len() {
            globals.resize(idx + 1, Value::Null);
        }
        globals[idx] = value;
        Ok(())
    }
}

/// The fatal error for a throw nothing caught.
pub(crate) fn uncaught(value: &Value, span: Span) -> RuntimeError {
    RuntimeError::UncaughtException {
        message: value.to_string(),
        span,
    }
}
