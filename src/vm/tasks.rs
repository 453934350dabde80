//! Concurrent tasks: `spawn` runs a call on its own thread and VM, sharing
//! the spawning program's constants and globals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel;

use crate::error::RuntimeError;
use crate::span::Span;

use super::scheduler::Settled;
use super::value::{Channel, Value};
use super::vm::{uncaught, Completion, Vm};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl Vm {
    /// `spawn f(args)`: start the call on a new task and push a channel that
    /// will carry its single result.
    pub(crate) fn spawn_task(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let args = self.pop_n(argc)?;
        let callee = self.pop()?;
        if !matches!(
            callee,
            Value::Closure(_) | Value::Builtin(_) | Value::Class(_)
        ) {
            return Err(RuntimeError::not_callable(callee.type_name(), Span::default()));
        }

        let task_id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = channel::bounded(1);
        let env = Arc::clone(&self.env);
        let config = self.config;
        let loader = self.loader.clone();
        let name = callee.to_string();

        tracing::debug!(task = task_id, callee = %name, "spawning task");
        thread::Builder::new()
            .name(format!("brook-task-{}", task_id))
            .spawn(move || {
                let mut vm = Vm::with_env(env, config);
                vm.loader = loader;
                match vm.run_task(callee, args) {
                    Ok(value) => {
                        tracing::debug!(task = task_id, "task finished");
                        // The awaiting side may be gone; nothing to report then.
                        let _ = sender.send(value);
                    }
                    Err(err) => {
                        tracing::error!(task = task_id, callee = %name, error = %err, "spawned task failed");
                    }
                }
            })
            .map_err(|err| {
                RuntimeError::new(format!("Failed to start task: {}", err), Span::default())
            })?;

        self.push(Value::Channel(Channel::receive_only(receiver, 1)))
    }

    /// Entry point of a spawned task: run the call, then its own timers.
    fn run_task(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let value = match self.invoke(callee, args)? {
            Completion::Returned(value) => value,
            Completion::Threw(value, span) => return Err(uncaught(&value, span)),
        };
        self.drain_scheduler()?;
        Ok(value)
    }

    /// `await x`: block on a channel, drive the scheduler for a promise, or
    /// pass any other value through.
    pub(crate) fn await_value(&mut self, target: Value) -> Result<Settled, RuntimeError> {
        match target {
            Value::Channel(ch) => ch
                .receiver
                .recv()
                .map(Settled::Resolved)
                .map_err(|_| RuntimeError::TaskFailed {
                    message: "task ended without producing a result".to_string(),
                    span: Span::default(),
                }),
            Value::Promise(promise) => self.await_promise(promise),
            other => Ok(Settled::Resolved(other)),
        }
    }
}
