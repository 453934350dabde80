//! Cooperative, single-threaded task queue behind `async fn`, `setTimeout`
//! and `sleep`.
//!
//! Jobs run one at a time on the VM that scheduled them, ordered by due time
//! and then by insertion. Nothing is preempted or cancelled. Awaiting a
//! pending promise drives the queue first, and only yields the promise
//! itself, still pending, once the queue is empty.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::RuntimeError;
use crate::span::Span;

use super::value::{new_promise, Closure, Promise, PromiseState, Value};
use super::vm::{uncaught, Completion, Vm};

/// Outcome of awaiting something.
#[derive(Debug)]
pub(crate) enum Settled {
    Resolved(Value),
    Rejected(Value),
}

enum Job {
    /// Call `callee`; settle `promise` with the outcome when there is one.
    Call {
        callee: Value,
        args: Vec<Value>,
        promise: Option<Promise>,
    },
    /// Resolve `promise` with null (a `sleep` expiring).
    Wake(Promise),
}

struct TimerEntry {
    /// Insertion order, breaks ties between equal deadlines.
    id: u64,
    deadline: Instant,
    job: Job,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Ord for TimerEntry {
    // BinaryHeap is a max-heap, so we reverse the ordering to get a min-heap by deadline.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct Scheduler {
    queue: BinaryHeap<TimerEntry>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn push(&mut self, deadline: Instant, job: Job) {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push(TimerEntry { id, deadline, job });
    }

    fn pop(&mut self) -> Option<TimerEntry> {
        self.queue.pop()
    }
}

/// `delay` from now, or an error when the clock cannot represent it.
fn deadline_after(delay: Duration) -> Result<Instant, RuntimeError> {
    Instant::now().checked_add(delay).ok_or_else(|| {
        RuntimeError::new(
            format!("timer delay of {}ms is out of range", delay.as_millis()),
            Span::default(),
        )
    })
}

fn lock_promise(promise: &Promise) -> Result<MutexGuard<'_, PromiseState>, RuntimeError> {
    promise
        .lock()
        .map_err(|_| RuntimeError::new("Promise lock poisoned", Span::default()))
}

fn settle(promise: &Promise, state: PromiseState) -> Result<(), RuntimeError> {
    *lock_promise(promise)? = state;
    Ok(())
}

impl Vm {
    /// Queue the body of an async function; its promise settles when the
    /// body finishes.
    pub(crate) fn schedule_async(&mut self, closure: Arc<Closure>, args: Vec<Value>) -> Promise {
        let promise = new_promise();
        self.scheduler.push(
            Instant::now(),
            Job::Call {
                callee: Value::Closure(closure),
                args,
                promise: Some(Arc::clone(&promise)),
            },
        );
        promise
    }

    /// Run `callee` with no arguments after `delay`.
    pub(crate) fn set_timeout(
        &mut self,
        callee: Value,
        delay: Duration,
    ) -> Result<(), RuntimeError> {
        self.scheduler.push(
            deadline_after(delay)?,
            Job::Call {
                callee,
                args: Vec::new(),
                promise: None,
            },
        );
        Ok(())
    }

    /// A promise resolving to null after `delay`.
    pub(crate) fn sleep_promise(&mut self, delay: Duration) -> Result<Promise, RuntimeError> {
        let deadline = deadline_after(delay)?;
        let promise = new_promise();
        self.scheduler.push(deadline, Job::Wake(Arc::clone(&promise)));
        Ok(promise)
    }

    /// Run the earliest job, waiting for its deadline. Returns false when
    /// the queue is empty.
    pub(crate) fn run_next_job(&mut self) -> Result<bool, RuntimeError> {
        let entry = match self.scheduler.pop() {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let now = Instant::now();
        if entry.deadline > now {
            thread::sleep(entry.deadline - now);
        }

        match entry.job {
            Job::Wake(promise) => settle(&promise, PromiseState::Resolved(Value::Null))?,
            Job::Call {
                callee,
                args,
                promise,
            } => match (self.invoke(callee, args)?, promise) {
                (Completion::Returned(value), Some(promise)) => {
                    settle(&promise, PromiseState::Resolved(value))?
                }
                (Completion::Returned(_), None) => {}
                (Completion::Threw(value, _), Some(promise)) => {
                    tracing::debug!(reason = %value, "async task rejected");
                    settle(&promise, PromiseState::Rejected(value))?
                }
                (Completion::Threw(value, span), None) => return Err(uncaught(&value, span)),
            },
        }
        Ok(true)
    }

    /// Run every queued job, including jobs queued while draining.
    pub(crate) fn drain_scheduler(&mut self) -> Result<(), RuntimeError> {
        let mut ran = 0usize;
        while self.run_next_job()? {
            ran += 1;
        }
        if ran > 0 {
            tracing::trace!(jobs = ran, "scheduler drained");
        }
        Ok(())
    }

    /// Drive the queue until `promise` settles. If the queue runs dry first
    /// the pending promise itself is the result.
    pub(crate) fn await_promise(&mut self, promise: Promise) -> Result<Settled, RuntimeError> {
        loop {
            let state = lock_promise(&promise)?.clone();
            match state {
                PromiseState::Resolved(value) => return Ok(Settled::Resolved(value)),
                PromiseState::Rejected(reason) => return Ok(Settled::Rejected(reason)),
                PromiseState::Pending => {
                    if !self.run_next_job()? {
                        tracing::debug!("awaited promise can never settle; returning it pending");
                        return Ok(Settled::Resolved(Value::Promise(promise)));
                    }
                }
            }
        }
    }
}
