//! Exception handling for the VM: throw and unwind.

use super::value::Value;
use super::vm::Vm;

impl Vm {
    /// Route a thrown value to the innermost handler reachable from the
    /// current run. On success the stack and frames are restored to their
    /// state at the matching `TryEnter`, the value is pushed and execution
    /// continues at the catch code.
    ///
    /// Returns the value back when no handler above `floor` exists; the
    /// frames of the current run have been discarded by then.
    pub(crate) fn throw_value(&mut self, value: Value, floor: usize) -> Option<Value> {
        match self.exception_handlers.last().copied() {
            Some(handler) if handler.frame_depth > floor => {
                self.exception_handlers.pop();
                self.frames.truncate(handler.frame_depth);
                self.stack.truncate(handler.stack_depth);
                #[cfg(test)]
                self.catch_depths.push((self.stack.len(), self.frames.len()));
                self.stack.push(value);
                if let Some(frame) = self.frames.last_mut() {
                    frame.ip = handler.catch_ip;
                }
                None
            }
            _ => {
                self.abandon_run(floor);
                Some(value)
            }
        }
    }

    /// Unwind everything the current run pushed: frames above `floor`,
    /// their handlers and their stack slots including the callee.
    pub(crate) fn abandon_run(&mut self, floor: usize) {
        let callee_slot = self
            .frames
            .get(floor)
            .map(|frame| frame.stack_base.saturating_sub(1));
        self.frames.truncate(floor);
        while matches!(self.exception_handlers.last(), Some(h) if h.frame_depth > floor) {
            self.exception_handlers.pop();
        }
        if let Some(slot) = callee_slot {
            self.stack.truncate(slot);
        }
    }
}
