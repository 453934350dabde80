//! Runtime and compiler configuration.

use std::env;

/// Default operand stack capacity (values).
pub const DEFAULT_STACK_SIZE: usize = 2048;

/// Default call frame limit.
pub const DEFAULT_MAX_FRAMES: usize = 1024;

/// Largest buffer `channel(n)` may request. Buffers are allocated up front.
pub const MAX_CHANNEL_CAPACITY: usize = 1 << 20;

/// Environment variable overriding the operand stack capacity.
pub const STACK_SIZE_ENV: &str = "BROOK_STACK_SIZE";

/// Environment variable overriding the call frame limit.
pub const MAX_FRAMES_ENV: &str = "BROOK_MAX_FRAMES";

/// Environment variable holding the log filter used by the binary.
pub const LOG_ENV: &str = "BROOK_LOG";

/// Resource limits for one VM instance. Spawned tasks inherit the limits
/// of the VM that spawned them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Operand stack capacity; exceeding it is fatal.
    pub stack_size: usize,
    /// Maximum call depth; exceeding it is fatal.
    pub max_frames: usize,
}

impl VmConfig {
    /// Defaults overridden by `BROOK_STACK_SIZE` / `BROOK_MAX_FRAMES` when
    /// they hold a positive integer.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stack_size: env_usize(STACK_SIZE_ENV).unwrap_or(defaults.stack_size),
            max_frames: env_usize(MAX_FRAMES_ENV).unwrap_or(defaults.max_frames),
        }
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!("ignoring {}={:?}: expected a positive integer", key, raw);
            None
        }
    }
}

/// Compiler switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Reject annotated bindings whose initializer has an incompatible type.
    pub type_check: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { type_check: true }
    }
}
