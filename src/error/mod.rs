//! Error types for compilation, serialization and execution.

use crate::span::Span;
use thiserror::Error;

/// Bytecode compilation errors. Compilation stops at the first one.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Undefined variable '{0}' at {1}")]
    UndefinedVariable(String, Span),

    #[error("Cannot assign to constant '{0}' at {1}")]
    AssignToConst(String, Span),

    #[error("Cannot assign to captured variable '{0}' at {1}")]
    AssignToCaptured(String, Span),

    #[error("'break' outside of a loop at {0}")]
    BreakOutsideLoop(Span),

    #[error("'continue' outside of a loop at {0}")]
    ContinueOutsideLoop(Span),

    #[error("Type mismatch: expected {expected}, found {found} at {span}")]
    TypeMismatch {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Invalid assignment target at {0}")]
    InvalidAssignmentTarget(Span),

    #[error("'spawn' requires a call expression at {0}")]
    InvalidSpawn(Span),

    #[error("Function declaration requires a name at {0}")]
    MissingFunctionName(Span),

    #[error("Too many {what} (limit {limit}) at {span}")]
    LimitExceeded {
        what: &'static str,
        limit: usize,
        span: Span,
    },

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>, span: Span) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn limit(what: &'static str, limit: usize, span: Span) -> Self {
        Self::LimitExceeded { what, limit, span }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UndefinedVariable(_, span) => *span,
            Self::AssignToConst(_, span) => *span,
            Self::AssignToCaptured(_, span) => *span,
            Self::BreakOutsideLoop(span) => *span,
            Self::ContinueOutsideLoop(span) => *span,
            Self::TypeMismatch { span, .. } => *span,
            Self::InvalidAssignmentTarget(span) => *span,
            Self::InvalidSpawn(span) => *span,
            Self::MissingFunctionName(span) => *span,
            Self::LimitExceeded { span, .. } => *span,
            Self::General { span, .. } => *span,
        }
    }
}

/// Errors while encoding, decoding or locating a compiled unit.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("Failed to encode compiled unit: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode compiled unit: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Not a compiled unit (bad header)")]
    BadHeader,

    #[error("Unsupported bytecode format version {0}")]
    UnsupportedVersion(u8),

    #[error("Embedded payload is truncated: need {needed} bytes, have {available}")]
    Truncated { needed: u64, available: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// VM-fatal runtime errors. These unwind the whole VM invocation and are
/// never visible to language-level `try/catch`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Division by zero at {0}")]
    DivisionByZero(Span),

    #[error("Cannot call non-function value of type {0} at {1}")]
    NotCallable(String, Span),

    #[error("Wrong number of arguments: expected {expected}, got {got} at {span}")]
    WrongArity {
        expected: usize,
        got: usize,
        span: Span,
    },

    #[error("Type error: {message} at {span}")]
    TypeError { message: String, span: Span },

    #[error("Index out of bounds: {index} (length {length}) at {span}")]
    IndexOutOfBounds {
        index: i64,
        length: usize,
        span: Span,
    },

    #[error("No field '{field}' on {type_name} at {span}")]
    NoSuchField {
        type_name: String,
        field: String,
        span: Span,
    },

    #[error("Stack overflow at {0}")]
    StackOverflow(Span),

    #[error("Too many nested calls at {0}")]
    FrameOverflow(Span),

    #[error("Uncaught exception: {message} at {span}")]
    UncaughtException { message: String, span: Span },

    #[error("Cannot import '{path}': {message} at {span}")]
    UnresolvedImport {
        path: String,
        message: String,
        span: Span,
    },

    #[error("Spawned task failed: {message} at {span}")]
    TaskFailed { message: String, span: Span },

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn division_by_zero(span: Span) -> Self {
        Self::DivisionByZero(span)
    }

    pub fn not_callable(type_name: impl Into<String>, span: Span) -> Self {
        Self::NotCallable(type_name.into(), span)
    }

    pub fn wrong_arity(expected: usize, got: usize, span: Span) -> Self {
        Self::WrongArity {
            expected,
            got,
            span,
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::TypeError {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::DivisionByZero(span) => *span,
            Self::NotCallable(_, span) => *span,
            Self::WrongArity { span, .. } => *span,
            Self::TypeError { span, .. } => *span,
            Self::IndexOutOfBounds { span, .. } => *span,
            Self::NoSuchField { span, .. } => *span,
            Self::StackOverflow(span) => *span,
            Self::FrameOverflow(span) => *span,
            Self::UncaughtException { span, .. } => *span,
            Self::UnresolvedImport { span, .. } => *span,
            Self::TaskFailed { span, .. } => *span,
            Self::General { span, .. } => *span,
        }
    }

    fn span_mut(&mut self) -> &mut Span {
        match self {
            Self::DivisionByZero(span) => span,
            Self::NotCallable(_, span) => span,
            Self::WrongArity { span, .. } => span,
            Self::TypeError { span, .. } => span,
            Self::IndexOutOfBounds { span, .. } => span,
            Self::NoSuchField { span, .. } => span,
            Self::StackOverflow(span) => span,
            Self::FrameOverflow(span) => span,
            Self::UncaughtException { span, .. } => span,
            Self::UnresolvedImport { span, .. } => span,
            Self::TaskFailed { span, .. } => span,
            Self::General { span, .. } => span,
        }
    }

    /// Fill in the source position if the error does not carry one yet.
    pub fn at(mut self, span: Span) -> Self {
        let current = self.span_mut();
        if current.is_unknown() {
            *current = span;
        }
        self
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum BrookError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Bytecode error: {0}")]
    Serialize(#[from] SerializeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
