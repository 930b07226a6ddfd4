//! VM errors
//!
//! Script failures and structural misuse are kept apart: the former are
//! caught at the link boundary and reported to the host, the latter are
//! programmer errors that fail fast.

use thiserror::Error;

/// Result of executing script code
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Result of a thread-level operation
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Errors raised by running script code
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),

    #[error("attempt to index a {0} value")]
    NotIndexable(&'static str),

    #[error("attempt to perform arithmetic ({op}) on {lhs} and {rhs}")]
    Arithmetic {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("attempt to compare {lhs} with {rhs}")]
    Comparison {
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("invalid table key: {0}")]
    InvalidKey(&'static str),

    #[error("bad argument #{index} to '{function}' ({expected} expected)")]
    BadArgument {
        index: usize,
        function: String,
        expected: &'static str,
    },

    #[error("no binding named '{0}'")]
    MissingBinding(String),

    #[error("error in '{name}': {message}")]
    Native { name: String, message: String },
}

/// Structural misuse of the runtime (programmer error)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("Attempted to change a destroyed thread group")]
    GroupDestroyed,

    #[error("Can't change a wait counter by a negative number: {0}")]
    NegativeWait(i32),

    #[error("Call stack depth limit exceeded ({0} frames)")]
    CallDepthExceeded(usize),

    #[error("yield called outside a running thread")]
    NotRunning,

    #[error("thread is already running")]
    AlreadyRunning,

    #[error("cannot resume a dead thread")]
    DeadThread,

    #[error("thread is busy executing and cannot be modified")]
    ThreadBusy,

    #[error("thread was destroyed while executing")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Anything that can stop a thread's resume slice
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThreadError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Structural(#[from] StructuralError),
}

impl ThreadError {
    /// Whether this is a script-level failure
    pub fn is_script(&self) -> bool {
        matches!(self, ThreadError::Script(_))
    }
}
