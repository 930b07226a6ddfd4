//! Host-facing errors

use thiserror::Error;

use crate::runtime::persist::ObjId;
use crate::vm::errors::{ScriptError, StructuralError, ThreadError};

/// Errors reported by links, thread groups and the runtime driver
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    /// Script code failed while a link was running it
    #[error("{context}: {source}")]
    Script {
        context: String,
        #[source]
        source: ScriptError,
    },

    /// Script referenced a host binding that doesn't exist
    #[error("{context}: no binding named '{name}'")]
    MissingBinding { context: String, name: String },

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error(transparent)]
    Structural(#[from] StructuralError),
}

impl LinkError {
    /// Attach `context` to an error that stopped a thread
    pub fn from_thread(
        context: impl Into<String>,
        err: ThreadError,
    ) -> Self {
        match err {
            ThreadError::Script(ScriptError::MissingBinding(name)) => LinkError::MissingBinding {
                context: context.into(),
                name,
            },
            ThreadError::Script(source) => LinkError::Script {
                context: context.into(),
                source,
            },
            ThreadError::Structural(err) => LinkError::Structural(err),
        }
    }
}

/// Errors raised while saving or restoring a snapshot
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Unsupported snapshot format version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("Reference to unknown object {0}")]
    Dangling(ObjId),

    #[error("Object {id} is not a {expected}")]
    KindMismatch { id: ObjId, expected: &'static str },

    #[error("Unknown native function '{0}'")]
    UnknownNative(String),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Cannot save while a thread is executing")]
    Busy,

    #[error("RON encode error: {0}")]
    RonEncode(#[from] ron::Error),

    #[error("RON decode error: {0}")]
    RonDecode(#[from] ron::error::SpannedError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
