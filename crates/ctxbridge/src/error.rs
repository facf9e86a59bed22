//! Host-facing error types.

use core::fmt;
use core::result::Result as CoreResult;
use std::error::Error as StdError;

use thiserror::Error;

use crate::abi::{EngineError, ReferenceId};

/// Result type for bridge operations.
pub type Result<T> = CoreResult<T, BridgeError>;

/// Errors returned by the host API.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A new isolate could not be created
    #[error("failed to create new isolate: {0}")]
    IsolateCreation(#[source] EngineError),

    /// The engine refused to create the context
    #[error("failed to create context: {0}")]
    ContextCreation(#[source] EngineError),

    /// The isolate passed in the options belongs to another bridge
    #[error("isolate belongs to a different bridge")]
    ForeignIsolate,

    /// The context was closed before the call
    #[error("context {0} has been disposed")]
    ContextDisposed(ReferenceId),

    /// The isolate was disposed before the call
    #[error("isolate has been disposed")]
    IsolateDisposed,

    /// The script threw or failed to compile
    #[error(transparent)]
    Script(#[from] JsError),

    /// Any other engine failure
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Script error reported by the engine, copied into host memory.
///
/// `{}` formats the message only; `{:#}` adds the location and stack trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsError {
    /// Error message, e.g. `Error: boom`
    pub message: String,
    /// Script origin and position of the failure
    pub location: String,
    /// Stack trace as produced by the engine
    pub stack_trace: String,
}

impl fmt::Display for JsError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !formatter.alternate() {
            return formatter.write_str(&self.message);
        }
        if self.stack_trace.is_empty() {
            return write!(formatter, "{} ({})", self.message, self.location);
        }
        if self.stack_trace.starts_with(&self.message) {
            return formatter.write_str(&self.stack_trace);
        }
        write!(formatter, "{}\n{}", self.message, self.stack_trace)
    }
}

impl StdError for JsError {}
