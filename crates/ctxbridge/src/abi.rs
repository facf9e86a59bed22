//! The native engine boundary.
//!
//! Everything that crosses into or out of a script engine goes through the
//! [`Engine`] trait. Its methods only exchange small `Copy` handles and plain
//! data, never host pointers: the host may move or drop its objects at any
//! time, so an engine that wants to reach back into the host (a template
//! function being called, for instance) does so through [`CallbackHandler`]
//! with the [`ReferenceId`] it was given at context creation.

use core::fmt;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Stable integer identifying a host context across the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId(pub u64);

impl fmt::Display for ReferenceId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Engine-side isolate handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsolatePtr(pub u64);

/// Engine-side context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextPtr(pub u64);

/// Engine-side value handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValuePtr(pub u64);

/// Engine-owned string. Must be copied with [`Engine::string_read`] and
/// released with [`Engine::string_free`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignStr(pub u64);

/// Error descriptor of a failed engine call. The error is present iff `msg`
/// is set; every set field is owned by the engine until freed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RtnError {
    /// Error message, e.g. `Error: boom`
    pub msg: Option<ForeignStr>,
    /// Origin of the error, e.g. `t.js:1:7`
    pub location: Option<ForeignStr>,
    /// Stack trace as produced by the engine
    pub stack: Option<ForeignStr>,
}

/// Tagged result of [`Engine::run_script`].
///
/// A well-behaved engine sets at most one of `value` and `error.msg`.
/// Neither being set means the call produced nothing worth reporting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RtnValue {
    /// Handle of the produced value, `None` when the call failed
    pub value: Option<ValuePtr>,
    /// Error descriptor
    pub error: RtnError,
}

/// One entry of a context's global object.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalEntry {
    /// Plain data property
    Property {
        /// Global name
        name: String,
        /// Initial value
        value: JsonValue,
    },
    /// Function calling back into the host through [`CallbackHandler`]
    Function {
        /// Global name
        name: String,
        /// Index passed back to [`CallbackHandler::invoke`]
        slot: u32,
    },
}

/// Shape of a context's global object at creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalShape {
    /// Entries in installation order
    pub entries: Vec<GlobalEntry>,
}

/// Failures of the engine itself, as opposed to script errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine could not create an isolate
    #[error("isolate creation failed: {0}")]
    IsolateCreation(String),

    /// The isolate was disposed or never existed
    #[error("isolate {0:?} is not available")]
    IsolateUnavailable(IsolatePtr),

    /// The context was freed or never existed
    #[error("unknown context {0:?}")]
    UnknownContext(ContextPtr),

    /// The value was freed or never existed
    #[error("unknown value {0:?}")]
    UnknownValue(ValuePtr),

    /// A value could not be converted to the requested representation
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Call into an isolate that is itself waiting on the caller: a host
    /// callback calling back into its own isolate, directly or through a
    /// chain of other isolates' callbacks.
    ///
    /// Only cycles along one call chain are detected. Two unrelated threads
    /// whose callbacks call into each other's isolates can still block each
    /// other.
    #[error("re-entrant call into isolate {0:?} from inside a host callback")]
    Reentrant(IsolatePtr),

    /// The engine instance backing an isolate stopped responding
    #[error("isolate {0:?} worker is gone")]
    WorkerGone(IsolatePtr),
}

/// Inbound entry point used by an engine to call a host function.
pub trait CallbackHandler: Send + Sync {
    /// Invoke callback `slot` of the context registered under `reference`.
    ///
    /// # Errors
    /// Returns a message to be thrown into the script when the context cannot
    /// be resolved or the callback fails.
    fn invoke(
        &self,
        reference: ReferenceId,
        slot: u32,
        args: Vec<JsonValue>,
    ) -> Result<JsonValue, String>;
}

/// Minimal engine ABI.
///
/// Release functions never fail: releasing an unknown handle is a no-op.
pub trait Engine: Send + Sync {
    /// Create a new isolate.
    ///
    /// # Errors
    /// Returns an error if the engine cannot start another instance.
    fn new_isolate(&self) -> Result<IsolatePtr, EngineError>;

    /// Terminate an isolate together with every context it hosts.
    fn isolate_dispose(&self, isolate: IsolatePtr);

    /// Whether the isolate still accepts calls.
    fn isolate_is_alive(&self, isolate: IsolatePtr) -> bool;

    /// Create a context inside `isolate`, shaped by `global`, that reports
    /// `reference` on every callback.
    ///
    /// # Errors
    /// Returns an error if the isolate is unavailable or the global object
    /// cannot be built.
    fn new_context(
        &self,
        isolate: IsolatePtr,
        global: &GlobalShape,
        reference: ReferenceId,
    ) -> Result<ContextPtr, EngineError>;

    /// Release a context and every value it produced.
    fn context_free(&self, context: ContextPtr);

    /// Evaluate `source` in `context`, blocking until the engine returns.
    ///
    /// Script failures are reported in the returned [`RtnValue`]; the outer
    /// `Result` only carries engine failures.
    ///
    /// # Errors
    /// Returns an error if the context or its isolate is unavailable.
    fn run_script(
        &self,
        context: ContextPtr,
        source: &str,
        origin: &str,
    ) -> Result<RtnValue, EngineError>;

    /// Release a value.
    fn value_free(&self, value: ValuePtr);

    /// Convert a value to JSON.
    ///
    /// # Errors
    /// Returns an error if the value is unknown or not representable.
    fn value_to_json(&self, value: ValuePtr) -> Result<JsonValue, EngineError>;

    /// Convert a value to a string with script semantics.
    ///
    /// # Errors
    /// Returns an error if the value is unknown or conversion throws.
    fn value_to_string(&self, value: ValuePtr) -> Result<ForeignStr, EngineError>;

    /// Copy an engine-owned string.
    fn string_read(&self, string: ForeignStr) -> Option<String>;

    /// Release an engine-owned string.
    fn string_free(&self, string: ForeignStr);
}
