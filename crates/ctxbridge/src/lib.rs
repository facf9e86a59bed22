//! Host-side bridge to a script engine reachable only through a minimal,
//! handle-based ABI.
//!
//! This crate provides:
//! - [`abi`]: the engine boundary, exchanging integer handles only
//! - [`engine::BoaEngine`]: the default engine, one boa worker per isolate
//! - [`registry::HandleRegistry`]: the reference-id table engine callbacks
//!   resolve through
//! - [`Context`], [`Isolate`], [`Value`]: host objects with explicit and
//!   drop-based disposal
//! - [`Bridge`]: the service object creating all of the above
//!
//! ```no_run
//! use ctxbridge::{Bridge, ContextOptions};
//!
//! # fn main() -> ctxbridge::Result<()> {
//! let bridge = Bridge::new();
//! let context = bridge.new_context(ContextOptions::new())?;
//! let value = context.run_script("1 + 1", "example.js")?;
//! assert_eq!(value.map(|value| value.as_f64()).transpose()?.flatten(), Some(2.0));
//! context.close();
//! # Ok(())
//! # }
//! ```
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        reason = "Allow for tests"
    )
)]

/// Engine ABI: handles, tagged results and the engine trait.
pub mod abi;
/// Service object pairing an engine with a registry.
mod bridge;
/// Execution contexts.
mod context;
/// boa-backed engine.
pub mod engine;
/// Host error types.
mod error;
/// Isolates.
mod isolate;
/// Tagged result translation.
mod marshal;
/// Context creation options.
mod options;
/// Reference-counted handle table.
pub mod registry;
/// Global templates and host functions.
mod template;
/// Script values.
mod value;

pub use abi::ReferenceId;
pub use bridge::Bridge;
pub use context::Context;
pub use engine::{BoaEngine, EngineConfig};
pub use error::{BridgeError, JsError, Result};
pub use isolate::Isolate;
pub use options::{ContextOption, ContextOptions};
pub use template::{FunctionCallback, FunctionCallbackInfo, ObjectTemplate};
pub use value::Value;
