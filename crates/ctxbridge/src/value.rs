//! Script values held by the host.

use core::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::abi::ValuePtr;
use crate::context::{Context, ContextInner};
use crate::error::{BridgeError, Result};

/// Result of a script run.
///
/// A value keeps its context, and through it the isolate, alive: closing the
/// last [`Context`] handle does not release the context while values derived
/// from it are still around. The native value is released on drop.
pub struct Value {
    /// Engine-side handle
    ptr: ValuePtr,
    /// Producing context
    context: Arc<ContextInner>,
}

impl Value {
    pub(crate) fn new(ptr: ValuePtr, context: Arc<ContextInner>) -> Self {
        Self { ptr, context }
    }

    /// Context that produced this value.
    pub fn context(&self) -> Context {
        Context::from_inner(Arc::clone(&self.context))
    }

    /// Convert to JSON. `undefined` becomes `null`.
    ///
    /// # Errors
    /// Returns [`BridgeError::ContextDisposed`] after the context was closed,
    /// or an engine error if the value cannot be converted.
    pub fn to_json(&self) -> Result<JsonValue> {
        self.ensure_live()?;
        Ok(self.context.engine().value_to_json(self.ptr)?)
    }

    /// Convert with script `String(value)` semantics.
    ///
    /// # Errors
    /// Returns [`BridgeError::ContextDisposed`] after the context was closed,
    /// or an engine error if the conversion throws.
    pub fn to_js_string(&self) -> Result<String> {
        self.ensure_live()?;
        let engine = self.context.engine();
        let foreign = engine.value_to_string(self.ptr)?;
        let text = engine.string_read(foreign).unwrap_or_default();
        engine.string_free(foreign);
        Ok(text)
    }

    /// Numeric value, if this is a number.
    ///
    /// # Errors
    /// Same as [`Value::to_json`].
    pub fn as_f64(&self) -> Result<Option<f64>> {
        Ok(self.to_json()?.as_f64())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.context.is_closed() {
            return Err(BridgeError::ContextDisposed(self.context.reference()));
        }
        Ok(())
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        self.context.engine().value_free(self.ptr);
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Value")
            .field("ptr", &self.ptr)
            .field("context", &self.context.reference())
            .finish()
    }
}
