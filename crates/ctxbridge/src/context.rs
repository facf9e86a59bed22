//! Execution contexts and their lifecycle.
//!
//! A context is created idle, becomes active while a script runs on it (its
//! reference id is registered so engine callbacks can find it), returns to
//! idle afterwards, and ends disposed once [`Context::close`] is called or
//! the last handle and value are dropped. Drop-based release is a
//! convenience only: a leaked handle leaks the native context.

use core::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use crate::abi::{CallbackHandler, ContextPtr, Engine, ReferenceId};
use crate::error::{BridgeError, Result};
use crate::isolate::Isolate;
use crate::marshal::marshal;
use crate::registry::HandleRegistry;
use crate::template::{FunctionCallback, FunctionCallbackInfo};
use crate::value::Value;

/// Registry type shared by a bridge and its contexts.
pub(crate) type ContextRegistry = HandleRegistry<ContextInner>;

/// State shared by every handle to one context.
pub(crate) struct ContextInner {
    /// Id reported by engine callbacks
    reference: ReferenceId,
    /// Native handle, `None` once disposed
    ptr: Mutex<Option<ContextPtr>>,
    /// Hosting isolate, kept alive by the context
    isolate: Isolate,
    /// Host functions indexed by template slot
    callbacks: Vec<FunctionCallback>,
    /// Engine owning `ptr`
    engine: Arc<dyn Engine>,
    /// Registry used while scripts run
    registry: Arc<ContextRegistry>,
}

impl ContextInner {
    pub(crate) fn new(
        reference: ReferenceId,
        ptr: ContextPtr,
        isolate: Isolate,
        callbacks: Vec<FunctionCallback>,
        engine: Arc<dyn Engine>,
        registry: Arc<ContextRegistry>,
    ) -> Self {
        Self {
            reference,
            ptr: Mutex::new(Some(ptr)),
            isolate,
            callbacks,
            engine,
            registry,
        }
    }

    pub(crate) fn reference(&self) -> ReferenceId {
        self.reference
    }

    pub(crate) fn engine(&self) -> &dyn Engine {
        &*self.engine
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.ptr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn native(&self) -> Option<ContextPtr> {
        *self.ptr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the native context. Only the first call does anything.
    fn dispose(&self) {
        let taken = self
            .ptr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ptr) = taken {
            self.engine.context_free(ptr);
            debug!(reference = %self.reference, context = ptr.0, "context disposed");
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Execution environment for scripts.
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct Context {
    /// Shared state
    inner: Arc<ContextInner>,
}

impl Context {
    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    /// Id this context is known by on the engine side.
    pub fn reference_id(&self) -> ReferenceId {
        self.inner.reference
    }

    /// Hosting isolate.
    ///
    /// # Errors
    /// Returns [`BridgeError::IsolateDisposed`] once the isolate is gone.
    pub fn isolate(&self) -> Result<Isolate> {
        if self.inner.isolate.is_disposed() {
            return Err(BridgeError::IsolateDisposed);
        }
        Ok(self.inner.isolate.clone())
    }

    /// Evaluate `source`, labelling errors and stack traces with `origin`.
    ///
    /// Blocks until the engine returns. `Ok(None)` means the engine produced
    /// neither a value nor an error.
    ///
    /// # Errors
    /// - [`BridgeError::Script`] if the script throws or does not parse
    /// - [`BridgeError::ContextDisposed`] after [`Context::close`]
    /// - [`BridgeError::IsolateDisposed`] after the isolate was disposed
    /// - [`BridgeError::Engine`] for other engine failures, including
    ///   re-entrant calls from a host function on the same isolate
    pub fn run_script(&self, source: &str, origin: &str) -> Result<Option<Value>> {
        let reference = self.inner.reference;
        let ptr = self
            .inner
            .native()
            .ok_or(BridgeError::ContextDisposed(reference))?;
        if self.inner.isolate.is_disposed() {
            return Err(BridgeError::IsolateDisposed);
        }

        let rtn = {
            let _registration = self.inner.registry.guard(reference, &self.inner);
            trace!(%reference, origin, "running script");
            self.inner.engine.run_script(ptr, source, origin)
        };

        match rtn {
            Ok(rtn) => marshal(&self.inner, rtn),
            Err(err) => Err(self.classify(err.into())),
        }
    }

    /// Release the native context. Safe to call any number of times; values
    /// produced earlier report [`BridgeError::ContextDisposed`] afterwards.
    pub fn close(&self) {
        self.inner.dispose();
    }

    /// Whether [`Context::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Map engine failures caused by a concurrent close or dispose onto the
    /// corresponding host error.
    fn classify(&self, err: BridgeError) -> BridgeError {
        if self.inner.is_closed() {
            return BridgeError::ContextDisposed(self.inner.reference);
        }
        if self.inner.isolate.is_disposed() {
            return BridgeError::IsolateDisposed;
        }
        err
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Context")
            .field("reference", &self.inner.reference)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

/// Routes engine callbacks to host functions through the registry.
pub(crate) struct CallbackDispatcher {
    /// Contexts with scripts in flight
    registry: Arc<ContextRegistry>,
}

impl CallbackDispatcher {
    pub(crate) fn new(registry: Arc<ContextRegistry>) -> Self {
        Self { registry }
    }
}

impl CallbackHandler for CallbackDispatcher {
    fn invoke(
        &self,
        reference: ReferenceId,
        slot: u32,
        args: Vec<JsonValue>,
    ) -> core::result::Result<JsonValue, String> {
        let inner = self
            .registry
            .lookup(reference)
            .ok_or_else(|| format!("context {reference} is not registered"))?;
        let callback = inner
            .callbacks
            .get(slot as usize)
            .map(Arc::clone)
            .ok_or_else(|| format!("context {reference} has no host function in slot {slot}"))?;
        let info = FunctionCallbackInfo::new(Context::from_inner(inner), args);
        callback(&info)
    }
}
