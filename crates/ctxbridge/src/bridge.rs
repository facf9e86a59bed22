//! Service object tying an engine to its handle registry.

use std::sync::Arc;

use tracing::debug;

use crate::abi::{CallbackHandler, Engine};
use crate::context::{CallbackDispatcher, Context, ContextInner, ContextRegistry};
use crate::engine::{BoaEngine, EngineConfig};
use crate::error::{BridgeError, Result};
use crate::isolate::Isolate;
use crate::options::ContextOptions;

/// Entry point for creating isolates and contexts.
///
/// Each bridge owns one engine and one registry; bridges are fully
/// independent of each other, so tests can build as many as they need.
/// Cloning yields another handle to the same bridge.
#[derive(Clone)]
pub struct Bridge {
    /// Engine behind every isolate of this bridge
    engine: Arc<dyn Engine>,
    /// Reference table consulted by engine callbacks
    registry: Arc<ContextRegistry>,
}

impl Bridge {
    /// Bridge backed by the default boa engine.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Bridge backed by the boa engine with explicit worker settings.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_engine(|handler| -> Arc<dyn Engine> {
            Arc::new(BoaEngine::with_config(handler, config))
        })
    }

    /// Bridge backed by a custom engine. `build` receives the callback
    /// handler the engine must use for template functions.
    pub fn with_engine<F>(build: F) -> Self
    where
        F: FnOnce(Arc<dyn CallbackHandler>) -> Arc<dyn Engine>,
    {
        let registry = Arc::new(ContextRegistry::new());
        let handler: Arc<dyn CallbackHandler> =
            Arc::new(CallbackDispatcher::new(Arc::clone(&registry)));
        Self {
            engine: build(handler),
            registry,
        }
    }

    /// Create a new isolate.
    ///
    /// # Errors
    /// Returns [`BridgeError::IsolateCreation`] if the engine cannot start one.
    pub fn new_isolate(&self) -> Result<Isolate> {
        let ptr = self
            .engine
            .new_isolate()
            .map_err(BridgeError::IsolateCreation)?;
        Ok(Isolate::new(ptr, Arc::clone(&self.engine)))
    }

    /// Create a context from `options`.
    ///
    /// Without an isolate a fresh one is created; without a template the
    /// global object is left empty.
    ///
    /// # Errors
    /// - [`BridgeError::IsolateCreation`] if a default isolate cannot be made
    /// - [`BridgeError::ForeignIsolate`] for an isolate of another bridge
    /// - [`BridgeError::IsolateDisposed`] for a disposed isolate
    /// - [`BridgeError::ContextCreation`] if the engine rejects the context
    pub fn new_context(&self, options: ContextOptions) -> Result<Context> {
        let isolate = match options.isolate {
            Some(isolate) => isolate,
            None => self.new_isolate()?,
        };
        if !isolate.belongs_to(&self.engine) {
            return Err(BridgeError::ForeignIsolate);
        }
        if isolate.is_disposed() {
            return Err(BridgeError::IsolateDisposed);
        }
        let template = options.global_template.unwrap_or_default();
        let (shape, callbacks) = template.lower();

        let reference = self.registry.next_reference();
        let ptr = self
            .engine
            .new_context(isolate.ptr(), &shape, reference)
            .map_err(BridgeError::ContextCreation)?;
        debug!(%reference, context = ptr.0, isolate = isolate.ptr().0, "context ready");

        Ok(Context::from_inner(Arc::new(ContextInner::new(
            reference,
            ptr,
            isolate,
            callbacks,
            Arc::clone(&self.engine),
            Arc::clone(&self.registry),
        ))))
    }

    /// Number of contexts with scripts currently in flight.
    pub fn active_contexts(&self) -> usize {
        self.registry.len()
    }

    /// Outstanding registrations of `context`; zero while it is idle.
    pub fn in_flight(&self, context: &Context) -> usize {
        self.registry.ref_count(context.reference_id())
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}
