//! Shared helpers for integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ctxbridge::abi::{
    CallbackHandler, ContextPtr, Engine, EngineError, ForeignStr, GlobalShape, IsolatePtr,
    ReferenceId, RtnValue, ValuePtr,
};
use ctxbridge::{BoaEngine, Bridge};
use serde_json::Value as JsonValue;

/// How [`CountingEngine`] tampers with script results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tamper {
    /// Pass results through
    None,
    /// Attach a value to every error result
    ValueWithError,
    /// Report neither a value nor an error on success
    Empty,
}

/// Engine wrapper counting calls into the boa engine.
pub struct CountingEngine {
    pub inner: BoaEngine,
    pub runs: AtomicUsize,
    pub context_frees: AtomicUsize,
    pub value_frees: AtomicUsize,
    tamper_with_errors: AtomicBool,
    tamper_with_values: AtomicBool,
}

impl CountingEngine {
    fn new(handler: Arc<dyn CallbackHandler>) -> Self {
        Self {
            inner: BoaEngine::new(handler),
            runs: AtomicUsize::new(0),
            context_frees: AtomicUsize::new(0),
            value_frees: AtomicUsize::new(0),
            tamper_with_errors: AtomicBool::new(false),
            tamper_with_values: AtomicBool::new(false),
        }
    }

    pub fn set_tamper(&self, tamper: Tamper) {
        self.tamper_with_errors
            .store(tamper == Tamper::ValueWithError, Ordering::SeqCst);
        self.tamper_with_values
            .store(tamper == Tamper::Empty, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl Engine for CountingEngine {
    fn new_isolate(&self) -> Result<IsolatePtr, EngineError> {
        self.inner.new_isolate()
    }

    fn isolate_dispose(&self, isolate: IsolatePtr) {
        self.inner.isolate_dispose(isolate);
    }

    fn isolate_is_alive(&self, isolate: IsolatePtr) -> bool {
        self.inner.isolate_is_alive(isolate)
    }

    fn new_context(
        &self,
        isolate: IsolatePtr,
        global: &GlobalShape,
        reference: ReferenceId,
    ) -> Result<ContextPtr, EngineError> {
        self.inner.new_context(isolate, global, reference)
    }

    fn context_free(&self, context: ContextPtr) {
        self.context_frees.fetch_add(1, Ordering::SeqCst);
        self.inner.context_free(context);
    }

    fn run_script(
        &self,
        context: ContextPtr,
        source: &str,
        origin: &str,
    ) -> Result<RtnValue, EngineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut rtn = self.inner.run_script(context, source, origin)?;
        if rtn.error.msg.is_some() && self.tamper_with_errors.load(Ordering::SeqCst) {
            rtn.value = self.inner.run_script(context, "0", "stray.js")?.value;
        }
        if let Some(value) = rtn.value.filter(|_| self.tamper_with_values.load(Ordering::SeqCst)) {
            self.inner.value_free(value);
            rtn.value = None;
        }
        Ok(rtn)
    }

    fn value_free(&self, value: ValuePtr) {
        self.value_frees.fetch_add(1, Ordering::SeqCst);
        self.inner.value_free(value);
    }

    fn value_to_json(&self, value: ValuePtr) -> Result<JsonValue, EngineError> {
        self.inner.value_to_json(value)
    }

    fn value_to_string(&self, value: ValuePtr) -> Result<ForeignStr, EngineError> {
        self.inner.value_to_string(value)
    }

    fn string_read(&self, string: ForeignStr) -> Option<String> {
        self.inner.string_read(string)
    }

    fn string_free(&self, string: ForeignStr) {
        self.inner.string_free(string);
    }
}

/// Bridge backed by a [`CountingEngine`] the test can inspect.
pub fn counting_bridge() -> (Bridge, Arc<CountingEngine>) {
    let mut built = None;
    let bridge = Bridge::with_engine(|handler| -> Arc<dyn Engine> {
        let engine = Arc::new(CountingEngine::new(handler));
        built = Some(Arc::clone(&engine));
        engine
    });
    let engine = built.unwrap_or_else(|| panic!("engine was not built"));
    (bridge, engine)
}
