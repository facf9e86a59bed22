//! Shared engine instances.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::abi::{Engine, IsolatePtr};

/// State shared by every handle to one isolate.
pub(crate) struct IsolateInner {
    /// Engine-side handle
    ptr: IsolatePtr,
    /// Engine hosting the isolate
    engine: Arc<dyn Engine>,
    /// Set once the isolate has been disposed
    disposed: AtomicBool,
}

impl Drop for IsolateInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl IsolateInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.engine.isolate_dispose(self.ptr);
        debug!(isolate = self.ptr.0, "isolate released");
    }
}

/// Engine instance hosting one or more contexts.
///
/// Cloning yields another handle to the same isolate. Every context keeps a
/// handle, so the isolate lives until its last context and handle are gone
/// or [`Isolate::dispose`] is called.
#[derive(Clone)]
pub struct Isolate {
    /// Shared state
    inner: Arc<IsolateInner>,
}

impl Isolate {
    pub(crate) fn new(ptr: IsolatePtr, engine: Arc<dyn Engine>) -> Self {
        Self {
            inner: Arc::new(IsolateInner {
                ptr,
                engine,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Terminate the isolate and every context it hosts. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the isolate was disposed or its engine instance stopped.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
            || !self.inner.engine.isolate_is_alive(self.inner.ptr)
    }

    pub(crate) fn ptr(&self) -> IsolatePtr {
        self.inner.ptr
    }

    /// Whether this isolate is hosted by `engine`.
    pub(crate) fn belongs_to(&self, engine: &Arc<dyn Engine>) -> bool {
        Arc::as_ptr(&self.inner.engine).cast::<()>() == Arc::as_ptr(engine).cast::<()>()
    }
}

impl PartialEq for Isolate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Isolate {}

impl core::fmt::Debug for Isolate {
    fn fmt(&self, formatter: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        formatter
            .debug_struct("Isolate")
            .field("ptr", &self.inner.ptr)
            .field("disposed", &self.inner.disposed.load(Ordering::Acquire))
            .finish()
    }
}
