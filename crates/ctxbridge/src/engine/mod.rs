//! boa-backed implementation of the engine ABI.
//!
//! Every isolate is a worker thread owning its boa contexts (see
//! [`worker`]). Handles handed out through the ABI are plain integers routed
//! to the owning worker; error strings are parked in an engine-owned table
//! until the caller frees them.

mod conversion;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::abi::{
    CallbackHandler, ContextPtr, Engine, EngineError, ForeignStr, GlobalShape, IsolatePtr,
    ReferenceId, RtnError, RtnValue, ValuePtr,
};
use worker::{Command, Envelope, Reply, ScriptOutcome};

/// Settings for isolate worker threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Thread name prefix; the isolate handle is appended
    pub thread_name: String,
    /// Worker stack size in bytes, platform default when unset
    pub stack_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_name: "ctxbridge-isolate".to_owned(),
            stack_size: None,
        }
    }
}

/// Channel and thread of one isolate.
struct IsolateWorker {
    /// Command queue
    commands: Sender<Envelope>,
    /// Worker thread id, used to detect re-entrant calls
    thread_id: ThreadId,
    /// Join handle, taken on dispose
    thread: JoinHandle<()>,
}

/// Engine implementation running boa on one thread per isolate.
pub struct BoaEngine {
    /// Worker settings
    config: EngineConfig,
    /// Inbound callback entry point shared by all workers
    handler: Arc<dyn CallbackHandler>,
    /// Live isolates
    isolates: RwLock<HashMap<IsolatePtr, IsolateWorker>>,
    /// Owning isolate of every live context and value handle
    routes: RwLock<HashMap<u64, IsolatePtr>>,
    /// Engine-owned strings awaiting release
    strings: Mutex<HashMap<ForeignStr, String>>,
    /// Source of isolate, context, value and string handles
    sequence: AtomicU64,
}

impl BoaEngine {
    /// Create an engine whose template functions call `handler`.
    pub fn new(handler: Arc<dyn CallbackHandler>) -> Self {
        Self::with_config(handler, EngineConfig::default())
    }

    /// Create an engine with explicit worker settings.
    pub fn with_config(handler: Arc<dyn CallbackHandler>, config: EngineConfig) -> Self {
        Self {
            config,
            handler,
            isolates: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            strings: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Number of engine-owned strings not yet freed.
    pub fn outstanding_strings(&self) -> usize {
        self.strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of live isolates.
    pub fn isolate_count(&self) -> usize {
        self.isolates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_handle(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Park a string in the engine-owned table.
    fn export_string(&self, text: String) -> ForeignStr {
        let handle = ForeignStr(self.next_handle());
        self.strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, text);
        handle
    }

    fn route(&self, handle: u64) -> Option<IsolatePtr> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .copied()
    }

    fn add_route(&self, handle: u64, isolate: IsolatePtr) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, isolate);
    }

    fn remove_route(&self, handle: u64) -> Option<IsolatePtr> {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
    }

    /// Queue a command without waiting. Dropped if the isolate is gone.
    fn post(&self, isolate: IsolatePtr, command: Command) {
        let isolates = self.isolates.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = isolates.get(&isolate) {
            drop(worker.commands.send(Envelope::detached(command)));
        }
    }

    /// Send a command and block until the worker replies.
    ///
    /// Fails with [`EngineError::Reentrant`] when the target isolate is
    /// already blocked on the current call chain, which would never reply.
    fn request<T>(
        &self,
        isolate: IsolatePtr,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, response) = mpsc::sync_channel(1);
        let waiting = worker::waiting_isolates();
        {
            let isolates = self.isolates.read().unwrap_or_else(PoisonError::into_inner);
            let worker = isolates
                .get(&isolate)
                .ok_or(EngineError::IsolateUnavailable(isolate))?;
            if worker.thread_id == thread::current().id() || waiting.contains(&isolate) {
                return Err(EngineError::Reentrant(isolate));
            }
            worker
                .commands
                .send(Envelope {
                    waiting,
                    command: build(reply),
                })
                .map_err(|_| EngineError::WorkerGone(isolate))?;
        }
        response
            .recv()
            .map_err(|_| EngineError::WorkerGone(isolate))?
    }

    fn spawn_worker(&self, isolate: IsolatePtr) -> Result<IsolateWorker, EngineError> {
        let (commands, receiver) = mpsc::channel();
        let handler = Arc::clone(&self.handler);
        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.config.thread_name, isolate.0));
        if let Some(size) = self.config.stack_size {
            builder = builder.stack_size(size);
        }
        let thread = builder
            .spawn(move || worker::run(isolate, handler, receiver))
            .map_err(|err| EngineError::IsolateCreation(err.to_string()))?;
        Ok(IsolateWorker {
            commands,
            thread_id: thread.thread().id(),
            thread,
        })
    }
}

impl Engine for BoaEngine {
    fn new_isolate(&self) -> Result<IsolatePtr, EngineError> {
        let isolate = IsolatePtr(self.next_handle());
        let worker = self.spawn_worker(isolate)?;
        self.isolates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(isolate, worker);
        debug!(isolate = isolate.0, "isolate created");
        Ok(isolate)
    }

    fn isolate_dispose(&self, isolate: IsolatePtr) {
        let removed = self
            .isolates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&isolate);
        let Some(worker) = removed else {
            return;
        };
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, owner| *owner != isolate);

        drop(worker.commands.send(Envelope::detached(Command::Shutdown)));
        // A callback may dispose its own isolate; the loop exits after it returns.
        if worker.thread_id != thread::current().id() && worker.thread.join().is_err() {
            warn!(isolate = isolate.0, "isolate worker panicked");
        }
        debug!(isolate = isolate.0, "isolate disposed");
    }

    fn isolate_is_alive(&self, isolate: IsolatePtr) -> bool {
        self.isolates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&isolate)
    }

    fn new_context(
        &self,
        isolate: IsolatePtr,
        global: &GlobalShape,
        reference: ReferenceId,
    ) -> Result<ContextPtr, EngineError> {
        let context = ContextPtr(self.next_handle());
        let global = global.clone();
        self.request(isolate, |reply| Command::NewContext {
            context,
            global,
            reference,
            reply,
        })?;
        self.add_route(context.0, isolate);
        Ok(context)
    }

    fn context_free(&self, context: ContextPtr) {
        if let Some(isolate) = self.remove_route(context.0) {
            self.post(isolate, Command::FreeContext(context));
        }
    }

    fn run_script(
        &self,
        context: ContextPtr,
        source: &str,
        origin: &str,
    ) -> Result<RtnValue, EngineError> {
        let isolate = self
            .route(context.0)
            .ok_or(EngineError::UnknownContext(context))?;
        let value = ValuePtr(self.next_handle());
        let outcome = self.request(isolate, |reply| Command::RunScript {
            context,
            value,
            source: source.to_owned(),
            origin: origin.to_owned(),
            reply,
        })?;

        match outcome {
            ScriptOutcome::Stored => {
                self.add_route(value.0, isolate);
                Ok(RtnValue {
                    value: Some(value),
                    error: RtnError::default(),
                })
            }
            ScriptOutcome::Failed(failure) => Ok(RtnValue {
                value: None,
                error: RtnError {
                    msg: Some(self.export_string(failure.message)),
                    location: Some(self.export_string(failure.location)),
                    stack: Some(self.export_string(failure.stack)),
                },
            }),
        }
    }

    fn value_free(&self, value: ValuePtr) {
        if let Some(isolate) = self.remove_route(value.0) {
            self.post(isolate, Command::FreeValue(value));
        }
    }

    fn value_to_json(&self, value: ValuePtr) -> Result<JsonValue, EngineError> {
        let isolate = self.route(value.0).ok_or(EngineError::UnknownValue(value))?;
        self.request(isolate, |reply| Command::ValueToJson { value, reply })
    }

    fn value_to_string(&self, value: ValuePtr) -> Result<ForeignStr, EngineError> {
        let isolate = self.route(value.0).ok_or(EngineError::UnknownValue(value))?;
        let text = self.request(isolate, |reply| Command::ValueToString { value, reply })?;
        Ok(self.export_string(text))
    }

    fn string_read(&self, string: ForeignStr) -> Option<String> {
        self.strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&string)
            .cloned()
    }

    fn string_free(&self, string: ForeignStr) {
        self.strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&string);
    }
}

impl Drop for BoaEngine {
    fn drop(&mut self) {
        let isolates: Vec<IsolatePtr> = self
            .isolates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        for isolate in isolates {
            self.isolate_dispose(isolate);
        }
    }
}
