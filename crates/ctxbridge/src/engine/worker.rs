//! Isolate worker thread.
//!
//! boa contexts are `!Send`, so every context of an isolate lives on one
//! dedicated thread. The engine talks to it with [`Command`]s and blocks on
//! the reply channel carried by each request.

use core::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender};

use boa_engine::object::JsObject;
use boa_engine::property::Attribute;
use boa_engine::{
    Context, JsError as BoaError, JsNativeError, JsString, JsValue, NativeFunction, Source,
    js_string,
};
use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use super::conversion::{js_value_to_json, json_to_js_value};
use crate::abi::{
    CallbackHandler, ContextPtr, EngineError, GlobalEntry, GlobalShape, IsolatePtr, ReferenceId,
    ValuePtr,
};

thread_local! {
    /// Host entry point for template functions running on this worker.
    static CALLBACK_HANDLER: RefCell<Option<Arc<dyn CallbackHandler>>> =
        const { RefCell::new(None) };

    /// Isolates blocked on the command this worker is handling, itself last.
    static WAITING: RefCell<Vec<IsolatePtr>> = const { RefCell::new(Vec::new()) };
}

/// Reply side of a request.
pub(super) type Reply<T> = SyncSender<Result<T, EngineError>>;

/// A command plus every isolate blocked, directly or through callbacks, on
/// its reply.
pub(super) struct Envelope {
    /// Isolates that cannot serve requests until this command completes
    pub waiting: Vec<IsolatePtr>,
    /// The command itself
    pub command: Command,
}

impl Envelope {
    /// Envelope for a command nobody waits on.
    pub(super) fn detached(command: Command) -> Self {
        Self {
            waiting: Vec::new(),
            command,
        }
    }
}

/// Isolates blocked on the current thread; empty outside worker threads.
pub(super) fn waiting_isolates() -> Vec<IsolatePtr> {
    WAITING.with(|waiting| waiting.borrow().clone())
}

/// Request sent to an isolate worker.
pub(super) enum Command {
    /// Build a context under a pre-allocated handle
    NewContext {
        /// Handle to store the context under
        context: ContextPtr,
        /// Global object shape
        global: GlobalShape,
        /// Id reported to the callback handler
        reference: ReferenceId,
        /// Completion
        reply: Reply<()>,
    },
    /// Drop a context and its values
    FreeContext(ContextPtr),
    /// Evaluate a script, storing a successful result under `value`
    RunScript {
        /// Target context
        context: ContextPtr,
        /// Handle to store the result under
        value: ValuePtr,
        /// Script text
        source: String,
        /// Script origin label
        origin: String,
        /// Outcome
        reply: Reply<ScriptOutcome>,
    },
    /// Drop a stored value
    FreeValue(ValuePtr),
    /// Convert a stored value to JSON
    ValueToJson {
        /// Value to convert
        value: ValuePtr,
        /// Converted value
        reply: Reply<JsonValue>,
    },
    /// Convert a stored value with `String(value)` semantics
    ValueToString {
        /// Value to convert
        value: ValuePtr,
        /// Converted string
        reply: Reply<String>,
    },
    /// Stop the worker loop
    Shutdown,
}

/// Result of a script run as seen by the worker.
pub(super) enum ScriptOutcome {
    /// The result was stored under the requested value handle
    Stored,
    /// The script threw or failed to parse
    Failed(ScriptFailure),
}

/// Host-independent description of a script error.
pub(super) struct ScriptFailure {
    /// `Name: message`
    pub message: String,
    /// `origin[:line:column]`
    pub location: String,
    /// Stack trace, synthesised when the engine provides none
    pub stack: String,
}

/// State owned by the worker thread.
struct Worker {
    /// Isolate this worker backs
    isolate: IsolatePtr,
    /// Live contexts
    contexts: HashMap<ContextPtr, Context>,
    /// Stored values with their owning context
    values: HashMap<ValuePtr, (ContextPtr, JsValue)>,
}

/// Worker thread body. Returns when [`Command::Shutdown`] arrives or every
/// sender is gone.
pub(super) fn run(
    isolate: IsolatePtr,
    handler: Arc<dyn CallbackHandler>,
    commands: Receiver<Envelope>,
) {
    CALLBACK_HANDLER.with(|cell| *cell.borrow_mut() = Some(handler));
    debug!(isolate = isolate.0, "isolate worker started");

    let mut worker = Worker {
        isolate,
        contexts: HashMap::new(),
        values: HashMap::new(),
    };
    while let Ok(Envelope {
        mut waiting,
        command,
    }) = commands.recv()
    {
        if matches!(command, Command::Shutdown) {
            break;
        }
        waiting.push(isolate);
        WAITING.with(|cell| *cell.borrow_mut() = waiting);
        worker.handle(command);
        WAITING.with(|cell| cell.borrow_mut().clear());
    }

    // Values reference objects of their contexts; release them first.
    worker.values.clear();
    worker.contexts.clear();
    CALLBACK_HANDLER.with(|cell| drop(cell.borrow_mut().take()));
    debug!(isolate = isolate.0, "isolate worker stopped");
}

impl Worker {
    /// Dispatch one command. A dropped reply receiver means the caller gave
    /// up waiting, which is not an error here.
    fn handle(&mut self, command: Command) {
        match command {
            Command::NewContext {
                context,
                global,
                reference,
                reply,
            } => {
                drop(reply.send(self.new_context(context, &global, reference)));
            }
            Command::FreeContext(context) => self.free_context(context),
            Command::RunScript {
                context,
                value,
                source,
                origin,
                reply,
            } => {
                drop(reply.send(self.run_script(context, value, &source, &origin)));
            }
            Command::FreeValue(value) => {
                self.values.remove(&value);
            }
            Command::ValueToJson { value, reply } => {
                drop(reply.send(self.value_to_json(value)));
            }
            Command::ValueToString { value, reply } => {
                drop(reply.send(self.value_to_string(value)));
            }
            Command::Shutdown => {}
        }
    }

    fn new_context(
        &mut self,
        handle: ContextPtr,
        global: &GlobalShape,
        reference: ReferenceId,
    ) -> Result<(), EngineError> {
        let mut context = Context::default();
        for entry in &global.entries {
            install_global(&mut context, entry, reference)
                .map_err(|err| EngineError::Conversion(err.to_string()))?;
        }
        self.contexts.insert(handle, context);
        debug!(
            isolate = self.isolate.0,
            context = handle.0,
            %reference,
            globals = global.entries.len(),
            "context created"
        );
        Ok(())
    }

    fn free_context(&mut self, handle: ContextPtr) {
        self.values.retain(|_, (owner, _)| *owner != handle);
        if self.contexts.remove(&handle).is_some() {
            debug!(isolate = self.isolate.0, context = handle.0, "context freed");
        }
    }

    fn run_script(
        &mut self,
        handle: ContextPtr,
        value: ValuePtr,
        source: &str,
        origin: &str,
    ) -> Result<ScriptOutcome, EngineError> {
        let context = self
            .contexts
            .get_mut(&handle)
            .ok_or(EngineError::UnknownContext(handle))?;
        trace!(context = handle.0, origin, "evaluating script");

        let evaluated = context.eval(Source::from_bytes(source).with_path(Path::new(origin)));
        drop(context.run_jobs());

        match evaluated {
            Ok(result) => {
                self.values.insert(value, (handle, result));
                Ok(ScriptOutcome::Stored)
            }
            Err(err) => Ok(ScriptOutcome::Failed(describe_error(&err, origin, context))),
        }
    }

    /// Resolve a stored value together with its context.
    fn resolve(&mut self, value: ValuePtr) -> Result<(JsValue, &mut Context), EngineError> {
        let (owner, stored) = self
            .values
            .get(&value)
            .ok_or(EngineError::UnknownValue(value))?;
        let stored = stored.clone();
        let context = self
            .contexts
            .get_mut(owner)
            .ok_or(EngineError::UnknownValue(value))?;
        Ok((stored, context))
    }

    fn value_to_json(&mut self, value: ValuePtr) -> Result<JsonValue, EngineError> {
        let (stored, context) = self.resolve(value)?;
        js_value_to_json(&stored, context).map_err(|err| EngineError::Conversion(err.to_string()))
    }

    fn value_to_string(&mut self, value: ValuePtr) -> Result<String, EngineError> {
        let (stored, context) = self.resolve(value)?;
        stored
            .to_string(context)
            .map(|text| text.to_std_string_escaped())
            .map_err(|err| EngineError::Conversion(err.to_string()))
    }
}

/// Install one template entry on the global object.
fn install_global(
    context: &mut Context,
    entry: &GlobalEntry,
    reference: ReferenceId,
) -> Result<(), BoaError> {
    match entry {
        GlobalEntry::Property { name, value } => {
            let converted = json_to_js_value(value, context)?;
            context.register_global_property(
                js_string!(name.as_str()),
                converted,
                Attribute::all(),
            )
        }
        GlobalEntry::Function { name, slot } => context.register_global_callable(
            js_string!(name.as_str()),
            0,
            host_function(reference, *slot),
        ),
    }
}

/// Script function forwarding its arguments to the host.
///
/// The closure captures only the reference id and slot; the handler is
/// resolved from the worker's thread-local at call time.
fn host_function(reference: ReferenceId, slot: u32) -> NativeFunction {
    NativeFunction::from_copy_closure(move |_this, args, context| {
        let mut converted = Vec::with_capacity(args.len());
        for arg in args {
            converted.push(js_value_to_json(arg, context)?);
        }
        let handler = CALLBACK_HANDLER
            .with(|cell| cell.borrow().clone())
            .ok_or_else(|| JsNativeError::error().with_message("no host callback handler"))?;

        trace!(%reference, slot, "host callback");
        let result = handler
            .invoke(reference, slot, converted)
            .map_err(|message| JsNativeError::error().with_message(message))?;
        json_to_js_value(&result, context)
    })
}

/// Turn a thrown value into message, location and stack strings.
fn describe_error(err: &BoaError, origin: &str, context: &mut Context) -> ScriptFailure {
    let thrown = err.to_opaque(context);
    let (message, stack) = match thrown.as_object() {
        Some(object) => {
            let name = string_property(&object, js_string!("name"), context);
            let text = string_property(&object, js_string!("message"), context);
            let message = match (name, text) {
                (Some(name), Some(text)) if !text.is_empty() => format!("{name}: {text}"),
                (Some(name), _) => name,
                (None, Some(text)) => text,
                (None, None) => thrown.display().to_string(),
            };
            let stack = string_property(&object, js_string!("stack"), context);
            (message, stack)
        }
        None => (format!("Uncaught {}", thrown.display()), None),
    };

    let location = match position_from_message(&message) {
        Some((line, column)) => format!("{origin}:{line}:{column}"),
        None => origin.to_owned(),
    };
    let stack = stack
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| format!("{message}\n    at {location}"));
    ScriptFailure {
        message,
        location,
        stack,
    }
}

/// Read a string-valued property, ignoring getters that throw.
fn string_property(object: &JsObject, key: JsString, context: &mut Context) -> Option<String> {
    let value = object.get(key, context).ok()?;
    value.as_string().map(|text| text.to_std_string_escaped())
}

/// Extract `line N, col M` from a parser message.
fn position_from_message(message: &str) -> Option<(u32, u32)> {
    let (_, tail) = message.rsplit_once("line ")?;
    let (line, rest) = tail.split_once(',')?;
    let column = rest.trim_start().strip_prefix("col")?.trim_start();
    let digits: String = column.chars().take_while(char::is_ascii_digit).collect();
    Some((line.trim().parse().ok()?, digits.parse().ok()?))
}
