//! Global object templates and host functions.

use core::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::abi::{GlobalEntry, GlobalShape};
use crate::context::Context;

/// Host function callable from scripts.
///
/// Returning `Err(message)` throws an `Error` with that message into the
/// calling script.
pub type FunctionCallback =
    Arc<dyn Fn(&FunctionCallbackInfo) -> Result<JsonValue, String> + Send + Sync>;

/// Arguments of one host function call.
pub struct FunctionCallbackInfo {
    /// Context the calling script runs in
    context: Context,
    /// Arguments converted to JSON
    args: Vec<JsonValue>,
}

impl FunctionCallbackInfo {
    pub(crate) fn new(context: Context, args: Vec<JsonValue>) -> Self {
        Self { context, args }
    }

    /// Context the calling script runs in.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// All arguments.
    pub fn args(&self) -> &[JsonValue] {
        &self.args
    }

    /// Argument `index`, `null` when missing.
    pub fn arg(&self, index: usize) -> &JsonValue {
        self.args.get(index).unwrap_or(&JsonValue::Null)
    }
}

/// Template entry as stored on the host side.
#[derive(Clone)]
enum TemplateEntry {
    /// Data property
    Property(JsonValue),
    /// Host function
    Function(FunctionCallback),
}

/// Shape of a context's global object.
///
/// Later entries with the same name replace earlier ones.
#[derive(Clone, Default)]
pub struct ObjectTemplate {
    /// Named entries in insertion order
    entries: Vec<(String, TemplateEntry)>,
}

impl ObjectTemplate {
    /// Empty template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a global data property.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> &mut Self {
        self.insert(name.into(), TemplateEntry::Property(value.into()));
        self
    }

    /// Add a global host function.
    pub fn set_function<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&FunctionCallbackInfo) -> Result<JsonValue, String> + Send + Sync + 'static,
    {
        self.insert(name.into(), TemplateEntry::Function(Arc::new(callback)));
        self
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the template defines nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: String, entry: TemplateEntry) {
        if let Some(slot) = self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            slot.1 = entry;
        } else {
            self.entries.push((name, entry));
        }
    }

    /// Lower to the engine shape plus the callbacks indexed by slot.
    pub(crate) fn lower(&self) -> (GlobalShape, Vec<FunctionCallback>) {
        let mut shape = GlobalShape::default();
        let mut callbacks = Vec::new();
        for (name, entry) in &self.entries {
            match entry {
                TemplateEntry::Property(value) => shape.entries.push(GlobalEntry::Property {
                    name: name.clone(),
                    value: value.clone(),
                }),
                TemplateEntry::Function(callback) => {
                    shape.entries.push(GlobalEntry::Function {
                        name: name.clone(),
                        slot: callbacks.len() as u32,
                    });
                    callbacks.push(Arc::clone(callback));
                }
            }
        }
        (shape, callbacks)
    }
}

impl fmt::Debug for ObjectTemplate {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.entries.iter().map(|(name, _)| name.as_str()).collect();
        formatter
            .debug_struct("ObjectTemplate")
            .field("entries", &names)
            .finish()
    }
}
