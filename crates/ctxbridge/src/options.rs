//! Context creation options.

use crate::isolate::Isolate;
use crate::template::ObjectTemplate;

/// One optional input to [`crate::Bridge::new_context`].
#[derive(Debug, Clone)]
pub enum ContextOption {
    /// Host the context in an existing isolate
    Isolate(Isolate),
    /// Shape the global object
    GlobalTemplate(ObjectTemplate),
}

impl ContextOption {
    /// Write this option into `options`, replacing any earlier value.
    pub fn apply(self, options: &mut ContextOptions) {
        match self {
            Self::Isolate(isolate) => options.isolate = Some(isolate),
            Self::GlobalTemplate(template) => options.global_template = Some(template),
        }
    }
}

impl From<Isolate> for ContextOption {
    fn from(isolate: Isolate) -> Self {
        Self::Isolate(isolate)
    }
}

impl From<ObjectTemplate> for ContextOption {
    fn from(template: ObjectTemplate) -> Self {
        Self::GlobalTemplate(template)
    }
}

/// Accumulated options. Unset fields are defaulted at context creation: a
/// fresh isolate and an empty global template.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Isolate to host the context in
    pub isolate: Option<Isolate>,
    /// Global object template
    pub global_template: Option<ObjectTemplate>,
}

impl ContextOptions {
    /// No options set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `options` in order.
    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ContextOption>,
    {
        let mut resolved = Self::default();
        for option in options {
            option.into().apply(&mut resolved);
        }
        resolved
    }

    /// Use `isolate`.
    #[must_use]
    pub fn with_isolate(mut self, isolate: Isolate) -> Self {
        self.isolate = Some(isolate);
        self
    }

    /// Use `template` for the global object.
    #[must_use]
    pub fn with_global_template(mut self, template: ObjectTemplate) -> Self {
        self.global_template = Some(template);
        self
    }
}

impl<T: Into<ContextOption>> FromIterator<T> for ContextOptions {
    fn from_iter<I: IntoIterator<Item = T>>(options: I) -> Self {
        Self::from_options(options)
    }
}
