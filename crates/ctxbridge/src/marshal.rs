//! Translation of tagged engine results into host values and errors.

use std::sync::Arc;

use tracing::warn;

use crate::abi::{Engine, ForeignStr, RtnError, RtnValue};
use crate::context::ContextInner;
use crate::error::{JsError, Result};
use crate::value::Value;

/// Turn a tagged result into a value, nothing, or a script error.
///
/// Error strings are copied and released before returning. A result carrying
/// both a value and an error is treated as an error; the value is released.
pub(crate) fn marshal(context: &Arc<ContextInner>, rtn: RtnValue) -> Result<Option<Value>> {
    let engine = context.engine();
    if let Some(err) = get_error(engine, rtn.error) {
        if let Some(stray) = rtn.value {
            warn!(
                reference = %context.reference(),
                "engine returned both a value and an error; dropping the value"
            );
            engine.value_free(stray);
        }
        return Err(err.into());
    }
    Ok(get_value(context, rtn))
}

/// Wrap the value handle, if any.
fn get_value(context: &Arc<ContextInner>, rtn: RtnValue) -> Option<Value> {
    rtn.value.map(|ptr| Value::new(ptr, Arc::clone(context)))
}

/// Copy the error descriptor into host memory and release the engine's
/// strings, including stray ones left without a message.
pub(crate) fn get_error(engine: &dyn Engine, rtn: RtnError) -> Option<JsError> {
    let message = take_string(engine, rtn.msg);
    let location = take_string(engine, rtn.location);
    let stack_trace = take_string(engine, rtn.stack);
    if rtn.msg.is_none() {
        return None;
    }
    Some(JsError {
        message: message.unwrap_or_default(),
        location: location.unwrap_or_default(),
        stack_trace: stack_trace.unwrap_or_default(),
    })
}

fn take_string(engine: &dyn Engine, string: Option<ForeignStr>) -> Option<String> {
    let handle = string?;
    let copied = engine.string_read(handle);
    engine.string_free(handle);
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::Value as JsonValue;

    use crate::abi::{ContextPtr, EngineError, GlobalShape, IsolatePtr, ReferenceId, ValuePtr};

    /// Engine that only knows about strings and records releases.
    #[derive(Default)]
    struct StringEngine {
        strings: Mutex<HashMap<ForeignStr, String>>,
        freed_values: Mutex<Vec<ValuePtr>>,
    }

    impl StringEngine {
        fn with_strings(strings: &[(u64, &str)]) -> Self {
            let engine = Self::default();
            {
                let mut table = engine.strings.lock().expect("lock");
                for (handle, text) in strings {
                    table.insert(ForeignStr(*handle), (*text).to_owned());
                }
            }
            engine
        }

        fn outstanding(&self) -> usize {
            self.strings.lock().expect("lock").len()
        }
    }

    impl Engine for StringEngine {
        fn new_isolate(&self) -> core::result::Result<IsolatePtr, EngineError> {
            Err(EngineError::IsolateCreation("unsupported".to_owned()))
        }
        fn isolate_dispose(&self, _isolate: IsolatePtr) {}
        fn isolate_is_alive(&self, _isolate: IsolatePtr) -> bool {
            false
        }
        fn new_context(
            &self,
            isolate: IsolatePtr,
            _global: &GlobalShape,
            _reference: ReferenceId,
        ) -> core::result::Result<ContextPtr, EngineError> {
            Err(EngineError::IsolateUnavailable(isolate))
        }
        fn context_free(&self, _context: ContextPtr) {}
        fn run_script(
            &self,
            context: ContextPtr,
            _source: &str,
            _origin: &str,
        ) -> core::result::Result<RtnValue, EngineError> {
            Err(EngineError::UnknownContext(context))
        }
        fn value_free(&self, value: ValuePtr) {
            self.freed_values.lock().expect("lock").push(value);
        }
        fn value_to_json(&self, value: ValuePtr) -> core::result::Result<JsonValue, EngineError> {
            Err(EngineError::UnknownValue(value))
        }
        fn value_to_string(
            &self,
            value: ValuePtr,
        ) -> core::result::Result<ForeignStr, EngineError> {
            Err(EngineError::UnknownValue(value))
        }
        fn string_read(&self, string: ForeignStr) -> Option<String> {
            self.strings.lock().expect("lock").get(&string).cloned()
        }
        fn string_free(&self, string: ForeignStr) {
            self.strings.lock().expect("lock").remove(&string);
        }
    }

    fn descriptor() -> RtnError {
        RtnError {
            msg: Some(ForeignStr(1)),
            location: Some(ForeignStr(2)),
            stack: Some(ForeignStr(3)),
        }
    }

    #[test]
    fn test_error_is_copied_and_released() {
        let engine =
            StringEngine::with_strings(&[(1, "Error: boom"), (2, "t.js:1:7"), (3, "at t.js:1:7")]);

        let err = get_error(&engine, descriptor()).expect("error present");

        assert_eq!(err.message, "Error: boom");
        assert_eq!(err.location, "t.js:1:7");
        assert_eq!(err.stack_trace, "at t.js:1:7");
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_no_message_means_no_error() {
        let engine = StringEngine::with_strings(&[(2, "t.js"), (3, "stack")]);
        let rtn = RtnError {
            msg: None,
            ..descriptor()
        };

        assert!(get_error(&engine, rtn).is_none());
        assert_eq!(engine.outstanding(), 0, "stray strings are still released");
    }

    #[test]
    fn test_empty_descriptor_is_no_error() {
        let engine = StringEngine::default();
        assert!(get_error(&engine, RtnError::default()).is_none());
    }

    #[test]
    fn test_missing_optional_strings_default_to_empty() {
        let engine = StringEngine::with_strings(&[(1, "SyntaxError: bad")]);
        let rtn = RtnError {
            msg: Some(ForeignStr(1)),
            location: None,
            stack: None,
        };

        let err = get_error(&engine, rtn).expect("error present");

        assert_eq!(err.message, "SyntaxError: bad");
        assert!(err.location.is_empty());
        assert!(err.stack_trace.is_empty());
        assert!(engine.freed_values.lock().expect("lock").is_empty());
    }
}
