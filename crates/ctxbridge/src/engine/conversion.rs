//! Script value and JSON conversion for the boa backend.

use boa_engine::object::JsObject;
use boa_engine::object::builtins::JsArray;
use boa_engine::{Context, JsNativeError, JsResult, JsValue, js_string};
use serde_json::{Map, Number, Value as JsonValue};

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Deepest object nesting converted before giving up.
const MAX_DEPTH: usize = 128;

/// Convert a script value to JSON.
///
/// `undefined` and `null` both map to `null`. Functions and other values
/// without a JSON form become their display string. Objects contribute
/// their enumerable string keys only, as `Object.keys` reports them.
///
/// # Errors
/// Returns a `TypeError` for cyclic values, a `RangeError` for nesting
/// deeper than [`MAX_DEPTH`], or the script error raised while reading
/// object properties.
pub(super) fn js_value_to_json(value: &JsValue, context: &mut Context) -> JsResult<JsonValue> {
    JsonWalker::default().convert(value, context)
}

/// Recursive converter remembering the objects on the current path.
#[derive(Default)]
struct JsonWalker {
    /// Objects enclosing the value being converted, outermost first
    ancestors: Vec<JsObject>,
}

impl JsonWalker {
    fn convert(&mut self, value: &JsValue, context: &mut Context) -> JsResult<JsonValue> {
        if value.is_null_or_undefined() {
            return Ok(JsonValue::Null);
        }
        if let Some(flag) = value.as_boolean() {
            return Ok(JsonValue::Bool(flag));
        }
        if let Some(number) = value.as_number() {
            return Ok(number_to_json(number));
        }
        if let Some(text) = value.as_string() {
            return Ok(JsonValue::String(text.to_std_string_escaped()));
        }
        let Some(object) = value.as_object() else {
            return Ok(JsonValue::String(value.display().to_string()));
        };
        if object.is_callable() {
            return Ok(JsonValue::String(value.display().to_string()));
        }

        // Shared references are fine; only an object enclosing itself is a cycle.
        if self
            .ancestors
            .iter()
            .any(|ancestor| JsObject::equals(ancestor, &object))
        {
            return Err(JsNativeError::typ().with_message("cyclic value").into());
        }
        if self.ancestors.len() >= MAX_DEPTH {
            return Err(JsNativeError::range()
                .with_message("value nested too deeply")
                .into());
        }

        self.ancestors.push(object.clone());
        let converted = if object.is_array() {
            self.array(&object, context)
        } else {
            self.object(&object, context)
        };
        self.ancestors.pop();
        converted
    }

    /// Convert an array object element by element.
    fn array(&mut self, array: &JsObject, context: &mut Context) -> JsResult<JsonValue> {
        let length = array.get(js_string!("length"), context)?.to_u32(context)?;
        let mut elements = Vec::with_capacity(length as usize);
        for index in 0..length {
            let element = array.get(index, context)?;
            elements.push(self.convert(&element, context)?);
        }
        Ok(JsonValue::Array(elements))
    }

    /// Convert a plain object through its enumerable string keys.
    fn object(&mut self, object: &JsObject, context: &mut Context) -> JsResult<JsonValue> {
        let names = own_enumerable_names(object, context)?;
        let mut map = Map::new();
        for name in names {
            let property = object.get(js_string!(name.as_str()), context)?;
            let converted = self.convert(&property, context)?;
            map.insert(name, converted);
        }
        Ok(JsonValue::Object(map))
    }
}

/// Enumerable own string keys, via the intrinsic `Object.keys`.
fn own_enumerable_names(object: &JsObject, context: &mut Context) -> JsResult<Vec<String>> {
    let constructor = context.intrinsics().constructors().object().constructor();
    let keys = constructor.get(js_string!("keys"), context)?;
    let keys = keys
        .as_callable()
        .ok_or_else(|| JsNativeError::typ().with_message("Object.keys is not callable"))?
        .call(&JsValue::undefined(), &[object.clone().into()], context)?;
    let list = keys
        .as_object()
        .ok_or_else(|| JsNativeError::typ().with_message("Object.keys returned a non-object"))?;

    let length = list.get(js_string!("length"), context)?.to_u32(context)?;
    let mut names = Vec::with_capacity(length as usize);
    for index in 0..length {
        let name = list.get(index, context)?.to_string(context)?;
        names.push(name.to_std_string_escaped());
    }
    Ok(names)
}

/// Whole numbers inside the safe range become JSON integers.
fn number_to_json(number: f64) -> JsonValue {
    if number.is_finite() && number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
        return JsonValue::Number(Number::from(number as i64));
    }
    Number::from_f64(number).map_or(JsonValue::Null, JsonValue::Number)
}

/// Convert JSON to a script value.
///
/// # Errors
/// Returns the script error raised while populating arrays or objects.
pub(super) fn json_to_js_value(value: &JsonValue, context: &mut Context) -> JsResult<JsValue> {
    match value {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(flag) => Ok(JsValue::from(*flag)),
        JsonValue::Number(number) => Ok(number
            .as_i64()
            .filter(|int| i32::try_from(*int).is_ok())
            .map_or_else(
                || JsValue::from(number.as_f64().unwrap_or(f64::NAN)),
                |int| JsValue::from(int as i32),
            )),
        JsonValue::String(text) => Ok(JsValue::from(js_string!(text.as_str()))),
        JsonValue::Array(items) => {
            let array = JsArray::new(context);
            for item in items {
                let element = json_to_js_value(item, context)?;
                array.push(element, context)?;
            }
            Ok(array.into())
        }
        JsonValue::Object(map) => {
            let object = JsObject::with_object_proto(context.intrinsics());
            for (key, item) in map {
                let property = json_to_js_value(item, context)?;
                object.set(js_string!(key.as_str()), property, true, context)?;
            }
            Ok(object.into())
        }
    }
}
