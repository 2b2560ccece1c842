//! Coercion between script values and the structured wire format.
//!
//! Associative arrays bridge to JSON objects, sequential arrays to JSON
//! arrays, recursively. The typed `expect_*` accessors are what wrapper
//! methods call on their arguments; they fail fast with a message naming
//! the parameter and the call site, located at the interpreter's current
//! position.

use serde_json::{Map, Number, Value as Json};

use crate::env::{Callable, ScriptEnv};
use crate::error::{ScriptError, ScriptResult};
use crate::value::{Array, ArrayKey, Value};

/// Convert a script value to the structured wire format. Resources and
/// callables have no wire representation and fail.
pub fn value_to_json(value: &Value) -> ScriptResult<Json> {
    match value {
        Value::Null | Value::Default => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Int(n) => Ok(Json::Number((*n).into())),
        Value::Float(f) => Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| ScriptError::conversion("non-finite float has no JSON form")),
        Value::Str(s) => Ok(Json::String(s.clone())),
        Value::Array(array) => array_to_json(array),
        Value::Resource(resource) => Err(ScriptError::conversion(format!(
            "{} resource is not JSON serializable",
            resource.class()
        ))),
        Value::Callable(callable) => Err(ScriptError::conversion(format!(
            "callable {} is not JSON serializable",
            callable.name()
        ))),
    }
}

/// Convert an array, classifying it as object-like or sequence-like.
pub fn array_to_json(array: &Array) -> ScriptResult<Json> {
    if array.is_assoc() {
        array_to_json_object(array)
    } else {
        array_to_json_array(array)
    }
}

fn array_to_json_object(array: &Array) -> ScriptResult<Json> {
    let mut object = Map::new();
    for (key, value) in array.iter() {
        object.insert(key.to_string(), value_to_json(value)?);
    }
    Ok(Json::Object(object))
}

fn array_to_json_array(array: &Array) -> ScriptResult<Json> {
    let mut items = Vec::with_capacity(array.len());
    for value in array.values() {
        items.push(value_to_json(value)?);
    }
    Ok(Json::Array(items))
}

/// Convert a wire value back into a script value. Objects become arrays
/// with string keys, arrays become arrays with integer keys.
pub fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => {
            Value::Array(Array::from_values(items.iter().map(json_to_value)))
        }
        Json::Object(object) => {
            let mut array = Array::new();
            for (key, value) in object {
                array.insert(ArrayKey::Str(key.clone()), json_to_value(value));
            }
            Value::Array(array)
        }
    }
}

/// Convert a wire object/array to a script array. Scalars come back as a
/// single-element sequence.
pub fn json_to_array(json: &Json) -> Array {
    match json_to_value(json) {
        Value::Array(array) => array,
        other => Array::from_values([other]),
    }
}

fn shape_error(env: &ScriptEnv, param: &str, site: &str, expected: &str, value: &Value) -> ScriptError {
    env.error(format!(
        "{} argument to {} must be {}, {} given.",
        param,
        site,
        expected,
        value.kind()
    ))
}

/// Require a string argument. Numeric values coerce, as the scripting
/// language's string context would.
pub fn expect_str(env: &ScriptEnv, value: &Value, param: &str, site: &str) -> ScriptResult<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(n) => Ok(n.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        other => Err(shape_error(env, param, site, "a string", other)),
    }
}

/// Require an integer argument.
pub fn expect_int(env: &ScriptEnv, value: &Value, param: &str, site: &str) -> ScriptResult<i64> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Float(f) => Ok(*f as i64),
        other => Err(shape_error(env, param, site, "an integer", other)),
    }
}

/// Require a boolean argument.
pub fn expect_bool(env: &ScriptEnv, value: &Value, param: &str, site: &str) -> ScriptResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(shape_error(env, param, site, "a boolean", other)),
    }
}

/// Require an array argument.
pub fn expect_array(env: &ScriptEnv, value: &Value, param: &str, site: &str) -> ScriptResult<Array> {
    match value {
        Value::Array(a) => Ok(a.clone()),
        other => Err(shape_error(env, param, site, "an array", other)),
    }
}

/// Validate and extract a callable, synchronously, before any adapter is
/// constructed.
pub fn expect_callable(
    env: &ScriptEnv,
    value: &Value,
    param: &str,
    site: &str,
) -> ScriptResult<Callable> {
    match value {
        Value::Callable(c) => Ok(c.clone()),
        _ => Err(env.not_callable(format!(
            "{} argument to {} must be callable.",
            param, site
        ))),
    }
}

/// Optional string: absent values map to None.
pub fn opt_str(
    env: &ScriptEnv,
    value: &Value,
    param: &str,
    site: &str,
) -> ScriptResult<Option<String>> {
    if value.is_absent() {
        Ok(None)
    } else {
        expect_str(env, value, param, site).map(Some)
    }
}

/// Optional integer: absent values map to None.
pub fn opt_int(
    env: &ScriptEnv,
    value: &Value,
    param: &str,
    site: &str,
) -> ScriptResult<Option<i64>> {
    if value.is_absent() {
        Ok(None)
    } else {
        expect_int(env, value, param, site).map(Some)
    }
}

/// Optional callable: absent values map to None, present values must still
/// validate.
pub fn opt_callable(
    env: &ScriptEnv,
    value: &Value,
    param: &str,
    site: &str,
) -> ScriptResult<Option<Callable>> {
    if value.is_absent() {
        Ok(None)
    } else {
        expect_callable(env, value, param, site).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> ScriptEnv {
        let env = ScriptEnv::new("test.php");
        env.set_location(crate::env::Location::new("test.php", 3));
        env
    }

    #[test]
    fn sequential_array_bridges_to_json_array() {
        let array = Array::from_values([Value::Int(1), Value::Str("x".into())]);
        assert_eq!(array_to_json(&array).unwrap(), json!([1, "x"]));
    }

    #[test]
    fn associative_array_bridges_to_json_object() {
        let mut array = Array::new();
        array.insert("port", Value::Int(8080));
        array.insert("host", Value::Str("0.0.0.0".into()));
        assert_eq!(
            array_to_json(&array).unwrap(),
            json!({"port": 8080, "host": "0.0.0.0"})
        );
    }

    #[test]
    fn one_string_key_makes_the_whole_array_an_object() {
        let mut array = Array::from_values([Value::Int(1), Value::Int(2)]);
        array.insert("tag", Value::Str("t".into()));
        assert_eq!(
            array_to_json(&array).unwrap(),
            json!({"0": 1, "1": 2, "tag": "t"})
        );
    }

    #[test]
    fn nested_arrays_classify_independently() {
        let mut inner_obj = Array::new();
        inner_obj.insert("k", Value::Int(1));
        let inner_seq = Array::from_values([Value::Int(1), Value::Int(2)]);
        let mut outer = Array::new();
        outer.insert("obj", Value::Array(inner_obj));
        outer.insert("seq", Value::Array(inner_seq));
        assert_eq!(
            array_to_json(&outer).unwrap(),
            json!({"obj": {"k": 1}, "seq": [1, 2]})
        );
    }

    #[test]
    fn json_round_trip_is_stable() {
        // to_json(from_json(to_json(a))) == to_json(a)
        let mut array = Array::new();
        array.insert("name", Value::Str("pontoon".into()));
        array.insert(
            "ports",
            Value::Array(Array::from_values([Value::Int(80), Value::Int(443)])),
        );
        let once = array_to_json(&array).unwrap();
        let back = json_to_array(&once);
        let twice = array_to_json(&back).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn resources_and_callables_refuse_json() {
        struct Opaque;
        assert!(value_to_json(&Value::resource("Pontoon\\Buffer", Opaque)).is_err());
        let callable = Callable::new("cb", |_, _| Ok(()));
        assert!(value_to_json(&Value::Callable(callable)).is_err());
    }

    #[test]
    fn expect_str_names_parameter_and_site() {
        let err = expect_str(
            &env(),
            &Value::Bool(true),
            "address",
            "Pontoon\\EventBus::send()",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("address argument to Pontoon\\EventBus::send()"));
        assert!(message.contains("in test.php on line 3."));
    }

    #[test]
    fn expect_callable_rejects_non_callables_synchronously() {
        let err = expect_callable(&env(), &Value::Int(3), "handler", "NetSocket::dataHandler()")
            .unwrap_err();
        assert!(matches!(err, ScriptError::NotCallable(_)));
        assert!(
            expect_callable(&env(), &Value::Callable(Callable::new("f", |_, _| Ok(()))), "handler", "x")
                .is_ok()
        );
    }

    #[test]
    fn optional_accessors_treat_null_and_default_as_absent() {
        assert_eq!(opt_str(&env(), &Value::Null, "host", "listen()").unwrap(), None);
        assert_eq!(opt_str(&env(), &Value::Default, "host", "listen()").unwrap(), None);
        assert_eq!(
            opt_str(&env(), &Value::Str("h".into()), "host", "listen()").unwrap(),
            Some("h".into())
        );
        assert!(opt_callable(&env(), &Value::Int(1), "handler", "listen()").is_err());
    }
}
