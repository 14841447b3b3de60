//! Conversion between JSON and script values.
//!
//! The async executor takes its context as a JSON object and hands the
//! resulting variables back the same way, so script values never cross a
//! thread boundary.

use serde_json::{Map, Number};

use crate::error::SafeError;
use crate::namespace::Context;
use crate::value::{DictMap, Value};

/// Deepest container nesting converted back to JSON.
const MAX_DEPTH: usize = 64;

/// Build a script value from JSON.
pub fn from_json(json: &serde_json::Value) -> Result<Value, SafeError> {
    Ok(match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::Int(i),
            (None, Some(f)) if n.is_f64() => Value::Float(f),
            _ => {
                return Err(SafeError::Conversion(format!(
                    "number {n} does not fit in a 64-bit integer"
                )))
            }
        },
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => {
            Value::list(items.iter().map(from_json).collect::<Result<_, _>>()?)
        }
        serde_json::Value::Object(map) => {
            let mut dict = DictMap::new();
            for (k, v) in map {
                let key = Value::str(k);
                let hash = key
                    .hash_key()
                    .map_err(|_| SafeError::Conversion(format!("unhashable key {k:?}")))?;
                dict.insert(hash, (key, from_json(v)?));
            }
            Value::dict(dict)
        }
    })
}

/// Convert a script value to JSON.
///
/// Tuples, sets and xranges become arrays. Dict keys must be strings,
/// numbers, booleans or `None`; non-string keys are rendered with `str()`.
pub fn to_json(value: &Value) -> Result<serde_json::Value, SafeError> {
    to_json_depth(value, 0)
}

fn to_json_depth(value: &Value, depth: usize) -> Result<serde_json::Value, SafeError> {
    if depth > MAX_DEPTH {
        return Err(SafeError::Conversion(format!(
            "value nests deeper than {MAX_DEPTH} levels"
        )));
    }
    Ok(match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| SafeError::Conversion(format!("float {f} has no JSON form")))?,
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::List(items) => json_array(items.borrow().iter(), depth)?,
        Value::Tuple(items) => json_array(items.iter(), depth)?,
        Value::Set(items) => json_array(items.borrow().values(), depth)?,
        Value::FrozenSet(items) => json_array(items.values(), depth)?,
        Value::XRange(r) => serde_json::Value::Array(
            (0..r.len())
                .filter_map(|i| r.get(i))
                .map(serde_json::Value::from)
                .collect(),
        ),
        Value::Dict(map) => {
            let mut out = Map::new();
            for (k, v) in map.borrow().values() {
                let key = match k {
                    Value::Str(s) => s.to_string(),
                    Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
                        k.str_basic()
                    }
                    other => {
                        return Err(SafeError::Conversion(format!(
                            "dict key of type '{}' has no JSON form",
                            other.type_name()
                        )))
                    }
                };
                out.insert(key, to_json_depth(v, depth + 1)?);
            }
            serde_json::Value::Object(out)
        }
        other => {
            return Err(SafeError::Conversion(format!(
                "value of type '{}' has no JSON form",
                other.type_name()
            )))
        }
    })
}

fn json_array<'a>(
    items: impl Iterator<Item = &'a Value>,
    depth: usize,
) -> Result<serde_json::Value, SafeError> {
    Ok(serde_json::Value::Array(
        items
            .map(|v| to_json_depth(v, depth + 1))
            .collect::<Result<_, _>>()?,
    ))
}

/// A fresh context holding every entry of `vars`.
pub fn context_from_json(vars: &Map<String, serde_json::Value>) -> Result<Context, SafeError> {
    let mut ctx = Context::new();
    for (name, value) in vars {
        ctx.set(name.clone(), from_json(value)?);
    }
    Ok(ctx)
}

/// The context's variables as JSON.
///
/// Values with no JSON form (functions, classes, modules) are left out.
pub fn context_to_json(ctx: &Context) -> Map<String, serde_json::Value> {
    let mut out = Map::new();
    for (name, value) in ctx.vars() {
        match to_json(&value) {
            Ok(json) => {
                out.insert(name, json);
            }
            Err(e) => tracing::debug!(variable = %name, error = %e, "skipping context variable"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_and_containers_round_trip() {
        let original = json!({
            "n": null,
            "flag": true,
            "count": 3,
            "ratio": 0.5,
            "name": "orc",
            "items": [1, "two", [3.5]],
            "nested": {"a": {"b": []}}
        });
        let value = from_json(&original).unwrap();
        assert_eq!(to_json(&value).unwrap(), original);
    }

    #[test]
    fn oversized_numbers_are_refused() {
        let huge = json!(u64::MAX);
        assert!(matches!(from_json(&huge), Err(SafeError::Conversion(_))));
    }

    #[test]
    fn tuples_and_sets_become_arrays() {
        let tuple = Value::tuple(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(to_json(&tuple).unwrap(), json!([1, "x"]));
        let range = Value::XRange(crate::value::XRange {
            start: 0,
            stop: 6,
            step: 2,
        });
        assert_eq!(to_json(&range).unwrap(), json!([0, 2, 4]));
    }

    #[test]
    fn numeric_dict_keys_are_stringified() {
        let key = Value::Int(1);
        let mut map = DictMap::new();
        map.insert(key.hash_key().unwrap(), (key, Value::str("one")));
        let dict = Value::dict(map);
        assert_eq!(to_json(&dict).unwrap(), json!({"1": "one"}));
    }

    #[test]
    fn non_finite_floats_are_refused() {
        assert!(to_json(&Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn self_referential_list_is_refused() {
        let list = Value::list(Vec::new());
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert!(matches!(to_json(&list), Err(SafeError::Conversion(_))));
        if let Value::List(items) = &list {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn context_export_skips_code_objects() {
        let mut ctx = context_from_json(json!({"x": 1}).as_object().unwrap()).unwrap();
        ctx.set("f", Value::Builtin(crate::builtins::BuiltinFn::Len));
        let exported = context_to_json(&ctx);
        assert_eq!(exported.get("x"), Some(&json!(1)));
        assert!(!exported.contains_key("f"));
    }
}
