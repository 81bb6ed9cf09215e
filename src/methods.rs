//! Built-in methods callable on template values, `name.toUpperCase()`,
//! `list.size()` and friends.

use crate::value::{IntRange, Value};

type MethodResult = Option<Result<Value, String>>;

/// Dispatches `target.name(args)`. `None` when the value has no such method.
pub(crate) fn call(target: &Value, name: &str, args: &[Value]) -> MethodResult {
    let result = match target {
        Value::Str(s) => string_method(s, name, args),
        Value::List(_) => list_method(target, name, args),
        Value::Map(_) => map_method(target, name, args),
        Value::Range(range) => range_method(*range, name, args),
        Value::Object(object) => object.call(name, args),
        Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_) => number_method(target, name),
        Value::Null | Value::Bool(_) | Value::Iter(_) | Value::Status(_) => None,
    };
    result.or_else(|| common_method(target, name, args))
}

fn common_method(target: &Value, name: &str, args: &[Value]) -> MethodResult {
    Some(match (name, args) {
        ("toString", []) => Ok(Value::from(target.to_string())),
        ("equals", [other]) => Ok(Value::Bool(target == other)),
        ("hashCode" | "getClass", _) => Err(format!("{name}() is not available in templates")),
        _ => return None,
    })
}

fn arity(name: &str, expected: usize, args: &[Value]) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "{name}() takes {expected} argument(s), {} given",
            args.len()
        ))
    }
}

fn str_arg<'a>(name: &str, value: &'a Value) -> Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{name}() expects a string, found {}", value.type_name()))
}

fn index_arg(name: &str, value: &Value) -> Result<usize, String> {
    value
        .as_i64()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| format!("{name}() expects a non-negative integer, found {value}"))
}

fn char_position(haystack: &str, byte_index: Option<usize>) -> Value {
    byte_index.map_or(Value::Int(-1), |byte_index| {
        Value::from(haystack.char_indices().take_while(|(i, _)| *i < byte_index).count())
    })
}

fn string_method(s: &str, name: &str, args: &[Value]) -> MethodResult {
    let result = match name {
        "length" => arity(name, 0, args).map(|()| Value::from(s.chars().count())),
        "isEmpty" => arity(name, 0, args).map(|()| Value::Bool(s.is_empty())),
        "toUpperCase" => arity(name, 0, args).map(|()| Value::from(s.to_uppercase())),
        "toLowerCase" => arity(name, 0, args).map(|()| Value::from(s.to_lowercase())),
        "trim" => arity(name, 0, args).map(|()| Value::from(s.trim())),
        "contains" | "startsWith" | "endsWith" | "indexOf" | "lastIndexOf" | "split" => {
            match args {
                [needle] => str_arg(name, needle).map(|needle| match name {
                    "contains" => Value::Bool(s.contains(needle)),
                    "startsWith" => Value::Bool(s.starts_with(needle)),
                    "endsWith" => Value::Bool(s.ends_with(needle)),
                    "indexOf" => char_position(s, s.find(needle)),
                    "lastIndexOf" => char_position(s, s.rfind(needle)),
                    _ => Value::list(s.split(needle).map(Value::from).collect::<Vec<_>>()),
                }),
                _ => arity(name, 1, args).map(|()| Value::Null),
            }
        }
        "replace" => match args {
            [from, to] => str_arg(name, from)
                .and_then(|from| Ok(Value::from(s.replace(from, str_arg(name, to)?)))),
            _ => arity(name, 2, args).map(|()| Value::Null),
        },
        "charAt" => match args {
            [index] => index_arg(name, index).and_then(|index| {
                s.chars()
                    .nth(index)
                    .map(|c| Value::from(c.to_string()))
                    .ok_or_else(|| format!("index {index} out of range"))
            }),
            _ => arity(name, 1, args).map(|()| Value::Null),
        },
        "substring" => {
            let len = s.chars().count();
            let bounds = match args {
                [start] => index_arg(name, start).map(|start| (start, len)),
                [start, end] => index_arg(name, start)
                    .and_then(|start| Ok((start, index_arg(name, end)?))),
                _ => Err(format!("{name}() takes 1 or 2 arguments, {} given", args.len())),
            };
            bounds.and_then(|(start, end)| {
                if start > end || end > len {
                    Err(format!("range [{start}, {end}) out of bounds for length {len}"))
                } else {
                    Ok(Value::from(
                        s.chars().skip(start).take(end.saturating_sub(start)).collect::<String>(),
                    ))
                }
            })
        }
        _ => return None,
    };
    Some(result)
}

fn list_method(target: &Value, name: &str, args: &[Value]) -> MethodResult {
    let Value::List(list) = target else {
        return None;
    };
    let result = match (name, args) {
        ("size", []) => Ok(Value::from(list.read().len())),
        ("isEmpty", []) => Ok(Value::Bool(list.read().is_empty())),
        ("get", [index]) => index_arg(name, index).and_then(|index| {
            let list = list.read();
            list.get(index)
                .cloned()
                .ok_or_else(|| format!("index {index} out of bounds for size {}", list.len()))
        }),
        ("contains", [item]) => Ok(Value::Bool(list.read().iter().any(|v| v.loose_eq(item)))),
        ("indexOf", [item]) => Ok(list
            .read()
            .iter()
            .position(|v| v.loose_eq(item))
            .map_or(Value::Int(-1), Value::from)),
        ("add", [item]) => {
            list.write().push(item.clone());
            Ok(Value::Bool(true))
        }
        ("set", [index, item]) => index_arg(name, index).and_then(|index| {
            let mut list = list.write();
            let len = list.len();
            list.get_mut(index)
                .map(|slot| std::mem::replace(slot, item.clone()))
                .ok_or_else(|| format!("index {index} out of bounds for size {len}"))
        }),
        ("remove", [index]) => index_arg(name, index).and_then(|index| {
            let mut list = list.write();
            if index < list.len() {
                Ok(list.remove(index))
            } else {
                Err(format!("index {index} out of bounds for size {}", list.len()))
            }
        }),
        ("join", [separator]) => str_arg(name, separator).map(|separator| {
            let joined = list
                .read()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(separator);
            Value::from(joined)
        }),
        _ => return None,
    };
    Some(result)
}

/// Read-only list methods over a range, answered without materialising it.
fn range_method(range: IntRange, name: &str, args: &[Value]) -> MethodResult {
    let position = |item: &Value| item.as_i64().and_then(|v| range.position(v));
    let result = match (name, args) {
        ("size", []) => Ok(Value::from(range.size())),
        ("isEmpty", []) => Ok(Value::Bool(false)),
        ("get", [index]) => index_arg(name, index).and_then(|index| {
            range
                .get(index)
                .map(Value::Int)
                .ok_or_else(|| format!("index {index} out of bounds for size {}", range.size()))
        }),
        ("contains", [item]) => Ok(Value::Bool(position(item).is_some())),
        ("indexOf", [item]) => Ok(position(item).map_or(Value::Int(-1), Value::from)),
        ("join", [separator]) => str_arg(name, separator).map(|separator| {
            let mut joined = String::new();
            for (i, item) in range.iter().enumerate() {
                if i > 0 {
                    joined.push_str(separator);
                }
                joined.push_str(itoa::Buffer::new().format(item));
            }
            Value::from(joined)
        }),
        _ => return None,
    };
    Some(result)
}

fn map_method(target: &Value, name: &str, args: &[Value]) -> MethodResult {
    let Value::Map(map) = target else {
        return None;
    };
    let result = match (name, args) {
        ("size", []) => Ok(Value::from(map.read().len())),
        ("isEmpty", []) => Ok(Value::Bool(map.read().is_empty())),
        ("get", [key]) => Ok(map.read().get(&key.to_key()).cloned().unwrap_or_default()),
        ("getOrDefault", [key, default]) => Ok(map
            .read()
            .get(&key.to_key())
            .cloned()
            .unwrap_or_else(|| default.clone())),
        ("containsKey", [key]) => Ok(Value::Bool(map.read().contains_key(&key.to_key()))),
        ("containsValue", [value]) => Ok(Value::Bool(map.read().values().any(|v| v.loose_eq(value)))),
        ("put", [key, value]) => Ok(map
            .write()
            .insert(key.to_key(), value.clone())
            .unwrap_or_default()),
        ("remove", [key]) => Ok(map.write().shift_remove(&key.to_key()).unwrap_or_default()),
        ("keySet" | "keys", []) => Ok(Value::list(
            map.read().keys().map(|k| Value::from(k.as_str())).collect::<Vec<_>>(),
        )),
        ("values", []) => Ok(Value::list(map.read().values().cloned().collect::<Vec<_>>())),
        _ => return None,
    };
    Some(result)
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "explicit host-style numeric conversions"
)]
fn number_method(value: &Value, name: &str) -> MethodResult {
    let as_f64 = || value.as_f64().unwrap_or_default();
    let as_i64 = || value.as_i64().unwrap_or_else(|| as_f64() as i64);
    Some(Ok(match name {
        "intValue" => Value::Int(as_i64() as i32),
        "longValue" => Value::Long(as_i64()),
        "floatValue" => Value::Float(as_f64() as f32),
        "doubleValue" => Value::Double(as_f64()),
        _ => return None,
    }))
}
