use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::{
    ast::Location,
    error::{HashlateError, HashlateResult},
    expr::{ArithOp, CompareOp, Expr, Logic, UnaryOp},
    interpreter::Runtime,
    methods,
    scope::ScopeId,
    template::Env,
    value::{IntRange, Value},
};

impl Expr {
    pub(crate) fn eval(&self, env: &Env, rt: &mut Runtime<'_>, scope: ScopeId) -> HashlateResult<Value> {
        match self {
            Self::Const(value) => Ok(value.clone()),
            Self::Id(name) => Ok(rt.scopes.get(scope, name)),
            Self::Assign {
                name,
                index: None,
                value,
                ..
            } => {
                let value = value.eval(env, rt, scope)?;
                let policy = rt.ctrl.policy();
                rt.scopes.set(scope, name, value.clone(), policy);
                Ok(value)
            }
            Self::Assign {
                name,
                index: Some(index),
                value,
                location,
            } => {
                let target = rt.scopes.get(scope, name);
                let key = index.eval(env, rt, scope)?;
                let value = value.eval(env, rt, scope)?;
                assign_index(name, &target, &key, value.clone(), location)?;
                Ok(value)
            }
            Self::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if cond.eval(env, rt, scope)?.is_truthy() {
                    then.eval(env, rt, scope)
                } else {
                    otherwise.eval(env, rt, scope)
                }
            }
            Self::Logic(logic) => Ok(Value::Bool(match logic {
                Logic::And(left, right) => {
                    left.eval(env, rt, scope)?.is_truthy() && right.eval(env, rt, scope)?.is_truthy()
                }
                Logic::Or(left, right) => {
                    left.eval(env, rt, scope)?.is_truthy() || right.eval(env, rt, scope)?.is_truthy()
                }
                Logic::Not(operand) => !operand.eval(env, rt, scope)?.is_truthy(),
            })),
            Self::Compare {
                op,
                left,
                right,
                location,
            } => {
                let left = left.eval(env, rt, scope)?;
                let right = right.eval(env, rt, scope)?;
                compare(*op, &left, &right, location).map(Value::Bool)
            }
            Self::Arith {
                op,
                left,
                right,
                location,
            } => {
                let left = left.eval(env, rt, scope)?;
                let right = right.eval(env, rt, scope)?;
                arith(*op, &left, &right, location)
            }
            Self::NullSafe { left, right } => {
                let previous = rt.ctrl.replace_null_safe(true);
                let result = left.eval(env, rt, scope);
                rt.ctrl.replace_null_safe(previous);
                let value = result?;
                match right {
                    _ if !value.is_null() => Ok(value),
                    Some(right) => right.eval(env, rt, scope),
                    None => Ok(Value::Null),
                }
            }
            Self::Unary {
                op,
                operand,
                location,
            } => {
                let value = operand.eval(env, rt, scope)?;
                unary(*op, value, location)
            }
            Self::IncDec {
                name,
                increment,
                prefix,
                location,
            } => {
                let current = rt.scopes.get(scope, name);
                let op = if *increment { ArithOp::Add } else { ArithOp::Sub };
                if !current.is_number() {
                    return Err(HashlateError::template(
                        format!(
                            "'{}{}' requires a number, but '{name}' is {}",
                            op.symbol(),
                            op.symbol(),
                            current.type_name()
                        ),
                        location,
                    ));
                }
                let updated = arith(op, &current, &Value::Int(1), location)?;
                let policy = rt.ctrl.policy();
                rt.scopes.set(scope, name, updated.clone(), policy);
                Ok(if *prefix { updated } else { current })
            }
            Self::StaticField {
                namespace,
                field,
                location,
            } => env
                .config()
                .static_namespace(namespace)
                .and_then(|ns| ns.field(field))
                .cloned()
                .ok_or_else(|| {
                    HashlateError::template(
                        format!("Static field not found: {namespace}::{field}"),
                        location,
                    )
                }),
            Self::StaticMethod {
                namespace,
                method,
                args,
                location,
            } => {
                let Some(function) = env
                    .config()
                    .static_namespace(namespace)
                    .and_then(|ns| ns.method(method))
                    .cloned()
                else {
                    return Err(HashlateError::template(
                        format!("Static method not found: {namespace}::{method}()"),
                        location,
                    ));
                };
                let args = eval_all(args, env, rt, scope)?;
                function(&args).map_err(|message| {
                    HashlateError::template(
                        format!("Error calling {namespace}::{method}(): {message}"),
                        location,
                    )
                })
            }
            Self::SharedMethod {
                name,
                args,
                location,
            } => {
                let Some(function) = env.config().shared_method(name).cloned() else {
                    return Err(HashlateError::template(
                        format!("Shared method not found: {name}()"),
                        location,
                    ));
                };
                let args = eval_all(args, env, rt, scope)?;
                function(&args).map_err(|message| {
                    HashlateError::template(format!("Error calling {name}(): {message}"), location)
                })
            }
            Self::Index {
                target,
                index,
                location,
            } => {
                let target = target.eval(env, rt, scope)?;
                let key = index.eval(env, rt, scope)?;
                index_value(&target, &key, rt.ctrl.is_null_safe(), location)
            }
            Self::Field {
                target,
                name,
                location,
            } => {
                let target = target.eval(env, rt, scope)?;
                field_value(&target, name, rt.ctrl.is_null_safe(), location)
            }
            Self::Method {
                target,
                name,
                args,
                location,
            } => {
                let target = target.eval(env, rt, scope)?;
                if target.is_null() {
                    if rt.ctrl.is_null_safe() {
                        return Ok(Value::Null);
                    }
                    return Err(HashlateError::template(
                        format!("Can not call method '{name}' on null"),
                        location,
                    ));
                }
                let args = eval_all(args, env, rt, scope)?;
                match methods::call(&target, name, &args) {
                    Some(Ok(value)) => Ok(value),
                    Some(Err(message)) => Err(HashlateError::template(
                        format!("Error calling {}.{name}(): {message}", target.type_name()),
                        location,
                    )),
                    None => Err(HashlateError::template(
                        format!("Method not found: {}.{name}()", target.type_name()),
                        location,
                    )),
                }
            }
            Self::Map(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, expr) in entries {
                    map.insert(key.to_string(), expr.eval(env, rt, scope)?);
                }
                Ok(Value::from(map))
            }
            Self::Array(items) => Ok(Value::list(eval_all(items, env, rt, scope)?)),
            Self::Range {
                start,
                end,
                location,
            } => {
                let start = start.eval(env, rt, scope)?;
                let end = end.eval(env, rt, scope)?;
                range(&start, &end, location)
            }
        }
    }
}

pub(crate) fn eval_all(
    exprs: &[Expr],
    env: &Env,
    rt: &mut Runtime<'_>,
    scope: ScopeId,
) -> HashlateResult<Vec<Value>> {
    exprs.iter().map(|expr| expr.eval(env, rt, scope)).collect()
}

fn assign_index(
    name: &str,
    target: &Value,
    key: &Value,
    value: Value,
    location: &Location,
) -> HashlateResult<()> {
    match target {
        Value::List(list) => {
            let index = list_index(key, location)?;
            let mut list = list.write();
            let len = list.len();
            let Some(slot) = list.get_mut(index) else {
                return Err(HashlateError::template(
                    format!("Index out of bounds: {index}, size: {len}"),
                    location,
                ));
            };
            *slot = value;
            Ok(())
        }
        Value::Map(map) => {
            map.write().insert(key.to_key(), value);
            Ok(())
        }
        Value::Null => Err(HashlateError::template(
            format!("Can not assign to an index of '{name}', it is null"),
            location,
        )),
        Value::Bool(_)
        | Value::Int(_)
        | Value::Long(_)
        | Value::Float(_)
        | Value::Double(_)
        | Value::Str(_)
        | Value::Range(_)
        | Value::Iter(_)
        | Value::Status(_)
        | Value::Object(_) => Err(HashlateError::template(
            format!(
                "Can not assign to an index of '{name}', a {} is neither a list nor a map",
                target.type_name()
            ),
            location,
        )),
    }
}

fn list_index(key: &Value, location: &Location) -> HashlateResult<usize> {
    key.as_i64()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| {
            HashlateError::template(
                format!("Index must be a non-negative integer, found {key}"),
                location,
            )
        })
}

fn index_value(target: &Value, key: &Value, null_safe: bool, location: &Location) -> HashlateResult<Value> {
    match target {
        Value::Null if null_safe => Ok(Value::Null),
        Value::Null => Err(HashlateError::template(
            format!("Can not read index [{key}] of null"),
            location,
        )),
        Value::List(list) => {
            let index = list_index(key, location)?;
            let list = list.read();
            list.get(index).cloned().ok_or_else(|| {
                HashlateError::template(
                    format!("Index out of bounds: {index}, size: {}", list.len()),
                    location,
                )
            })
        }
        Value::Map(map) => Ok(map.read().get(&key.to_key()).cloned().unwrap_or_default()),
        Value::Range(range) => {
            let index = list_index(key, location)?;
            range.get(index).map(Value::Int).ok_or_else(|| {
                HashlateError::template(
                    format!("Index out of bounds: {index}, size: {}", range.size()),
                    location,
                )
            })
        }
        Value::Str(s) => {
            let index = list_index(key, location)?;
            s.chars()
                .nth(index)
                .map(|c| Value::from(c.to_string()))
                .ok_or_else(|| {
                    HashlateError::template(
                        format!("Index out of bounds: {index}, length: {}", s.chars().count()),
                        location,
                    )
                })
        }
        Value::Object(object) => Ok(object.field(&key.to_key()).unwrap_or_default()),
        Value::Bool(_)
        | Value::Int(_)
        | Value::Long(_)
        | Value::Float(_)
        | Value::Double(_)
        | Value::Iter(_)
        | Value::Status(_) => Err(HashlateError::template(
            format!("Can not index a {}", target.type_name()),
            location,
        )),
    }
}

fn field_value(target: &Value, name: &str, null_safe: bool, location: &Location) -> HashlateResult<Value> {
    let found = match target {
        Value::Null if null_safe => return Ok(Value::Null),
        Value::Null => {
            return Err(HashlateError::template(
                format!("Can not read field '{name}' of null"),
                location,
            ));
        }
        Value::Map(map) => return Ok(map.read().get(name).cloned().unwrap_or_default()),
        Value::Status(status) => status.field(name),
        Value::Object(object) => object.field(name),
        Value::List(list) => (name == "length").then(|| Value::from(list.read().len())),
        Value::Range(range) => (name == "length").then(|| Value::from(range.size())),
        Value::Bool(_)
        | Value::Int(_)
        | Value::Long(_)
        | Value::Float(_)
        | Value::Double(_)
        | Value::Str(_)
        | Value::Iter(_) => None,
    };
    found.ok_or_else(|| {
        HashlateError::template(
            format!("Field not found: {}.{name}", target.type_name()),
            location,
        )
    })
}

fn unary(op: UnaryOp, value: Value, location: &Location) -> HashlateResult<Value> {
    Ok(match (op, value) {
        (UnaryOp::Neg, Value::Int(i)) => Value::Int(i.wrapping_neg()),
        (UnaryOp::Neg, Value::Long(l)) => Value::Long(l.wrapping_neg()),
        (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
        (UnaryOp::Neg, Value::Double(d)) => Value::Double(-d),
        (UnaryOp::Plus, value) if value.is_number() => value,
        (op, value) => {
            let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
            return Err(HashlateError::template(
                format!("Unary '{symbol}' requires a number, found {}", value.type_name()),
                location,
            ));
        }
    })
}

fn compare(op: CompareOp, left: &Value, right: &Value, location: &Location) -> HashlateResult<bool> {
    let ordering = match op {
        CompareOp::Eq => return Ok(left.loose_eq(right)),
        CompareOp::Ne => return Ok(!left.loose_eq(right)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => match (left.as_i64(), right.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ if left.is_number() && right.is_number() => left
                    .as_f64()
                    .zip(right.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                _ => {
                    return Err(HashlateError::template(
                        format!(
                            "Can not compare {} with {} using '{}'",
                            left.type_name(),
                            right.type_name(),
                            op.symbol()
                        ),
                        location,
                    ));
                }
            },
        },
    };
    // NaN compares false with everything.
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Eq | CompareOp::Ne => false,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Int,
    Long,
    Float,
    Double,
}

const fn rank(value: &Value) -> Option<Rank> {
    match value {
        Value::Int(_) => Some(Rank::Int),
        Value::Long(_) => Some(Rank::Long),
        Value::Float(_) => Some(Rank::Float),
        Value::Double(_) => Some(Rank::Double),
        Value::Null
        | Value::Bool(_)
        | Value::Str(_)
        | Value::List(_)
        | Value::Map(_)
        | Value::Range(_)
        | Value::Iter(_)
        | Value::Status(_)
        | Value::Object(_) => None,
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    reason = "operands widen to the higher rank the way host numbers do"
)]
fn as_f32(value: &Value) -> f32 {
    if let Value::Float(f) = value {
        *f
    } else {
        value.as_f64().unwrap_or_default() as f32
    }
}

/// Applies a binary arithmetic operator. `+` concatenates when either side is
/// a string; otherwise both sides must be numbers and the result takes the
/// wider of the two types (int, long, float, double).
pub(crate) fn arith(op: ArithOp, left: &Value, right: &Value, location: &Location) -> HashlateResult<Value> {
    if op == ArithOp::Add && (matches!(left, Value::Str(_)) || matches!(right, Value::Str(_))) {
        let mut joined = left.to_string();
        joined.push_str(&right.to_string());
        return Ok(Value::from(joined));
    }

    let Some(rank) = rank(left).zip(rank(right)).map(|(a, b)| a.max(b)) else {
        return Err(HashlateError::template(
            format!(
                "Unsupported operand types for {}: {} and {}",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
            location,
        ));
    };

    let division_by_zero = || HashlateError::template("Division by zero", location);

    Ok(match rank {
        Rank::Int => {
            let narrow = |value: &Value| value.as_i64().and_then(|v| i32::try_from(v).ok());
            let (a, b) = narrow(left).zip(narrow(right)).unwrap_or_default();
            Value::Int(match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div if b == 0 => return Err(division_by_zero()),
                // Only MIN / -1 overflows, it wraps back to MIN.
                ArithOp::Div => a.checked_div(b).unwrap_or(a),
                ArithOp::Mod if b == 0 => return Err(division_by_zero()),
                ArithOp::Mod => a.checked_rem(b).unwrap_or(0),
            })
        }
        Rank::Long => {
            let a = left.as_i64().unwrap_or_default();
            let b = right.as_i64().unwrap_or_default();
            Value::Long(match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div if b == 0 => return Err(division_by_zero()),
                ArithOp::Div => a.checked_div(b).unwrap_or(a),
                ArithOp::Mod if b == 0 => return Err(division_by_zero()),
                ArithOp::Mod => a.checked_rem(b).unwrap_or(0),
            })
        }
        Rank::Float => {
            let (a, b) = (as_f32(left), as_f32(right));
            Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::Mod => a % b,
            })
        }
        Rank::Double => {
            let a = left.as_f64().unwrap_or_default();
            let b = right.as_f64().unwrap_or_default();
            Value::Double(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::Mod => a % b,
            })
        }
    })
}

fn range(start: &Value, end: &Value, location: &Location) -> HashlateResult<Value> {
    let bound = |value: &Value| value.as_i64().and_then(|v| i32::try_from(v).ok());
    let (Some(a), Some(b)) = (bound(start), bound(end)) else {
        return Err(HashlateError::template(
            format!(
                "Range bounds must be integers, found {} and {}",
                start.type_name(),
                end.type_name()
            ),
            location,
        ));
    };
    Ok(Value::Range(IntRange::new(a, b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(a: Value, b: Value) -> HashlateResult<Value> {
        arith(ArithOp::Add, &a, &b, &Location::default())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_numeric_promotion() {
        assert_eq!(add(Value::Int(1), Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(add(Value::Int(1), Value::Long(2)).unwrap(), Value::Long(3));
        assert_eq!(add(Value::Long(1), Value::Float(0.5)).unwrap(), Value::Float(1.5));
        assert_eq!(add(Value::Float(1.0), Value::Double(0.25)).unwrap(), Value::Double(1.25));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_string_concatenation() {
        assert_eq!(add(Value::from("a"), Value::Int(1)).unwrap(), Value::from("a1"));
        assert_eq!(add(Value::Int(1), Value::from("a")).unwrap(), Value::from("1a"));
        assert_eq!(add(Value::from("x"), Value::Null).unwrap(), Value::from("xnull"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_integer_division() {
        let location = Location::default();
        assert_eq!(
            arith(ArithOp::Div, &Value::Int(7), &Value::Int(2), &location).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            arith(ArithOp::Mod, &Value::Long(7), &Value::Int(4), &location).unwrap(),
            Value::Long(3)
        );
        assert!(arith(ArithOp::Div, &Value::Int(1), &Value::Int(0), &location).is_err());
        assert!(arith(ArithOp::Mod, &Value::Long(1), &Value::Long(0), &location).is_err());
        let Value::Double(inf) = arith(ArithOp::Div, &Value::Double(1.0), &Value::Int(0), &location).unwrap() else {
            panic!("expected a double");
        };
        assert!(inf.is_infinite());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unsupported_operands() {
        let err = arith(ArithOp::Sub, &Value::Bool(true), &Value::Int(1), &Location::default()).unwrap_err();
        assert!(err.to_string().contains("boolean and int"), "{err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compare() {
        let location = Location::default();
        assert!(compare(CompareOp::Lt, &Value::Int(1), &Value::Double(1.5), &location).unwrap());
        assert!(compare(CompareOp::Ge, &Value::Long(2), &Value::Int(2), &location).unwrap());
        assert!(compare(CompareOp::Lt, &Value::from("abc"), &Value::from("abd"), &location).unwrap());
        assert!(compare(CompareOp::Eq, &Value::Int(1), &Value::Long(1), &location).unwrap());
        assert!(compare(CompareOp::Ne, &Value::Int(1), &Value::from("1"), &location).unwrap());
        assert!(!compare(CompareOp::Lt, &Value::Double(f64::NAN), &Value::Int(1), &location).unwrap());
        assert!(compare(CompareOp::Lt, &Value::Int(1), &Value::from("a"), &location).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_range() {
        let location = Location::default();
        assert_eq!(
            range(&Value::Int(1), &Value::Int(3), &location).unwrap().to_string(),
            "[1, 2, 3]"
        );
        assert_eq!(
            range(&Value::Int(3), &Value::Int(1), &location).unwrap().to_string(),
            "[3, 2, 1]"
        );
        assert!(range(&Value::from("a"), &Value::Int(1), &location).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_range_index_and_length_are_arithmetic() {
        let location = Location::default();
        let huge = range(&Value::Int(0), &Value::Int(i32::MAX), &location).unwrap();
        assert_eq!(
            index_value(&huge, &Value::Int(2_000_000_000), false, &location).unwrap(),
            Value::Int(2_000_000_000)
        );
        assert_eq!(
            field_value(&huge, "length", false, &location).unwrap(),
            Value::Long(2_147_483_648)
        );

        let down = range(&Value::Int(5), &Value::Int(-5), &location).unwrap();
        assert_eq!(index_value(&down, &Value::Int(10), false, &location).unwrap(), Value::Int(-5));
        assert!(index_value(&down, &Value::Int(11), false, &location).is_err());
        assert!(assign_index("r", &down, &Value::Int(0), Value::Int(1), &location).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_integer_division_overflow_wraps() {
        let location = Location::default();
        assert_eq!(
            arith(ArithOp::Div, &Value::Int(i32::MIN), &Value::Int(-1), &location).unwrap(),
            Value::Int(i32::MIN)
        );
        assert_eq!(
            arith(ArithOp::Mod, &Value::Long(i64::MIN), &Value::Long(-1), &location).unwrap(),
            Value::Long(0)
        );
    }
}
