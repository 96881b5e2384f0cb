//! Evaluator walking the parsed [`Expr`] tree against an input map.

use serde_json::Value;

use super::coerce::{as_f64, compare_order, is_truthy, loose_equal, number_value};
use super::parser::{BinaryOp, Expr, UnaryOp};
use crate::error::NodeError;
use crate::model::JsonMap;

/// Evaluate a parsed expression against `env`.
///
/// Root identifiers must exist in the map (a typo in `x > 3` should surface,
/// not silently compare null). The one exception is the conventional `input`
/// prefix, which resolves to the whole map so `input.payload` and `payload`
/// are the same path. Missing *nested* fields evaluate to null.
pub fn evaluate_parsed(expr: &Expr, env: &JsonMap) -> Result<Value, NodeError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(number_value(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Ident(name) => {
            if let Some(v) = env.get(name) {
                return Ok(v.clone());
            }
            if name == "input" {
                return Ok(Value::Object(env.clone()));
            }
            Err(NodeError::Expression(format!("unknown identifier {name:?}")))
        }
        Expr::Field(base, field) => {
            let base = evaluate_parsed(base, env)?;
            Ok(match base {
                Value::Object(map) => map.get(field).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
        Expr::Index(base, idx) => {
            let base = evaluate_parsed(base, env)?;
            let idx = evaluate_parsed(idx, env)?;
            Ok(match (&base, &idx) {
                (Value::Array(arr), Value::Number(n)) => n
                    .as_u64()
                    .and_then(|i| arr.get(i as usize))
                    .cloned()
                    .unwrap_or(Value::Null),
                (Value::Object(map), Value::String(k)) => {
                    map.get(k).cloned().unwrap_or(Value::Null)
                }
                _ => Value::Null,
            })
        }
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate_parsed(item, env)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Object(fields) => {
            let mut out = JsonMap::new();
            for (key, value) in fields {
                out.insert(key.clone(), evaluate_parsed(value, env)?);
            }
            Ok(Value::Object(out))
        }
        Expr::Unary(op, inner) => {
            let v = evaluate_parsed(inner, env)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!is_truthy(&v))),
                UnaryOp::Neg => {
                    let n = as_f64(&v).ok_or_else(|| {
                        NodeError::Expression(format!("cannot negate {v}"))
                    })?;
                    Ok(number_value(-n))
                }
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            // Short-circuit the logical operators before evaluating the rhs.
            match op {
                BinaryOp::And => {
                    let l = evaluate_parsed(lhs, env)?;
                    if !is_truthy(&l) {
                        return Ok(Value::Bool(false));
                    }
                    let r = evaluate_parsed(rhs, env)?;
                    return Ok(Value::Bool(is_truthy(&r)));
                }
                BinaryOp::Or => {
                    let l = evaluate_parsed(lhs, env)?;
                    if is_truthy(&l) {
                        return Ok(Value::Bool(true));
                    }
                    let r = evaluate_parsed(rhs, env)?;
                    return Ok(Value::Bool(is_truthy(&r)));
                }
                _ => {}
            }

            let l = evaluate_parsed(lhs, env)?;
            let r = evaluate_parsed(rhs, env)?;
            match op {
                BinaryOp::Eq => Ok(Value::Bool(loose_equal(&l, &r))),
                BinaryOp::Ne => Ok(Value::Bool(!loose_equal(&l, &r))),
                BinaryOp::Lt => Ok(Value::Bool(compare_order(&l, &r)? == std::cmp::Ordering::Less)),
                BinaryOp::Le => Ok(Value::Bool(compare_order(&l, &r)? != std::cmp::Ordering::Greater)),
                BinaryOp::Gt => Ok(Value::Bool(compare_order(&l, &r)? == std::cmp::Ordering::Greater)),
                BinaryOp::Ge => Ok(Value::Bool(compare_order(&l, &r)? != std::cmp::Ordering::Less)),
                BinaryOp::In => Ok(Value::Bool(contains(&r, &l))),
                BinaryOp::Add => add(&l, &r),
                BinaryOp::Sub => arithmetic(&l, &r, "-", |a, b| a - b),
                BinaryOp::Mul => arithmetic(&l, &r, "*", |a, b| a * b),
                BinaryOp::Div => arithmetic(&l, &r, "/", |a, b| a / b),
                BinaryOp::Rem => arithmetic(&l, &r, "%", |a, b| a % b),
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            }
        }
    }
}

/// Membership: array element, substring, or object key.
fn contains(container: &Value, needle: &Value) -> bool {
    match container {
        Value::Array(arr) => arr.iter().any(|v| loose_equal(v, needle)),
        Value::String(s) => match needle {
            Value::String(sub) => s.contains(sub.as_str()),
            Value::Number(n) => s.contains(&n.to_string()),
            _ => false,
        },
        Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
        _ => false,
    }
}

fn add(l: &Value, r: &Value) -> Result<Value, NodeError> {
    if let (Value::Number(a), Value::Number(b)) = (l, r) {
        if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
            return Ok(number_value(a + b));
        }
    }
    // Either side being a string turns + into concatenation.
    if l.is_string() || r.is_string() {
        return Ok(Value::String(format!("{}{}", to_concat(l), to_concat(r))));
    }
    match (as_f64(l), as_f64(r)) {
        (Some(a), Some(b)) => Ok(number_value(a + b)),
        _ => Err(NodeError::Expression(format!("cannot add {l} and {r}"))),
    }
}

fn to_concat(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn arithmetic(
    l: &Value,
    r: &Value,
    op: &str,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, NodeError> {
    match (as_f64(l), as_f64(r)) {
        (Some(a), Some(b)) => Ok(number_value(f(a, b))),
        _ => Err(NodeError::Expression(format!(
            "operator {op:?} needs numeric operands, got {l} and {r}"
        ))),
    }
}
