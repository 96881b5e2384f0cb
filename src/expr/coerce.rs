//! 类型转换与比较规则 - 表达式求值共用

use serde_json::Value;

use crate::error::NodeError;

/// 真值判定:null/false/0/空串/空集合为假
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}

/// Equal 操作符:先按值比较,再尝试跨类型转换
pub fn loose_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        // 数字比较(处理 int vs float)
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        // 字符串与数字比较
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        // 布尔与字符串比较
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            match s.to_lowercase().as_str() {
                "true" => *b,
                "false" => !*b,
                _ => false,
            }
        }
        _ => false,
    }
}

/// 数值比较:字符串可被强制转换为数字,否则按字典序比较字符串
pub fn compare_order(a: &Value, b: &Value) -> Result<std::cmp::Ordering, NodeError> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x
            .partial_cmp(&y)
            .ok_or_else(|| NodeError::Expression("NaN comparison".to_string()));
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(NodeError::Expression(format!(
            "cannot order {a} against {b}"
        ))),
    }
}

pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// f64 结果回写 JSON:整数值不带小数位
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < (i64::MAX as f64) {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!({"k": 1})));
    }

    #[test]
    fn test_loose_equal_cross_type() {
        assert!(loose_equal(&json!("42"), &json!(42)));
        assert!(loose_equal(&json!(42), &json!("42")));
        assert!(loose_equal(&json!("true"), &json!(true)));
        assert!(!loose_equal(&json!("42x"), &json!(42)));
    }

    #[test]
    fn test_compare_order() {
        assert_eq!(compare_order(&json!("100"), &json!(60)).unwrap(), std::cmp::Ordering::Greater);
        assert_eq!(compare_order(&json!("abc"), &json!("abd")).unwrap(), std::cmp::Ordering::Less);
        assert!(compare_order(&json!([1]), &json!(1)).is_err());
    }

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(2.5), json!(2.5));
    }
}
