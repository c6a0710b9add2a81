//! 工具参数校验：按 JSON Schema 的常用子集（required / properties.type / enum / additionalProperties）检查
//!
//! 只做形状校验，返回可读的不匹配描述，交给专家 Agent 作为 observation 纠正参数；从不 panic。

use serde_json::{Map, Value};

/// 返回参数与 schema 的不匹配描述；空 Vec 表示通过
pub fn validate_arguments(schema: &Value, arguments: &Map<String, Value>) -> Vec<String> {
    let mut problems = Vec::new();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            match arguments.get(name) {
                None | Some(Value::Null) => {
                    problems.push(format!("missing required argument `{}`", name))
                }
                _ => {}
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (name, value) in arguments {
        let Some(prop) = properties.and_then(|p| p.get(name)) else {
            if closed {
                problems.push(format!("unexpected argument `{}`", name));
            }
            continue;
        };
        if let Some(expected) = prop.get("type") {
            if !type_matches(expected, value) {
                problems.push(format!(
                    "argument `{}` should be {} but got {}",
                    name,
                    describe_type(expected),
                    json_type_name(value)
                ));
                continue;
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                problems.push(format!(
                    "argument `{}` must be one of {}",
                    name,
                    Value::Array(allowed.clone())
                ));
            }
        }
    }

    problems
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(t) => single_type_matches(t, value),
        Value::Array(ts) => ts
            .iter()
            .filter_map(Value::as_str)
            .any(|t| single_type_matches(t, value)),
        // 非法的 type 声明不拦截调用
        _ => true,
    }
}

fn single_type_matches(t: &str, value: &Value) -> bool {
    match t {
        "string" => value.is_string(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::Array(ts) => ts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.as_str().unwrap_or("any").to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["title", "code"],
            "properties": {
                "title": {"type": "string"},
                "code": {"type": "string"},
                "extra": {"type": ["object", "null"]},
                "output_format": {"type": "string", "enum": ["svg", "png"]}
            },
            "additionalProperties": false
        })
    }

    #[test]
    fn test_valid_arguments_pass() {
        let problems = validate_arguments(
            &schema(),
            &args(json!({"title": "t", "code": "a >> b", "extra": null, "output_format": "png"})),
        );
        assert!(problems.is_empty(), "{:?}", problems);
    }

    #[test]
    fn test_missing_and_mistyped() {
        let problems = validate_arguments(&schema(), &args(json!({"title": 3})));
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("missing required argument `code`")));
        assert!(problems.iter().any(|p| p.contains("`title` should be string but got number")));
    }

    #[test]
    fn test_unexpected_and_enum() {
        let problems = validate_arguments(
            &schema(),
            &args(json!({"title": "t", "code": "c", "colour": "red", "output_format": "gif"})),
        );
        assert!(problems.iter().any(|p| p.contains("unexpected argument `colour`")));
        assert!(problems.iter().any(|p| p.contains("`output_format` must be one of")));
    }

    #[test]
    fn test_open_schema_accepts_anything() {
        assert!(validate_arguments(&json!({}), &args(json!({"x": 1}))).is_empty());
    }
}
