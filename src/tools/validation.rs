//! Structural check of tool arguments against the JSON schema the model was given.

use serde_json::Value;

/// Top-level validation only: object type, required fields, declared property
/// types. Returns a description of the first violation found.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!("expected object arguments, got {}", type_name(args)));
    }

    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(field) {
                return Err(format!("missing required field '{field}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in obj {
            let expected = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if let Some(expected) = expected {
                if !matches_type(value, expected) {
                    return Err(format!(
                        "field '{key}' expected type '{expected}', got {}",
                        type_name(value)
                    ));
                }
            }
        }
    }

    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
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

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string"},
                "steps": {"type": "integer"}
            },
            "required": ["action"]
        })
    }

    #[test]
    fn accepts_matching_arguments() {
        assert!(validate_arguments(&json!({"action": "goTo", "steps": 3}), &schema()).is_ok());
    }

    #[test]
    fn rejects_non_object() {
        let err = validate_arguments(&json!("goTo"), &schema()).unwrap_err();
        assert!(err.contains("expected object"));
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate_arguments(&json!({"steps": 1}), &schema()).unwrap_err();
        assert!(err.contains("'action'"));
    }

    #[test]
    fn rejects_wrong_property_type() {
        let err = validate_arguments(&json!({"action": "wait", "steps": "many"}), &schema())
            .unwrap_err();
        assert!(err.contains("'steps'"));
    }

    #[test]
    fn ignores_undeclared_properties() {
        assert!(validate_arguments(&json!({"action": "wait", "extra": true}), &schema()).is_ok());
    }
}
