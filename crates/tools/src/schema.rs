//! Minimal JSON-schema validation for tool inputs.
//!
//! Covers what the tool surface actually uses: object roots, required
//! fields, primitive types, typed arrays, and enums. Anything else in a
//! schema is ignored rather than rejected.

use serde_json::Value;

/// Typed validation failures the orchestrator reacts to: unknown tools
/// are skipped outright, invalid inputs go through the repair path.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallError {
    UnknownTool { name: String },
    InvalidInput { message: String },
}

impl std::fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolCallError::UnknownTool { name } => write!(f, "unknown tool: {name}"),
            ToolCallError::InvalidInput { message } => write!(f, "invalid input: {message}"),
        }
    }
}

impl std::error::Error for ToolCallError {}

fn invalid(message: impl Into<String>) -> ToolCallError {
    ToolCallError::InvalidInput {
        message: message.into(),
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Validate `input` against a JSON-schema `parameters` object.
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), ToolCallError> {
    let Some(input_obj) = input.as_object() else {
        return Err(invalid("arguments must be a JSON object"));
    };
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !input_obj.contains_key(field) || input_obj[field].is_null() {
                return Err(invalid(format!("missing required field '{field}'")));
            }
        }
    }

    for (field, value) in input_obj {
        let Some(prop) = properties.get(field) else {
            // Unknown fields are tolerated; models pad inputs freely.
            continue;
        };
        if value.is_null() {
            continue;
        }
        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                return Err(invalid(format!(
                    "field '{field}' must be of type {expected}"
                )));
            }
            if expected == "array" {
                if let Some(item_type) = prop
                    .get("items")
                    .and_then(|i| i.get("type"))
                    .and_then(Value::as_str)
                {
                    for (i, item) in value.as_array().unwrap_or(&vec![]).iter().enumerate() {
                        if !type_matches(item_type, item) {
                            return Err(invalid(format!(
                                "field '{field}[{i}]' must be of type {item_type}"
                            )));
                        }
                    }
                }
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(invalid(format!(
                    "field '{field}' must be one of {allowed:?}"
                )));
            }
        }
        // Path fields must already be sandbox-relative; absolute paths go
        // through the orchestrator's repair pass, traversal never does.
        if field == "path" {
            if let Some(path) = value.as_str() {
                if path.starts_with('/') {
                    return Err(invalid(format!("path '{path}' must be relative")));
                }
                if path.split('/').any(|seg| seg == "..") {
                    return Err(invalid(format!("path '{path}' contains a '..' segment")));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" },
                "lines": { "type": "integer" },
                "files": { "type": "array", "items": { "type": "object" } },
                "mode": { "type": "string", "enum": ["fast", "safe"] }
            },
            "required": ["path"]
        })
    }

    #[test]
    fn accepts_valid_input() {
        let input = json!({"path": "app/page.tsx", "content": "x", "lines": 3});
        assert!(validate_input(&schema(), &input).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate_input(&schema(), &json!({"content": "x"})).unwrap_err();
        assert!(matches!(err, ToolCallError::InvalidInput { ref message } if message.contains("path")));
    }

    #[test]
    fn rejects_wrong_type() {
        let err = validate_input(&schema(), &json!({"path": 42})).unwrap_err();
        assert!(matches!(err, ToolCallError::InvalidInput { ref message } if message.contains("string")));
    }

    #[test]
    fn rejects_wrong_array_item_type() {
        let input = json!({"path": "a", "files": ["not-an-object"]});
        assert!(validate_input(&schema(), &input).is_err());
    }

    #[test]
    fn rejects_bad_enum_value() {
        let input = json!({"path": "a", "mode": "yolo"});
        assert!(validate_input(&schema(), &input).is_err());
    }

    #[test]
    fn tolerates_unknown_fields_and_nulls() {
        let input = json!({"path": "a", "extra": {"anything": true}, "lines": null});
        assert!(validate_input(&schema(), &input).is_ok());
    }

    #[test]
    fn rejects_non_object_root() {
        assert!(validate_input(&schema(), &json!("just a string")).is_err());
    }

    #[test]
    fn rejects_absolute_and_traversal_paths() {
        let abs = validate_input(&schema(), &json!({"path": "/app/page.tsx"})).unwrap_err();
        assert!(matches!(abs, ToolCallError::InvalidInput { ref message } if message.contains("relative")));
        assert!(validate_input(&schema(), &json!({"path": "a/../b.ts"})).is_err());
    }
}
