//! Lightweight JSON-Schema validation for tool arguments.
//!
//! Covers the subset MCP tool schemas actually use: `type`, `properties`,
//! `required`, `items`, `enum`, `additionalProperties` (boolean form), and
//! the basic string/number bounds. Errors carry the violated property path
//! and a one-line hint derived from the schema.

use serde_json::Value;

use crate::error::{Error, Result};

/// Validate `value` against `schema`, rooted at `$`.
pub fn validate(schema: &Value, value: &Value) -> Result<()> {
    validate_at(schema, value, "$")
}

fn fail(path: &str, hint: impl Into<String>) -> Error {
    Error::ToolValidation {
        path: path.to_string(),
        hint: hint.into(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<()> {
    let Some(schema_obj) = schema.as_object() else {
        // Non-object schemas (e.g. `true`) accept everything.
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str)
        && !matches_type(expected, value)
    {
        return Err(fail(
            path,
            format!("expected {expected}, got {}", type_name(value)),
        ));
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
        return Err(fail(path, format!("must be one of: {}", options.join(", "))));
    }

    match value {
        Value::Object(fields) => {
            let properties = schema_obj.get("properties").and_then(Value::as_object);

            if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
                for name in required.iter().filter_map(Value::as_str) {
                    if !fields.contains_key(name) {
                        return Err(fail(
                            &format!("{path}.{name}"),
                            "required property is missing",
                        ));
                    }
                }
            }

            if let Some(properties) = properties {
                for (name, field_value) in fields {
                    if let Some(field_schema) = properties.get(name) {
                        validate_at(field_schema, field_value, &format!("{path}.{name}"))?;
                    } else if schema_obj.get("additionalProperties") == Some(&Value::Bool(false)) {
                        return Err(fail(
                            &format!("{path}.{name}"),
                            "property is not allowed by the schema",
                        ));
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema_obj.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_at(item_schema, item, &format!("{path}[{i}]"))?;
                }
            }
        }
        Value::String(s) => {
            if let Some(min) = schema_obj.get("minLength").and_then(Value::as_u64)
                && (s.chars().count() as u64) < min
            {
                return Err(fail(path, format!("must be at least {min} characters")));
            }
            if let Some(max) = schema_obj.get("maxLength").and_then(Value::as_u64)
                && (s.chars().count() as u64) > max
            {
                return Err(fail(path, format!("must be at most {max} characters")));
            }
        }
        Value::Number(n) => {
            if let (Some(min), Some(v)) = (schema_obj.get("minimum").and_then(Value::as_f64), n.as_f64())
                && v < min
            {
                return Err(fail(path, format!("must be >= {min}")));
            }
            if let (Some(max), Some(v)) = (schema_obj.get("maximum").and_then(Value::as_f64), n.as_f64())
                && v > max
            {
                return Err(fail(path, format!("must be <= {max}")));
            }
        }
        _ => {}
    }

    Ok(())
}
