//! Input validation against a tool's JSON schema.

use super::ToolError;
use serde_json::Value;

/// Validate `input` against `schema`, collecting every violation.
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| ToolError::InvalidInput(format!("invalid JSON schema: {e}")))?;
    let errors: Vec<String> = validator
        .iter_errors(input)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidInput(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    #[test]
    fn accepts_valid_input() {
        assert!(validate_input(&schema(), &json!({"path": "a.txt"})).is_ok());
    }

    #[test]
    fn rejects_missing_field() {
        let err = validate_input(&schema(), &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(ref msg) if msg.contains("path")));
    }

    #[test]
    fn rejects_wrong_type() {
        assert!(validate_input(&schema(), &json!({"path": 3})).is_err());
    }
}
