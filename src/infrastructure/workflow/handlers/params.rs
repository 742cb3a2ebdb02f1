//! Typed access to resolved step params
//!
//! Templated values arrive as strings, so numeric and boolean getters also
//! accept their textual form.

use serde_json::{Map, Value};

use crate::domain::{DomainError, StepError};

fn get<'a>(params: &'a Value, name: &str) -> Option<&'a Value> {
    params.get(name).filter(|v| !v.is_null())
}

pub fn required_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, StepError> {
    let value = get(params, name)
        .ok_or_else(|| StepError::invalid_params(format!("missing required param '{}'", name)))?
        .as_str()
        .ok_or_else(|| StepError::invalid_params(format!("param '{}' must be a string", name)))?;

    if value.trim().is_empty() {
        return Err(StepError::invalid_params(format!(
            "param '{}' must not be empty",
            name
        )));
    }
    Ok(value)
}

pub fn optional_str<'a>(params: &'a Value, name: &str) -> Result<Option<&'a str>, StepError> {
    match get(params, name) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| StepError::invalid_params(format!("param '{}' must be a string", name))),
    }
}

pub fn optional_u64(params: &Value, name: &str) -> Result<Option<u64>, StepError> {
    let Some(value) = get(params, name) else {
        return Ok(None);
    };

    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .map(Some)
        .ok_or_else(|| {
            StepError::invalid_params(format!("param '{}' must be a non-negative integer", name))
        })
}

pub fn optional_f64(params: &Value, name: &str) -> Result<Option<f64>, StepError> {
    let Some(value) = get(params, name) else {
        return Ok(None);
    };

    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .map(Some)
        .ok_or_else(|| StepError::invalid_params(format!("param '{}' must be a number", name)))
}

pub fn optional_bool(params: &Value, name: &str) -> Result<Option<bool>, StepError> {
    let Some(value) = get(params, name) else {
        return Ok(None);
    };

    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::String(s) if s == "true" => Ok(Some(true)),
        Value::String(s) if s == "false" => Ok(Some(false)),
        _ => Err(StepError::invalid_params(format!(
            "param '{}' must be a boolean",
            name
        ))),
    }
}

pub fn optional_object<'a>(
    params: &'a Value,
    name: &str,
) -> Result<Option<&'a Map<String, Value>>, StepError> {
    match get(params, name) {
        None => Ok(None),
        Some(value) => value
            .as_object()
            .map(Some)
            .ok_or_else(|| StepError::invalid_params(format!("param '{}' must be an object", name))),
    }
}

/// Map a collaborator failure; transient errors stay retryable
pub fn service_error(code: &str, error: DomainError) -> StepError {
    if error.is_transient() {
        StepError::new(code, error.to_string())
    } else {
        StepError::fatal(code, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_str() {
        let params = json!({"a": "x", "blank": "  ", "n": 1});

        assert_eq!(required_str(&params, "a").unwrap(), "x");
        assert!(required_str(&params, "blank").is_err());
        assert!(required_str(&params, "n").is_err());
        assert!(required_str(&params, "missing").unwrap_err().message.contains("missing"));
    }

    #[test]
    fn test_numeric_params_accept_text() {
        let params = json!({"k": 3, "ks": "4", "f": 0.5, "fs": "0.25", "bad": "x"});

        assert_eq!(optional_u64(&params, "k").unwrap(), Some(3));
        assert_eq!(optional_u64(&params, "ks").unwrap(), Some(4));
        assert_eq!(optional_u64(&params, "none").unwrap(), None);
        assert!(optional_u64(&params, "bad").is_err());
        assert_eq!(optional_f64(&params, "f").unwrap(), Some(0.5));
        assert_eq!(optional_f64(&params, "fs").unwrap(), Some(0.25));
    }

    #[test]
    fn test_bool_and_object_params() {
        let params = json!({"b": false, "bs": "true", "o": {"x": 1}, "null": null});

        assert_eq!(optional_bool(&params, "b").unwrap(), Some(false));
        assert_eq!(optional_bool(&params, "bs").unwrap(), Some(true));
        assert_eq!(optional_bool(&params, "null").unwrap(), None);
        assert!(optional_object(&params, "o").unwrap().is_some());
        assert!(optional_object(&params, "b").is_err());
    }

    #[test]
    fn test_service_error_recoverability() {
        assert!(service_error("X", DomainError::provider("p", "503")).recoverable);
        assert!(!service_error("X", DomainError::validation("bad")).recoverable);
    }
}
