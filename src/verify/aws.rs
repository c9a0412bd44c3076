use serde_json::{json, Value};

use super::{field_str, missing_fields};
use crate::models::integration::TestResult;

const REQUIRED: [&str; 2] = ["access_key_id", "secret_access_key"];

pub fn validate(credentials: &str) -> Result<(), String> {
    let parsed: Value =
        serde_json::from_str(credentials).map_err(|_| "Invalid JSON format".to_string())?;
    if !missing_fields(&parsed, &REQUIRED).is_empty() {
        return Err("Missing access_key_id or secret_access_key".to_string());
    }
    Ok(())
}

/// Structural check only; no STS call is made.
pub fn check(credentials: &str) -> TestResult {
    let parsed: Value = match serde_json::from_str(credentials) {
        Ok(v) => v,
        Err(e) => {
            return TestResult::failed(
                format!("Invalid AWS credentials format: {}", e),
                json!({}),
            )
        }
    };

    if !missing_fields(&parsed, &REQUIRED).is_empty() {
        return TestResult::failed(
            "Missing required AWS credentials: access_key_id and secret_access_key",
            json!({}),
        );
    }

    let region = match field_str(&parsed, "region") {
        Value::String(s) if !s.is_empty() => Value::String(s),
        _ => Value::String("Not specified".to_string()),
    };

    TestResult::ok(
        "AWS credentials structure is valid.",
        json!({
            "accessKeyId": field_str(&parsed, "access_key_id"),
            "region": region,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_is_reported_when_present() {
        let result = check(
            r#"{"access_key_id":"AKIAEXAMPLE","secret_access_key":"s","region":"eu-west-1"}"#,
        );
        assert!(result.success);
        assert_eq!(result.details["accessKeyId"], "AKIAEXAMPLE");
        assert_eq!(result.details["region"], "eu-west-1");
    }

    #[test]
    fn test_missing_secret_fails() {
        let result = check(r#"{"access_key_id":"AKIAEXAMPLE"}"#);
        assert!(!result.success);
        assert_eq!(
            result.message,
            "Missing required AWS credentials: access_key_id and secret_access_key"
        );
        assert_eq!(
            validate(r#"{"access_key_id":"AKIAEXAMPLE"}"#).unwrap_err(),
            "Missing access_key_id or secret_access_key"
        );
    }

    #[test]
    fn test_malformed_json() {
        assert!(check("AKIA:secret")
            .message
            .starts_with("Invalid AWS credentials format: "));
    }
}
