use serde_json::{json, Value};

use super::{field_str, missing_fields};
use crate::models::integration::TestResult;

const REQUIRED: [&str; 3] = ["client_id", "client_secret", "tenant_id"];

pub fn validate(credentials: &str) -> Result<(), String> {
    let parsed: Value =
        serde_json::from_str(credentials).map_err(|_| "Invalid JSON format".to_string())?;
    let missing = missing_fields(&parsed, &REQUIRED);
    if !missing.is_empty() {
        return Err(format!("Missing required fields: {}", missing.join(", ")));
    }
    Ok(())
}

/// Structural check only; no token is requested from Entra ID.
pub fn check(credentials: &str) -> TestResult {
    let parsed: Value = match serde_json::from_str(credentials) {
        Ok(v) => v,
        Err(e) => {
            return TestResult::failed(
                format!("Invalid Azure credentials format: {}", e),
                json!({}),
            )
        }
    };

    let missing = missing_fields(&parsed, &REQUIRED);
    if !missing.is_empty() {
        return TestResult::failed(
            format!("Missing required Azure credentials: {}", missing.join(", ")),
            json!({ "missingFields": missing }),
        );
    }

    TestResult::ok(
        "Azure credentials structure is valid.",
        json!({
            "clientId": field_str(&parsed, "client_id"),
            "tenantId": field_str(&parsed, "tenant_id"),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_credentials_pass() {
        let result = check(r#"{"client_id":"app","client_secret":"s","tenant_id":"t"}"#);
        assert!(result.success);
        assert_eq!(result.details, json!({"clientId": "app", "tenantId": "t"}));
    }

    #[test]
    fn test_missing_fields_reported() {
        let result = check(r#"{"client_id":"app"}"#);
        assert!(!result.success);
        assert_eq!(
            result.message,
            "Missing required Azure credentials: client_secret, tenant_id"
        );
        assert_eq!(
            validate(r#"{"client_id":"app"}"#).unwrap_err(),
            "Missing required fields: client_secret, tenant_id"
        );
    }
}
