use serde_json::{json, Value};

use super::{field_str, missing_fields};
use crate::models::integration::TestResult;

const REQUIRED: [&str; 5] = [
    "type",
    "project_id",
    "private_key_id",
    "private_key",
    "client_email",
];

pub fn validate(credentials: &str) -> Result<(), String> {
    let parsed: Value =
        serde_json::from_str(credentials).map_err(|_| "Invalid JSON format".to_string())?;
    let missing = missing_fields(&parsed, &REQUIRED);
    if !missing.is_empty() {
        return Err(format!("Missing required fields: {}", missing.join(", ")));
    }
    if parsed["type"] != "service_account" {
        return Err("Expected service_account type in JSON".to_string());
    }
    Ok(())
}

/// Structural check of a service account key file.
pub fn check(credentials: &str) -> TestResult {
    let parsed: Value = match serde_json::from_str(credentials) {
        Ok(v) => v,
        Err(e) => {
            return TestResult::failed(
                format!("Invalid JSON or malformed service account: {}", e),
                json!({}),
            )
        }
    };

    let missing = missing_fields(&parsed, &REQUIRED);
    if !missing.is_empty() {
        return TestResult::failed(
            format!(
                "Invalid service account: missing fields: {}",
                missing.join(", ")
            ),
            json!({ "missingFields": missing }),
        );
    }

    if parsed["type"] != "service_account" {
        return TestResult::failed(
            "Invalid credential type. Expected service_account.",
            json!({ "type": field_str(&parsed, "type") }),
        );
    }

    TestResult::ok(
        "Google Cloud service account credentials are valid.",
        json!({
            "projectId": field_str(&parsed, "project_id"),
            "clientEmail": field_str(&parsed, "client_email"),
            "keyId": field_str(&parsed, "private_key_id"),
        }),
    )
}
