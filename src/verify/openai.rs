use serde_json::{json, Value};

use crate::models::integration::TestResult;

const MIN_KEY_LEN: usize = 20;

pub fn validate(api_key: &str) -> Result<(), String> {
    if !api_key.starts_with("sk-") {
        return Err("OpenAI API keys should start with \"sk-\"".to_string());
    }
    if api_key.len() < MIN_KEY_LEN {
        return Err("OpenAI API key appears to be too short".to_string());
    }
    Ok(())
}

/// Lists models with the key. Any 2xx counts as connected.
pub async fn check(client: &reqwest::Client, base_url: &str, api_key: &str) -> TestResult {
    if let Err(msg) = validate(api_key) {
        return TestResult::failed(msg, json!({}));
    }

    let url = format!("{}/v1/models", base_url.trim_end_matches('/'));
    let response = match client
        .get(&url)
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "OpenAI connectivity check failed");
            return TestResult::failed(
                format!("Failed to connect to OpenAI API: {}", e),
                json!({}),
            );
        }
    };

    let status = response.status();
    if !status.is_success() {
        let error: Value = response.json().await.unwrap_or_else(|_| json!({}));
        return TestResult::failed(
            format!(
                "OpenAI API error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string(),
            json!({ "status": status.as_u16(), "error": error }),
        );
    }

    let organization = response
        .headers()
        .get("openai-organization")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("Unknown")
        .to_string();

    let body: Value = match response.json().await {
        Ok(b) => b,
        Err(e) => {
            return TestResult::failed(
                format!("Failed to connect to OpenAI API: {}", e),
                json!({}),
            )
        }
    };
    let model_count = body
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    TestResult::ok(
        format!(
            "Successfully connected to OpenAI API. {} models available.",
            model_count
        ),
        json!({ "modelCount": model_count, "organization": organization }),
    )
}
