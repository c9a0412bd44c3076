//! Per-provider credential checks.
//!
//! Every check is a single attempt. Only OpenAI is probed over the network;
//! Google Cloud, AWS and Azure are structural checks of the credential JSON
//! and do not prove the credential is accepted by the provider.

use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::models::integration::{IntegrationType, TestResult};
use crate::store::IntegrationStore;

pub mod aws;
pub mod azure;
pub mod google_cloud;
pub mod openai;

pub struct CredentialVerifier {
    client: reqwest::Client,
    openai_base_url: String,
}

impl CredentialVerifier {
    pub fn new(client: reqwest::Client, openai_base_url: impl Into<String>) -> Self {
        Self {
            client,
            openai_base_url: openai_base_url.into(),
        }
    }

    /// Runs the provider check for `kind`. Never errors: failures are results.
    pub async fn verify(&self, kind: IntegrationType, credentials: &str) -> TestResult {
        match kind {
            IntegrationType::OpenAi => {
                openai::check(&self.client, &self.openai_base_url, credentials).await
            }
            IntegrationType::GoogleCloud => google_cloud::check(credentials),
            IntegrationType::Aws => aws::check(credentials),
            IntegrationType::Azure => azure::check(credentials),
        }
    }

    /// `verify`, timed and counted.
    pub async fn verify_observed(
        &self,
        kind: IntegrationType,
        credentials: &str,
        metrics: &Metrics,
    ) -> TestResult {
        let started = Instant::now();
        let result = self.verify(kind, credentials).await;
        metrics.verification(
            kind.as_str(),
            result.success,
            started.elapsed().as_secs_f64(),
        );
        result
    }
}

impl IntegrationType {
    /// Local shape check run before a credential is stored.
    pub fn validate_credentials(&self, credentials: &str) -> Result<(), String> {
        match self {
            IntegrationType::OpenAi => openai::validate(credentials),
            IntegrationType::GoogleCloud => google_cloud::validate(credentials),
            IntegrationType::Aws => aws::validate(credentials),
            IntegrationType::Azure => azure::validate(credentials),
        }
    }
}

/// Persists the status and error message a check produced.
pub async fn record_outcome(
    store: &dyn IntegrationStore,
    id: Uuid,
    result: &TestResult,
) -> anyhow::Result<bool> {
    let (status, error_message) = result.status();
    store.update_status(id, status, error_message).await
}

/// Required fields that are absent, null, empty, `false` or zero.
pub(crate) fn missing_fields<'a>(credentials: &Value, required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .copied()
        .filter(|field| is_blank(credentials.get(*field)))
        .collect()
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(_) => false,
    }
}

/// String form of a field for response details; non-strings render as JSON.
pub(crate) fn field_str(credentials: &Value, field: &str) -> Value {
    match credentials.get(field) {
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Null) | None => Value::Null,
        Some(other) => other.clone(),
    }
}
