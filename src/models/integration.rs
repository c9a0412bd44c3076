use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Third-party provider an integration holds credentials for.
///
/// The set is closed: every `match` over it is exhaustive, so adding a
/// provider forces the verifier and validation tables to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegrationType {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "google-cloud")]
    GoogleCloud,
    #[serde(rename = "aws")]
    Aws,
    #[serde(rename = "azure")]
    Azure,
}

impl IntegrationType {
    pub const ALL: [IntegrationType; 4] = [
        IntegrationType::OpenAi,
        IntegrationType::GoogleCloud,
        IntegrationType::Aws,
        IntegrationType::Azure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::OpenAi => "openai",
            IntegrationType::GoogleCloud => "google-cloud",
            IntegrationType::Aws => "aws",
            IntegrationType::Azure => "azure",
        }
    }
}

impl fmt::Display for IntegrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported integration type: {0}")]
pub struct UnknownIntegrationType(pub String);

impl FromStr for IntegrationType {
    type Err = UnknownIntegrationType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntegrationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownIntegrationType(s.to_string()))
    }
}

/// Verification status of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Pending,
    Connected,
    Error,
    Disabled,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Pending => "pending",
            IntegrationStatus::Connected => "connected",
            IntegrationStatus::Error => "error",
            IntegrationStatus::Disabled => "disabled",
        }
    }

    /// Whether a record in `self` may be moved to `next`.
    ///
    /// `pending` is only ever assigned on creation; every other target is
    /// reachable because an explicit test may run against any record.
    pub fn can_transition_to(&self, next: IntegrationStatus) -> bool {
        !matches!(next, IntegrationStatus::Pending)
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntegrationStatus::Pending),
            "connected" => Ok(IntegrationStatus::Connected),
            "error" => Ok(IntegrationStatus::Error),
            "disabled" => Ok(IntegrationStatus::Disabled),
            other => anyhow::bail!("unknown integration status: {}", other),
        }
    }
}

/// A user-owned integration record. Never carries the credential itself.
#[derive(Debug, Clone, Serialize)]
pub struct Integration {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub integration_type: IntegrationType,
    pub status: IntegrationStatus,
    pub is_active: bool,
    pub config: serde_json::Value,
    pub last_used_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for `create_with_vault`.
#[derive(Clone)]
pub struct NewIntegration {
    pub name: String,
    pub integration_type: IntegrationType,
    pub credentials: String,
    pub config: serde_json::Value,
}

impl fmt::Debug for NewIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewIntegration")
            .field("name", &self.name)
            .field("integration_type", &self.integration_type)
            .field("credentials", &"[REDACTED]")
            .field("config", &self.config)
            .finish()
    }
}

/// Plain field update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct IntegrationPatch {
    pub name: Option<String>,
    pub config: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

impl IntegrationPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.config.is_none() && self.is_active.is_none()
    }
}

/// Pending record picked up by the verification sweeper.
#[derive(Debug, Clone)]
pub struct PendingIntegration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub integration_type: IntegrationType,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a single provider connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    pub message: String,
    pub details: serde_json::Value,
}

impl TestResult {
    pub fn ok(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            details,
        }
    }

    pub fn failed(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            success: false,
            message: message.into(),
            details,
        }
    }

    /// Status and error message to persist for this outcome.
    pub fn status(&self) -> (IntegrationStatus, Option<&str>) {
        if self.success {
            (IntegrationStatus::Connected, None)
        } else {
            (IntegrationStatus::Error, Some(self.message.as_str()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&IntegrationType::GoogleCloud).unwrap(),
            "\"google-cloud\""
        );
        assert_eq!("openai".parse::<IntegrationType>().unwrap(), IntegrationType::OpenAi);
        assert_eq!("azure".parse::<IntegrationType>().unwrap(), IntegrationType::Azure);
        assert!("unsupported".parse::<IntegrationType>().is_err());
        assert!("OpenAI".parse::<IntegrationType>().is_err());
    }

    #[test]
    fn test_pending_only_reachable_at_creation() {
        for from in [
            IntegrationStatus::Pending,
            IntegrationStatus::Connected,
            IntegrationStatus::Error,
            IntegrationStatus::Disabled,
        ] {
            assert!(!from.can_transition_to(IntegrationStatus::Pending));
            assert!(from.can_transition_to(IntegrationStatus::Error));
            assert!(from.can_transition_to(IntegrationStatus::Connected));
        }
    }

    #[test]
    fn test_status_roundtrip_through_str() {
        for s in ["pending", "connected", "error", "disabled"] {
            let status: IntegrationStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!("verifying".parse::<IntegrationStatus>().is_err());
    }

    #[test]
    fn test_integration_serialization_hides_owner() {
        let now = Utc::now();
        let integration = Integration {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Prod OpenAI".into(),
            integration_type: IntegrationType::OpenAi,
            status: IntegrationStatus::Pending,
            is_active: true,
            config: serde_json::json!({}),
            last_used_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&integration).unwrap();
        assert_eq!(json["type"], "openai");
        assert_eq!(json["status"], "pending");
        assert!(json.get("user_id").is_none());
        assert!(json.get("credentials").is_none());
    }

    #[test]
    fn test_new_integration_debug_redacts_credentials() {
        let new = NewIntegration {
            name: "n".into(),
            integration_type: IntegrationType::OpenAi,
            credentials: "sk-secret-value-1234567890".into(),
            config: serde_json::json!({}),
        };
        let debug = format!("{:?}", new);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_result_status_mapping() {
        let ok = TestResult::ok("fine", serde_json::json!({}));
        assert_eq!(ok.status(), (IntegrationStatus::Connected, None));
        let bad = TestResult::failed("nope", serde_json::json!({}));
        assert_eq!(bad.status(), (IntegrationStatus::Error, Some("nope")));
    }
}
