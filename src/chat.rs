//! Chat proxy to the inference service.
//!
//! Prompts are forwarded to `{base}/api/query` with the caller's token. A
//! stale or rejected token is refreshed at most once per request.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{token, AuthError, IdentityProvider, Session};
use crate::errors::AppError;

/// Tokens expiring within this many seconds are refreshed before use.
const STALE_SKEW_SECS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub message: ChatMessage,
    /// New session when the access token was refreshed along the way.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

enum Upstream {
    Reply(String),
    Rejected,
}

pub struct ChatProxy {
    client: reqwest::Client,
    base_url: String,
}

impl ChatProxy {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn ask(
        &self,
        identity: &dyn IdentityProvider,
        access_token: &str,
        req: &ChatRequest,
    ) -> Result<ChatReply, AppError> {
        if req.prompt.trim().is_empty() {
            return Err(AppError::Validation("Prompt is required".to_string()));
        }
        let refresh_token = req.refresh_token.as_deref().filter(|t| !t.is_empty());

        let mut session = None;
        if token::is_stale(access_token, chrono::Utc::now().timestamp(), STALE_SKEW_SECS) {
            if let Some(rt) = refresh_token {
                tracing::debug!("access token near expiry; refreshing before chat");
                session = Some(refresh(identity, rt).await?);
            }
        }

        let current = session
            .as_ref()
            .map(|s| s.access_token.as_str())
            .unwrap_or(access_token);
        match self.query(current, &req.prompt).await? {
            Upstream::Reply(content) => return Ok(reply(content, session)),
            Upstream::Rejected => {}
        }

        // One refresh per request: a token refreshed above is not refreshed again.
        let rt = match (refresh_token, &session) {
            (Some(rt), None) => rt,
            _ => return Err(AppError::Unauthorized),
        };
        tracing::debug!("inference rejected token; refreshing once");
        let fresh = refresh(identity, rt).await?;
        match self.query(&fresh.access_token, &req.prompt).await? {
            Upstream::Reply(content) => Ok(reply(content, Some(fresh))),
            Upstream::Rejected => Err(AppError::Unauthorized),
        }
    }

    async fn query(&self, access_token: &str, prompt: &str) -> Result<Upstream, AppError> {
        let url = format!("{}/api/query", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("inference request failed: {}", e);
                AppError::Upstream(format!("Failed to reach inference API: {}", e))
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(Upstream::Rejected);
        }
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "Inference API error: {}",
                status.as_u16()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Invalid inference API response: {}", e)))?;
        match body.get("response") {
            Some(Value::String(s)) => Ok(Upstream::Reply(s.clone())),
            Some(Value::Null) | None => Err(AppError::Upstream(
                "Inference API response missing 'response'".to_string(),
            )),
            Some(other) => Ok(Upstream::Reply(other.to_string())),
        }
    }
}

fn reply(content: String, session: Option<Session>) -> ChatReply {
    ChatReply {
        message: ChatMessage {
            role: "assistant",
            content,
        },
        session,
    }
}

async fn refresh(identity: &dyn IdentityProvider, refresh_token: &str) -> Result<Session, AppError> {
    identity.refresh(refresh_token).await.map_err(|e| match e {
        AuthError::InvalidToken | AuthError::InvalidCredentials => AppError::Unauthorized,
        other => AppError::from(other),
    })
}
