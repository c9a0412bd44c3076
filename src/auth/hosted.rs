//! Client for a GoTrue-compatible hosted identity service.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{token, AuthError, AuthUser, IdentityProvider, Session, SignUpOutcome};

pub struct HostedAuthClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_confirmed_at: Option<String>,
    #[serde(default)]
    confirmed_at: Option<String>,
    #[serde(default)]
    user_metadata: Value,
}

impl UserPayload {
    fn confirmed(&self) -> bool {
        self.email_confirmed_at.is_some() || self.confirmed_at.is_some()
    }

    fn into_user(self) -> AuthUser {
        AuthUser {
            id: self.id,
            email: self.email.filter(|e| !e.is_empty()),
            name: token::display_name(&self.user_metadata),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    access_token: String,
    refresh_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    user: Option<UserPayload>,
}

fn default_expires_in() -> i64 {
    3600
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl SessionPayload {
    fn split(self) -> (Session, Option<UserPayload>) {
        (
            Session {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
                expires_in: self.expires_in,
                token_type: self.token_type,
            },
            self.user,
        )
    }
}

impl HostedAuthClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.base_url, path)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, AuthError> {
        let resp = req
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify(status.as_u16(), &body))
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, AuthError> {
        let status = resp.status().as_u16();
        resp.json::<T>().await.map_err(|e| AuthError::Provider {
            status,
            message: format!("malformed response: {}", e),
        })
    }
}

#[async_trait]
impl IdentityProvider for HostedAuthClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        let resp = self
            .send(
                self.client
                    .post(self.url("/signup"))
                    .json(&json!({ "email": email, "password": password })),
            )
            .await?;
        let body: Value = Self::parse(resp).await?;

        // Auto-confirming providers answer with a session, others with the bare user.
        if body.get("access_token").is_some() {
            let payload: SessionPayload =
                serde_json::from_value(body).map_err(|e| AuthError::Provider {
                    status: 200,
                    message: format!("malformed session: {}", e),
                })?;
            let (session, user) = payload.split();
            let user = user.ok_or_else(|| AuthError::Provider {
                status: 200,
                message: "session without user".to_string(),
            })?;
            return Ok(SignUpOutcome {
                user: user.into_user(),
                session: Some(session),
                email_confirmed: true,
            });
        }

        let user_json = body.get("user").cloned().unwrap_or(body);
        let user: UserPayload =
            serde_json::from_value(user_json).map_err(|e| AuthError::Provider {
                status: 200,
                message: format!("malformed user: {}", e),
            })?;
        let email_confirmed = user.confirmed();
        Ok(SignUpOutcome {
            user: user.into_user(),
            session: None,
            email_confirmed,
        })
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(AuthUser, Session), AuthError> {
        let resp = self
            .send(
                self.client
                    .post(self.url("/token"))
                    .query(&[("grant_type", "password")])
                    .json(&json!({ "email": email, "password": password })),
            )
            .await?;
        let (session, user) = Self::parse::<SessionPayload>(resp).await?.split();
        match user {
            Some(user) => Ok((user.into_user(), session)),
            None => {
                let user = self.get_user(&session.access_token).await?;
                Ok((user, session))
            }
        }
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let sent = self
            .send(self.client.get(self.url("/user")).bearer_auth(access_token))
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(AuthError::Provider {
                status: 401 | 403, ..
            }) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(e),
        };
        Ok(Self::parse::<UserPayload>(resp).await?.into_user())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let sent = self
            .send(
                self.client
                    .post(self.url("/token"))
                    .query(&[("grant_type", "refresh_token")])
                    .json(&json!({ "refresh_token": refresh_token })),
            )
            .await;
        match sent {
            Ok(resp) => Ok(Self::parse::<SessionPayload>(resp).await?.split().0),
            Err(AuthError::Provider {
                status: 400 | 401 | 403,
                ..
            })
            | Err(AuthError::InvalidCredentials) => Err(AuthError::InvalidToken),
            Err(e) => Err(e),
        }
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.send(self.client.post(self.url("/logout")).bearer_auth(access_token))
            .await?;
        Ok(())
    }

    async fn resend_confirmation(&self, email: &str) -> Result<(), AuthError> {
        self.send(
            self.client
                .post(self.url("/resend"))
                .json(&json!({ "type": "signup", "email": email })),
        )
        .await?;
        Ok(())
    }
}

/// Maps a provider error body onto the error codes clients understand.
pub fn classify(status: u16, body: &str) -> AuthError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| parsed.get(*k).and_then(|v| v.as_str()))
            .unwrap_or("")
            .to_string()
    };
    let code = field(&["error_code", "error"]);
    let message = field(&["msg", "message", "error_description", "error"]);
    let lower = message.to_lowercase();

    if code == "email_not_confirmed" || lower.contains("email not confirmed") {
        AuthError::EmailNotConfirmed
    } else if code == "invalid_credentials" || lower.contains("invalid login credentials") {
        AuthError::InvalidCredentials
    } else if matches!(code.as_str(), "user_already_exists" | "email_exists")
        || lower.contains("already registered")
        || lower.contains("already exists")
    {
        AuthError::EmailExists
    } else {
        AuthError::Provider {
            status,
            message: if message.is_empty() {
                format!("status {}", status)
            } else {
                message
            },
        }
    }
}
