//! Identity: the hosted identity provider adapter and bearer-token validation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod cache;
pub mod extract;
pub mod hosted;
pub mod token;

pub use cache::TokenCache;
pub use extract::BearerToken;
pub use hosted::HostedAuthClient;

/// The authenticated caller. `id` scopes every integration access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    /// Present when the provider confirms the email immediately.
    pub session: Option<Session>,
    pub email_confirmed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("email not confirmed")]
    EmailNotConfirmed,
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("email already registered")]
    EmailExists,
    #[error("identity provider error ({status}): {message}")]
    Provider { status: u16, message: String },
    #[error("identity provider unreachable: {0}")]
    Transport(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError>;

    async fn sign_in(&self, email: &str, password: &str)
        -> Result<(AuthUser, Session), AuthError>;

    /// Resolves an access token to its user, or `InvalidToken`.
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;

    async fn resend_confirmation(&self, email: &str) -> Result<(), AuthError>;
}

/// Validates bearer tokens.
///
/// With a JWT secret configured, tokens are verified locally. Otherwise the
/// provider is asked and the answer is cached for a short TTL.
pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    jwt_secret: Option<String>,
    cache: TokenCache,
}

impl Authenticator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        jwt_secret: Option<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            jwt_secret,
            cache: TokenCache::new(cache_ttl),
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    pub async fn authenticate(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        if access_token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        if let Some(secret) = &self.jwt_secret {
            return token::verify_hs256(access_token, secret).map_err(|e| {
                tracing::debug!(token = %token::mask(access_token), "JWT rejected: {}", e);
                AuthError::InvalidToken
            });
        }

        if let Some(user) = self.cache.get(access_token) {
            return Ok(user);
        }
        let user = self.provider.get_user(access_token).await?;
        self.cache.insert(access_token, user.clone());
        Ok(user)
    }

    /// Drops a cached identity, e.g. after sign-out.
    pub fn forget(&self, access_token: &str) {
        self.cache.remove(access_token);
    }
}
