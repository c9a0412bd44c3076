use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid or missing token")]
    Unauthorized,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("{context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("email not confirmed")]
    EmailNotConfirmed,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email already registered")]
    EmailExists,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Wraps a store failure with a short description of what was attempted.
    pub fn storage(context: &'static str) -> impl FnOnce(anyhow::Error) -> AppError {
        move |source| AppError::Storage { context, source }
    }
}

/// Malformed, mistyped or non-JSON bodies are validation failures.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidToken => AppError::Unauthorized,
            AuthError::EmailNotConfirmed => AppError::EmailNotConfirmed,
            AuthError::InvalidCredentials => AppError::InvalidCredentials,
            AuthError::EmailExists => AppError::EmailExists,
            AuthError::Provider { status, message } => {
                AppError::Upstream(format!("identity provider returned {}: {}", status, message))
            }
            AuthError::Transport(msg) => {
                AppError::Upstream(format!("identity provider unreachable: {}", msg))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthorized => {
                tracing::warn!("rejected request: invalid or missing token");
                (
                    StatusCode::UNAUTHORIZED,
                    "authentication_error",
                    "unauthorized",
                    "Unauthorized".to_string(),
                )
            }
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "not_found",
                what.to_string(),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation",
                msg.clone(),
            ),
            AppError::Upstream(e) => {
                tracing::error!("Upstream error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream_error",
                    "upstream_failure",
                    e.clone(),
                )
            }
            AppError::Storage { context, source } => {
                tracing::error!(context = %context, "Storage error: {:#}", source);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream_error",
                    "upstream_failure",
                    format!("{}: {}", context, source),
                )
            }
            AppError::EmailNotConfirmed => {
                tracing::warn!("login refused: email not confirmed");
                (
                    StatusCode::BAD_REQUEST,
                    "authentication_error",
                    "email_not_confirmed",
                    "Please check your email and click the confirmation link before logging in."
                        .to_string(),
                )
            }
            AppError::InvalidCredentials => {
                tracing::warn!("login refused: invalid credentials");
                (
                    StatusCode::UNAUTHORIZED,
                    "authentication_error",
                    "invalid_credentials",
                    "Invalid email or password. Please check your credentials.".to_string(),
                )
            }
            AppError::EmailExists => (
                StatusCode::CONFLICT,
                "invalid_request_error",
                "email_exists",
                "This email is already registered. Try logging in instead.".to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_storage_error_message_carries_context() {
        let err = AppError::storage("Failed to retrieve credentials")(anyhow::anyhow!(
            "connection reset"
        ));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "upstream_failure");
        assert_eq!(
            json["error"]["message"],
            "Failed to retrieve credentials: connection reset"
        );
    }

    #[tokio::test]
    async fn test_auth_error_codes_map_to_statuses() {
        let cases = [
            (AuthError::EmailNotConfirmed, StatusCode::BAD_REQUEST, "email_not_confirmed"),
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED, "invalid_credentials"),
            (AuthError::EmailExists, StatusCode::CONFLICT, "email_exists"),
            (AuthError::InvalidToken, StatusCode::UNAUTHORIZED, "unauthorized"),
        ];
        for (auth_err, status, code) in cases {
            let resp = AppError::from(auth_err).into_response();
            assert_eq!(resp.status(), status);
            assert_eq!(body_json(resp).await["error"]["code"], code);
        }
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let resp = AppError::Internal(anyhow::anyhow!("secret pool state")).into_response();
        let json = body_json(resp).await;
        assert_eq!(json["error"]["message"], "internal server error");
    }
}
