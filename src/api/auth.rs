use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{AuthUser, BearerToken};
use crate::errors::AppError;
use crate::AppState;

use super::ApiJson;

const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

#[derive(Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ResendRequest {
    #[serde(default)]
    pub email: String,
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CredentialsRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let email = validate_email(&req.email)?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(
            "Password must be at least 6 characters long.".to_string(),
        ));
    }

    let outcome = state.auth.provider().sign_up(&email, &req.password).await?;
    let (next_step, message) = if outcome.session.is_some() {
        ("dashboard", "Account created and you're now logged in!")
    } else {
        (
            "confirm_email",
            "Account created! Please check your email and click the confirmation link to complete your registration.",
        )
    };
    tracing::info!(user_id = %outcome.user.id, next_step, "user signed up");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": outcome.user,
            "session": outcome.session,
            "email_confirmed": outcome.email_confirmed,
            "next_step": next_step,
            "message": message,
        })),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CredentialsRequest>,
) -> Result<Json<Value>, AppError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::Validation(
            "Email and password are required".to_string(),
        ));
    }
    let email = validate_email(&req.email)?;

    let (user, session) = state.auth.provider().sign_in(&email, &req.password).await?;
    tracing::info!(user_id = %user.id, "user logged in");

    Ok(Json(json!({
        "user": user,
        "session": session,
        "message": "Login successful! Welcome back.",
    })))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<Value>, AppError> {
    if req.refresh_token.trim().is_empty() {
        return Err(AppError::Validation("refresh_token is required".to_string()));
    }
    let session = state.auth.provider().refresh(&req.refresh_token).await?;
    Ok(Json(json!({ "session": session })))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
) -> Result<Json<Value>, AppError> {
    state.auth.provider().sign_out(&token).await?;
    state.auth.forget(&token);
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

pub async fn resend_confirmation(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ResendRequest>,
) -> Result<Json<Value>, AppError> {
    let email = validate_email(&req.email)?;
    state.auth.provider().resend_confirmation(&email).await?;
    Ok(Json(json!({
        "message": format!(
            "Confirmation email sent to {}. Please check your inbox and spam folder.",
            email
        ),
    })))
}

pub async fn me(user: AuthUser) -> Json<AuthUser> {
    Json(user)
}

fn validate_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if EMAIL_RE.is_match(&email) {
        Ok(email)
    } else {
        Err(AppError::Validation(
            "Please enter a valid email address.".to_string(),
        ))
    }
}
