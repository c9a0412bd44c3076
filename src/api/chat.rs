use std::sync::Arc;

use axum::{
    extract::State,
    Json,
};

use crate::auth::BearerToken;
use crate::chat::{ChatReply, ChatRequest};
use crate::errors::AppError;
use crate::AppState;

use super::ApiJson;

/// Forwards a prompt to the inference service.
///
/// The token is not resolved locally first: an expired token is still
/// accepted here so the proxy can refresh it, and the inference service is
/// the authority that rejects it.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    let result = state
        .chat
        .ask(state.auth.provider().as_ref(), &token, &req)
        .await;
    let outcome = match &result {
        Ok(reply) if reply.session.is_some() => "ok_refreshed",
        Ok(_) => "ok",
        Err(AppError::Unauthorized) => "unauthorized",
        Err(AppError::Validation(_)) => "invalid",
        Err(_) => "error",
    };
    state.metrics.chat(outcome);

    result.map(Json)
}
