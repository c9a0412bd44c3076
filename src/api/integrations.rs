use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::jobs::verification::VerificationJob;
use crate::models::integration::{IntegrationPatch, IntegrationType, NewIntegration};
use crate::verify;
use crate::AppState;

use super::ApiJson;

const NOT_FOUND: &str = "Integration not found";

// -- DTOs --

#[derive(Deserialize)]
pub struct CreateIntegrationRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub integration_type: Option<String>,
    pub credentials: Option<String>,
    pub config: Option<Value>,
}

#[derive(Deserialize)]
pub struct UpdateIntegrationRequest {
    pub name: Option<String>,
    pub credentials: Option<String>,
    pub config: Option<Value>,
    pub is_active: Option<bool>,
}

// -- Handlers --

pub async fn list_integrations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>, AppError> {
    let integrations = state.store.list(user.id).await.map_err(|e| {
        state.metrics.integration_op("list", false);
        AppError::storage("Failed to list integrations")(e)
    })?;
    state.metrics.integration_op("list", true);
    Ok(Json(json!({ "integrations": integrations })))
}

pub async fn get_integration(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let integration = state
        .store
        .get(user.id, id)
        .await
        .map_err(AppError::storage("Failed to fetch integration"))?
        .ok_or(AppError::NotFound(NOT_FOUND))?;
    Ok(Json(json!({ "integration": integration })))
}

pub async fn create_integration(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(req): ApiJson<CreateIntegrationRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let (name, kind, credentials) = match (
        non_blank(req.name),
        non_blank(req.integration_type),
        non_blank(req.credentials),
    ) {
        (Some(n), Some(k), Some(c)) => (n, k, c),
        _ => {
            return Err(AppError::Validation(
                "Name, type, and credentials are required".to_string(),
            ))
        }
    };
    let integration_type: IntegrationType = kind
        .parse()
        .map_err(|_| AppError::Validation("Invalid integration type".to_string()))?;
    integration_type
        .validate_credentials(&credentials)
        .map_err(AppError::Validation)?;
    let config = object_config(req.config)?.unwrap_or_else(|| json!({}));

    let new = NewIntegration {
        name: name.trim().to_string(),
        integration_type,
        credentials,
        config,
    };
    let id = state
        .store
        .create_with_vault(user.id, &new)
        .await
        .map_err(|e| {
            state.metrics.integration_op("create", false);
            AppError::storage("Failed to create integration")(e)
        })?;
    state.metrics.integration_op("create", true);

    state.verification.enqueue(VerificationJob {
        integration_id: id,
        user_id: user.id,
        integration_type,
    });
    tracing::info!(
        integration_id = %id,
        provider = %integration_type,
        "integration created; verification queued"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": id,
            "message": "Integration created successfully. Credentials are being verified.",
        })),
    ))
}

pub async fn update_integration(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateIntegrationRequest>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;

    let existing = state
        .store
        .get(user.id, id)
        .await
        .map_err(AppError::storage("Failed to fetch integration"))?
        .ok_or(AppError::NotFound(NOT_FOUND))?;

    // Validate everything before the first write.
    let name = match req.name {
        Some(n) if n.trim().is_empty() => {
            return Err(AppError::Validation("Name cannot be empty".to_string()))
        }
        Some(n) => Some(n.trim().to_string()),
        None => None,
    };
    let config = object_config(req.config)?;
    if let Some(credentials) = &req.credentials {
        if credentials.trim().is_empty() {
            return Err(AppError::Validation("Credentials cannot be empty".to_string()));
        }
        existing
            .integration_type
            .validate_credentials(credentials)
            .map_err(AppError::Validation)?;
    }

    if let Some(credentials) = &req.credentials {
        let rotated = state
            .store
            .update_credentials(user.id, id, credentials)
            .await
            .map_err(|e| {
                state.metrics.integration_op("update", false);
                AppError::storage("Failed to update credentials")(e)
            })?;
        if !rotated {
            return Err(AppError::NotFound(NOT_FOUND));
        }
        state.verification.enqueue(VerificationJob {
            integration_id: id,
            user_id: user.id,
            integration_type: existing.integration_type,
        });
        tracing::info!(integration_id = %id, "credentials rotated; re-verification queued");
    }

    let patch = IntegrationPatch {
        name,
        config,
        is_active: req.is_active,
    };
    if !patch.is_empty() {
        let updated = state
            .store
            .update_fields(user.id, id, &patch)
            .await
            .map_err(|e| {
                state.metrics.integration_op("update", false);
                AppError::storage("Failed to update integration")(e)
            })?;
        if !updated {
            return Err(AppError::NotFound(NOT_FOUND));
        }
    }
    state.metrics.integration_op("update", true);

    Ok(Json(json!({ "message": "Integration updated successfully" })))
}

pub async fn delete_integration(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let deleted = state
        .store
        .delete_with_vault(user.id, id)
        .await
        .map_err(|e| {
            state.metrics.integration_op("delete", false);
            AppError::storage("Failed to delete integration")(e)
        })?;
    if !deleted {
        return Err(AppError::NotFound(NOT_FOUND));
    }
    state.metrics.integration_op("delete", true);
    tracing::info!(integration_id = %id, "integration deleted");

    Ok(Json(json!({ "message": "Integration deleted successfully" })))
}

/// Runs the provider check now and records the outcome on the record.
pub async fn test_integration(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = parse_id(&id)?;
    let integration = state
        .store
        .get(user.id, id)
        .await
        .map_err(AppError::storage("Failed to fetch integration"))?
        .ok_or(AppError::NotFound(NOT_FOUND))?;

    let secret = state
        .store
        .get_credentials(user.id, id)
        .await
        .map_err(AppError::storage("Failed to retrieve credentials"))?
        .ok_or_else(|| AppError::Storage {
            context: "Failed to retrieve credentials",
            source: anyhow::anyhow!("No credentials found"),
        })?;

    let result = state
        .verifier
        .verify_observed(integration.integration_type, &secret, &state.metrics)
        .await;
    drop(secret);

    verify::record_outcome(state.store.as_ref(), id, &result)
        .await
        .map_err(|e| {
            state.metrics.integration_op("test", false);
            AppError::storage("Failed to update integration status")(e)
        })?;
    state.metrics.integration_op("test", true);

    Ok(Json(json!({
        "success": result.success,
        "message": result.message,
        "details": result.details,
        "integration": {
            "id": integration.id,
            "name": integration.name,
            "type": integration.integration_type,
        },
    })))
}

// -- Helpers --

/// Malformed ids are indistinguishable from unknown ones.
fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(NOT_FOUND))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn object_config(config: Option<Value>) -> Result<Option<Value>, AppError> {
    match config {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Object(_)) => Ok(Some(v)),
        Some(_) => Err(AppError::Validation(
            "config must be a JSON object".to_string(),
        )),
    }
}
