//! Shared harness for the HTTP-level tests: an in-memory app, a token table
//! standing in for the identity provider, and a oneshot request helper.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use aterges::auth::{AuthError, AuthUser, IdentityProvider, Session, SignUpOutcome};
use aterges::config::{Config, VerifyConfig};
use aterges::models::integration::{Integration, IntegrationStatus};
use aterges::store::memory::MemoryStore;
use aterges::store::IntegrationStore;
use aterges::vault::VaultCrypto;
use aterges::{api, AppState};

/// Resolves bearer tokens from a fixed table. Nothing else is supported.
#[derive(Default)]
pub struct StaticIdentity {
    users: Mutex<HashMap<String, AuthUser>>,
}

impl StaticIdentity {
    pub fn add(&self, token: &str, user: AuthUser) {
        self.users.lock().unwrap().insert(token.to_string(), user);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn sign_up(&self, _email: &str, _password: &str) -> Result<SignUpOutcome, AuthError> {
        Err(AuthError::Provider {
            status: 501,
            message: "not supported".into(),
        })
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<(AuthUser, Session), AuthError> {
        Err(AuthError::InvalidCredentials)
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        self.users
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Session, AuthError> {
        Err(AuthError::InvalidToken)
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), AuthError> {
        Ok(())
    }

    async fn resend_confirmation(&self, _email: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        verify: VerifyConfig {
            queue_capacity: 16,
            max_attempts: 2,
            ..VerifyConfig::default()
        },
        ..Config::default()
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub identity: Arc<StaticIdentity>,
    pub router: Router,
}

impl TestApp {
    pub fn new(config: Config) -> Self {
        let identity = Arc::new(StaticIdentity::default());
        let (state, store) = build_state(config, identity.clone());
        let router = api::app(state.clone());
        Self {
            state,
            store,
            identity,
            router,
        }
    }

    /// Registers a fresh user and returns its id and bearer token.
    pub fn login(&self) -> (Uuid, String) {
        let id = Uuid::new_v4();
        let token = format!("token-{}", Uuid::new_v4());
        self.identity.add(
            &token,
            AuthUser {
                id,
                email: Some(format!("{}@example.com", &id.to_string()[..8])),
                name: None,
            },
        );
        (id, token)
    }

    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        call(&self.router, method, uri, token, body).await
    }

    /// Polls until the record leaves `pending` or the deadline passes.
    pub async fn wait_until_settled(&self, owner: Uuid, id: Uuid) -> Integration {
        for _ in 0..100 {
            let record = self.store.get(owner, id).await.unwrap().unwrap();
            if record.status != IntegrationStatus::Pending {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("integration {} never left pending", id);
    }
}

pub fn build_state(
    config: Config,
    identity: Arc<dyn IdentityProvider>,
) -> (Arc<AppState>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(VaultCrypto::ephemeral()));
    let state = AppState::start(config, store.clone(), identity).unwrap();
    (state, store)
}

pub async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn call_text(router: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}
