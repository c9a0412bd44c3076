//! Aterges gateway: BYOK integration management, credential verification
//! and the chat proxy for the Aterges AI dashboard.

use std::sync::Arc;
use std::time::Duration;

pub mod api;
pub mod auth;
pub mod chat;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod store;
pub mod upstream;
pub mod vault;
pub mod verify;

use auth::{Authenticator, IdentityProvider};
use chat::ChatProxy;
use config::Config;
use jobs::verification::{VerificationQueue, VerificationWorker};
use metrics::Metrics;
use store::IntegrationStore;
use verify::CredentialVerifier;

/// Shared application state passed to handlers and background jobs.
pub struct AppState {
    pub store: Arc<dyn IntegrationStore>,
    pub auth: Authenticator,
    pub verifier: Arc<CredentialVerifier>,
    pub verification: VerificationQueue,
    pub chat: ChatProxy,
    pub metrics: Arc<Metrics>,
    pub config: Config,
}

impl AppState {
    /// Wires collaborators together and starts the verification worker.
    /// Must be called inside a Tokio runtime.
    pub fn start(
        config: Config,
        store: Arc<dyn IntegrationStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> anyhow::Result<Arc<Self>> {
        let metrics = Arc::new(Metrics::new()?);
        let verifier = Arc::new(CredentialVerifier::new(
            upstream::http_client(Duration::from_secs(15))?,
            config.openai_api_base.clone(),
        ));

        let worker = VerificationWorker::new(
            store.clone(),
            verifier.clone(),
            metrics.clone(),
            config.verify.max_attempts,
        );
        let verification = jobs::verification::spawn(worker, config.verify.queue_capacity);

        let auth = Authenticator::new(
            identity,
            config.auth_jwt_secret.clone(),
            config.auth_cache_ttl,
        );
        let chat = ChatProxy::new(
            upstream::http_client(Duration::from_secs(120))?,
            config.inference_api_url.clone(),
        );

        Ok(Arc::new(Self {
            store,
            auth,
            verifier,
            verification,
            chat,
            metrics,
            config,
        }))
    }
}
