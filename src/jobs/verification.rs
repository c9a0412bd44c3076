//! Background credential verification.
//!
//! New and rotated credentials are pushed onto a bounded queue and verified
//! by a single worker task, which writes the outcome back onto the record.
//! Delivery is at-least-once: a record stays `pending` until an outcome is
//! written, and the sweeper re-enqueues anything left behind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::models::integration::{IntegrationStatus, IntegrationType};
use crate::store::IntegrationStore;
use crate::verify::{self, CredentialVerifier};

#[derive(Debug, Clone)]
pub struct VerificationJob {
    pub integration_id: Uuid,
    pub user_id: Uuid,
    pub integration_type: IntegrationType,
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct VerificationQueue {
    tx: mpsc::Sender<VerificationJob>,
    /// Ids sitting in the channel and not yet picked up by the worker.
    queued: Arc<DashSet<Uuid>>,
}

impl VerificationQueue {
    /// Queues a job without waiting. Returns false if it was not accepted.
    ///
    /// A job for an id that is already waiting is coalesced; the worker
    /// always reads the current secret, so one pass covers both.
    pub fn enqueue(&self, job: VerificationJob) -> bool {
        let id = job.integration_id;
        if !self.queued.insert(id) {
            tracing::debug!(integration_id = %id, "verification already queued");
            return true;
        }
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                self.queued.remove(&id);
                tracing::warn!(
                    integration_id = %job.integration_id,
                    "verification queue full; leaving record pending for the sweeper"
                );
                false
            }
            Err(TrySendError::Closed(job)) => {
                self.queued.remove(&id);
                tracing::error!(
                    integration_id = %job.integration_id,
                    "verification worker is gone; job dropped"
                );
                false
            }
        }
    }

    pub fn is_queued(&self, id: &Uuid) -> bool {
        self.queued.contains(id)
    }
}

pub struct VerificationWorker {
    store: Arc<dyn IntegrationStore>,
    verifier: Arc<CredentialVerifier>,
    metrics: Arc<Metrics>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl VerificationWorker {
    pub fn new(
        store: Arc<dyn IntegrationStore>,
        verifier: Arc<CredentialVerifier>,
        metrics: Arc<Metrics>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            verifier,
            metrics,
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::from_millis(200),
        }
    }

    pub fn with_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Verifies one job and persists the outcome.
    ///
    /// Store calls are retried with exponential backoff. The provider check
    /// itself runs once. A record that disappeared meanwhile is skipped.
    pub async fn process(&self, job: &VerificationJob) -> anyhow::Result<()> {
        let loaded = self
            .retry("load credentials", || {
                self.store.get_credentials(job.user_id, job.integration_id)
            })
            .await;
        let secret = match loaded {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                tracing::debug!(
                    integration_id = %job.integration_id,
                    "integration deleted before verification"
                );
                return Ok(());
            }
            Err(e) => return self.give_up(job, e).await,
        };

        let result = self
            .verifier
            .verify_observed(job.integration_type, &secret, &self.metrics)
            .await;
        drop(secret);

        let recorded = self
            .retry("record outcome", || {
                verify::record_outcome(self.store.as_ref(), job.integration_id, &result)
            })
            .await;
        match recorded {
            Ok(_) => {
                tracing::info!(
                    integration_id = %job.integration_id,
                    provider = %job.integration_type,
                    success = result.success,
                    "verification complete"
                );
                Ok(())
            }
            Err(e) => self.give_up(job, e).await,
        }
    }

    async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "verification step '{}' failed: {:#}",
                        what,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.context(format!("{} failed after {} attempts", what, attempt))),
            }
        }
    }

    /// Best-effort error status after retries are exhausted. If even that
    /// write fails the record stays pending and the sweeper times it out.
    async fn give_up(&self, job: &VerificationJob, e: anyhow::Error) -> anyhow::Result<()> {
        let message = format!("Failed to verify credentials: {}", e);
        if let Err(write_err) = self
            .store
            .update_status(job.integration_id, IntegrationStatus::Error, Some(&message))
            .await
        {
            tracing::error!(
                integration_id = %job.integration_id,
                "could not record verification failure: {:#}",
                write_err
            );
        }
        Err(e)
    }
}

/// Starts the worker and returns the queue feeding it.
pub fn spawn(worker: VerificationWorker, capacity: usize) -> VerificationQueue {
    let (tx, mut rx) = mpsc::channel::<VerificationJob>(capacity.max(1));
    let queued: Arc<DashSet<Uuid>> = Arc::new(DashSet::new());
    let in_channel = queued.clone();

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            in_channel.remove(&job.integration_id);
            if let Err(e) = worker.process(&job).await {
                tracing::error!(
                    integration_id = %job.integration_id,
                    "verification job failed: {:#}",
                    e
                );
            }
        }
        tracing::info!("verification worker stopped");
    });

    VerificationQueue { tx, queued }
}
