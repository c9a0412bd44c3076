//! Background job: recover integrations stuck in `pending`.
//!
//! Runs on a fixed interval. Pending records older than the grace period are
//! re-enqueued for verification; records older than the timeout are marked
//! `error` so a lost job never leaves a record pending forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;

use super::verification::{VerificationJob, VerificationQueue};
use crate::config::VerifyConfig;
use crate::models::integration::IntegrationStatus;
use crate::store::IntegrationStore;

pub const TIMEOUT_MESSAGE: &str = "Verification timed out";

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub grace: Duration,
    pub timeout: Duration,
}

impl From<&VerifyConfig> for SweepConfig {
    fn from(cfg: &VerifyConfig) -> Self {
        Self {
            interval: cfg.sweep_interval,
            grace: cfg.pending_grace,
            timeout: cfg.pending_timeout,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub timed_out: usize,
}

/// Spawn the pending sweeper. Call this once at startup.
pub fn spawn(store: Arc<dyn IntegrationStore>, queue: VerificationQueue, cfg: SweepConfig) {
    tokio::spawn(async move {
        let mut interval = time::interval(cfg.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match sweep_pending(store.as_ref(), &queue, &cfg).await {
                Ok(report) if report != SweepReport::default() => {
                    tracing::info!(
                        requeued = report.requeued,
                        timed_out = report.timed_out,
                        "pending sweep"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("pending sweep failed: {:#}", e),
            }
        }
    });
}

/// One sweep pass over stale pending records, oldest first.
pub async fn sweep_pending(
    store: &dyn IntegrationStore,
    queue: &VerificationQueue,
    cfg: &SweepConfig,
) -> anyhow::Result<SweepReport> {
    let now = Utc::now();
    let grace = chrono::Duration::from_std(cfg.grace)?;
    let timeout = chrono::Duration::from_std(cfg.timeout)?;

    let mut report = SweepReport::default();
    for pending in store.list_stale_pending(now - grace).await? {
        if now - pending.created_at >= timeout {
            store
                .update_status(pending.id, IntegrationStatus::Error, Some(TIMEOUT_MESSAGE))
                .await?;
            tracing::warn!(integration_id = %pending.id, "verification timed out");
            report.timed_out += 1;
            continue;
        }

        let job = VerificationJob {
            integration_id: pending.id,
            user_id: pending.user_id,
            integration_type: pending.integration_type,
        };
        if queue.enqueue(job) {
            report.requeued += 1;
        }
    }

    Ok(report)
}
