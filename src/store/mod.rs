//! Integration storage and the vault contract.
//!
//! `IntegrationStore` is the only way handlers reach integration records or
//! their secrets. Combined record+secret operations (`create_with_vault`,
//! `update_credentials`, `delete_with_vault`) are atomic in every backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::models::integration::{
    Integration, IntegrationPatch, IntegrationStatus, NewIntegration, PendingIntegration,
};

pub mod memory;
pub mod postgres;

/// Upper bound on pending records returned per sweep.
pub const PENDING_BATCH: i64 = 100;

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// All integrations owned by `owner`, newest first.
    async fn list(&self, owner: Uuid) -> anyhow::Result<Vec<Integration>>;

    /// One integration, only if owned by `owner`.
    async fn get(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Integration>>;

    /// Inserts the record in `pending` state and seals its secret in one step.
    async fn create_with_vault(&self, owner: Uuid, new: &NewIntegration) -> anyhow::Result<Uuid>;

    /// Decrypted credential for an owned integration.
    async fn get_credentials(
        &self,
        owner: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Zeroizing<String>>>;

    /// Replaces the sealed secret. Returns false if the record is not owned.
    async fn update_credentials(&self, owner: Uuid, id: Uuid, secret: &str)
        -> anyhow::Result<bool>;

    /// Merges the supplied non-secret fields. Returns false if not owned.
    async fn update_fields(
        &self,
        owner: Uuid,
        id: Uuid,
        patch: &IntegrationPatch,
    ) -> anyhow::Result<bool>;

    /// Removes record and secret together. Returns false if not owned.
    async fn delete_with_vault(&self, owner: Uuid, id: Uuid) -> anyhow::Result<bool>;

    /// Writes a verification outcome and stamps `last_used_at`.
    ///
    /// Rejects `pending`: that state is only assigned at creation.
    async fn update_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<bool>;

    /// Pending records created at or before `cutoff`, oldest first.
    async fn list_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PendingIntegration>>;

    /// Cheap liveness probe used by `/readyz`.
    async fn ping(&self) -> anyhow::Result<()>;
}

pub(crate) fn ensure_status_write(status: IntegrationStatus) -> anyhow::Result<()> {
    if status == IntegrationStatus::Pending {
        anyhow::bail!("status '{}' can only be assigned at creation", status);
    }
    Ok(())
}
