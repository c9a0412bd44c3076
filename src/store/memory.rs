use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{ensure_status_write, IntegrationStore, PENDING_BATCH};
use crate::models::integration::{
    Integration, IntegrationPatch, IntegrationStatus, NewIntegration, PendingIntegration,
};
use crate::vault::{SealedSecret, VaultCrypto};

/// Process-local store for development and tests.
///
/// Records and sealed secrets sit behind one lock, so every combined
/// record+secret operation is atomic.
pub struct MemoryStore {
    crypto: VaultCrypto,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, Integration>,
    secrets: HashMap<Uuid, SealedSecret>,
}

impl MemoryStore {
    pub fn new(crypto: VaultCrypto) -> Self {
        Self {
            crypto,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of sealed secrets held, including any orphan.
    pub async fn secret_count(&self) -> usize {
        self.inner.read().await.secrets.len()
    }

    /// Overrides `created_at`, for exercising time-based sweeps.
    pub async fn backdate(&self, id: Uuid, created_at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(&id) {
            Some(record) => {
                record.created_at = created_at;
                true
            }
            None => false,
        }
    }
}

impl Inner {
    fn owned(&self, owner: Uuid, id: Uuid) -> Option<&Integration> {
        self.records.get(&id).filter(|r| r.user_id == owner)
    }

    fn owned_mut(&mut self, owner: Uuid, id: Uuid) -> Option<&mut Integration> {
        self.records.get_mut(&id).filter(|r| r.user_id == owner)
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn list(&self, owner: Uuid) -> anyhow::Result<Vec<Integration>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Integration> = inner
            .records
            .values()
            .filter(|r| r.user_id == owner)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Integration>> {
        Ok(self.inner.read().await.owned(owner, id).cloned())
    }

    async fn create_with_vault(&self, owner: Uuid, new: &NewIntegration) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let sealed = self.crypto.seal(&new.credentials, id.as_bytes())?;
        let now = Utc::now();
        let record = Integration {
            id,
            user_id: owner,
            name: new.name.clone(),
            integration_type: new.integration_type,
            status: IntegrationStatus::Pending,
            is_active: true,
            config: new.config.clone(),
            last_used_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.records.insert(id, record);
        inner.secrets.insert(id, sealed);
        Ok(id)
    }

    async fn get_credentials(
        &self,
        owner: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Zeroizing<String>>> {
        let inner = self.inner.read().await;
        if inner.owned(owner, id).is_none() {
            return Ok(None);
        }
        match inner.secrets.get(&id) {
            Some(sealed) => Ok(Some(self.crypto.open(sealed, id.as_bytes())?)),
            None => Ok(None),
        }
    }

    async fn update_credentials(
        &self,
        owner: Uuid,
        id: Uuid,
        secret: &str,
    ) -> anyhow::Result<bool> {
        let sealed = self.crypto.seal(secret, id.as_bytes())?;
        let mut inner = self.inner.write().await;
        match inner.owned_mut(owner, id) {
            Some(record) => record.updated_at = Utc::now(),
            None => return Ok(false),
        }
        inner.secrets.insert(id, sealed);
        Ok(true)
    }

    async fn update_fields(
        &self,
        owner: Uuid,
        id: Uuid,
        patch: &IntegrationPatch,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.owned_mut(owner, id) else {
            return Ok(false);
        };
        if let Some(name) = &patch.name {
            record.name = name.clone();
        }
        if let Some(config) = &patch.config {
            record.config = config.clone();
        }
        if let Some(is_active) = patch.is_active {
            record.is_active = is_active;
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_with_vault(&self, owner: Uuid, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.owned(owner, id).is_none() {
            return Ok(false);
        }
        inner.records.remove(&id);
        inner.secrets.remove(&id);
        Ok(true)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<bool> {
        ensure_status_write(status)?;
        let mut inner = self.inner.write().await;
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(false);
        };
        if !record.status.can_transition_to(status) {
            anyhow::bail!("illegal status transition {} -> {}", record.status, status);
        }
        let now = Utc::now();
        record.status = status;
        record.error_message = error_message.map(str::to_string);
        record.last_used_at = Some(now);
        record.updated_at = now;
        Ok(true)
    }

    async fn list_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PendingIntegration>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<PendingIntegration> = inner
            .records
            .values()
            .filter(|r| r.status == IntegrationStatus::Pending && r.created_at <= cutoff)
            .map(|r| PendingIntegration {
                id: r.id,
                user_id: r.user_id,
                integration_type: r.integration_type,
                created_at: r.created_at,
            })
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows.truncate(PENDING_BATCH as usize);
        Ok(rows)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::integration::IntegrationType;

    fn new_openai(name: &str) -> NewIntegration {
        NewIntegration {
            name: name.to_string(),
            integration_type: IntegrationType::OpenAi,
            credentials: "sk-test-1234567890abcdefghij".to_string(),
            config: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_create_is_pending_and_secret_is_owner_scoped() {
        let store = MemoryStore::new(VaultCrypto::ephemeral());
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let id = store.create_with_vault(owner, &new_openai("a")).await.unwrap();
        let record = store.get(owner, id).await.unwrap().unwrap();
        assert_eq!(record.status, IntegrationStatus::Pending);
        assert!(record.is_active);

        let secret = store.get_credentials(owner, id).await.unwrap().unwrap();
        assert_eq!(secret.as_str(), "sk-test-1234567890abcdefghij");

        assert!(store.get(stranger, id).await.unwrap().is_none());
        assert!(store.get_credentials(stranger, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_secret_and_is_not_repeatable() {
        let store = MemoryStore::new(VaultCrypto::ephemeral());
        let owner = Uuid::new_v4();
        let id = store.create_with_vault(owner, &new_openai("a")).await.unwrap();

        assert!(!store.delete_with_vault(Uuid::new_v4(), id).await.unwrap());
        assert_eq!(store.secret_count().await, 1);

        assert!(store.delete_with_vault(owner, id).await.unwrap());
        assert_eq!(store.secret_count().await, 0);
        assert!(store.get_credentials(owner, id).await.unwrap().is_none());
        assert!(!store.delete_with_vault(owner, id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_fields_merges_only_supplied_values() {
        let store = MemoryStore::new(VaultCrypto::ephemeral());
        let owner = Uuid::new_v4();
        let id = store.create_with_vault(owner, &new_openai("before")).await.unwrap();

        let patch = IntegrationPatch {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(store.update_fields(owner, id, &patch).await.unwrap());

        let record = store.get(owner, id).await.unwrap().unwrap();
        assert_eq!(record.name, "before");
        assert!(!record.is_active);
    }

    #[tokio::test]
    async fn test_update_status_rejects_pending_and_stamps_last_used() {
        let store = MemoryStore::new(VaultCrypto::ephemeral());
        let owner = Uuid::new_v4();
        let id = store.create_with_vault(owner, &new_openai("a")).await.unwrap();

        assert!(store
            .update_status(id, IntegrationStatus::Pending, None)
            .await
            .is_err());

        assert!(store
            .update_status(id, IntegrationStatus::Error, Some("bad key"))
            .await
            .unwrap());
        let record = store.get(owner, id).await.unwrap().unwrap();
        assert_eq!(record.status, IntegrationStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("bad key"));
        assert!(record.last_used_at.is_some());

        store
            .update_status(id, IntegrationStatus::Connected, None)
            .await
            .unwrap();
        let record = store.get(owner, id).await.unwrap().unwrap();
        assert_eq!(record.status, IntegrationStatus::Connected);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_rotated_secret_replaces_previous() {
        let store = MemoryStore::new(VaultCrypto::ephemeral());
        let owner = Uuid::new_v4();
        let id = store.create_with_vault(owner, &new_openai("a")).await.unwrap();

        assert!(store
            .update_credentials(owner, id, "sk-rotated-abcdefghijklmnop")
            .await
            .unwrap());
        let secret = store.get_credentials(owner, id).await.unwrap().unwrap();
        assert_eq!(secret.as_str(), "sk-rotated-abcdefghijklmnop");
        assert_eq!(store.secret_count().await, 1);

        assert!(!store
            .update_credentials(Uuid::new_v4(), id, "sk-other")
            .await
            .unwrap());
    }
}
