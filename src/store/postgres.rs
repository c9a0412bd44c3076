use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{ensure_status_write, IntegrationStore, PENDING_BATCH};
use crate::models::integration::{
    Integration, IntegrationPatch, IntegrationStatus, NewIntegration, PendingIntegration,
};
use crate::vault::{SealedSecret, VaultCrypto};

const INTEGRATION_COLUMNS: &str = "id, user_id, name, type, status, is_active, config, \
     last_used_at, error_message, created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
    crypto: VaultCrypto,
}

impl PgStore {
    pub async fn connect(database_url: &str, crypto: VaultCrypto) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool, crypto })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl IntegrationStore for PgStore {
    async fn list(&self, owner: Uuid) -> anyhow::Result<Vec<Integration>> {
        let rows = sqlx::query_as::<_, IntegrationRow>(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations \
             WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Integration::try_from).collect()
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Integration>> {
        let row = sqlx::query_as::<_, IntegrationRow>(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Integration::try_from).transpose()
    }

    async fn create_with_vault(&self, owner: Uuid, new: &NewIntegration) -> anyhow::Result<Uuid> {
        // Id is minted here so it can be bound into the ciphertext as AAD.
        let id = Uuid::new_v4();
        let sealed = self.crypto.seal(&new.credentials, id.as_bytes())?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO integrations (id, user_id, name, type, status, is_active, config)
               VALUES ($1, $2, $3, $4, 'pending', TRUE, $5)"#,
        )
        .bind(id)
        .bind(owner)
        .bind(&new.name)
        .bind(new.integration_type.as_str())
        .bind(&new.config)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO integration_secrets
                   (integration_id, encrypted_dek, dek_nonce, encrypted_secret, secret_nonce)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(id)
        .bind(&sealed.encrypted_dek)
        .bind(&sealed.dek_nonce)
        .bind(&sealed.encrypted_secret)
        .bind(&sealed.secret_nonce)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(id)
    }

    async fn get_credentials(
        &self,
        owner: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Zeroizing<String>>> {
        let row = sqlx::query_as::<_, SecretRow>(
            r#"SELECT s.encrypted_dek, s.dek_nonce, s.encrypted_secret, s.secret_nonce
               FROM integration_secrets s
               JOIN integrations i ON i.id = s.integration_id
               WHERE s.integration_id = $1 AND i.user_id = $2"#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.crypto.open(&row.into(), id.as_bytes())?)),
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

        let mut tx = self.pool.begin().await?;
        let touched = sqlx::query(
            "UPDATE integrations SET updated_at = NOW() WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(owner)
        .execute(&mut *tx)
        .await?;
        if touched.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"INSERT INTO integration_secrets
                   (integration_id, encrypted_dek, dek_nonce, encrypted_secret, secret_nonce)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (integration_id) DO UPDATE SET
                   encrypted_dek = EXCLUDED.encrypted_dek,
                   dek_nonce = EXCLUDED.dek_nonce,
                   encrypted_secret = EXCLUDED.encrypted_secret,
                   secret_nonce = EXCLUDED.secret_nonce,
                   rotated_at = NOW()"#,
        )
        .bind(id)
        .bind(&sealed.encrypted_dek)
        .bind(&sealed.dek_nonce)
        .bind(&sealed.encrypted_secret)
        .bind(&sealed.secret_nonce)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn update_fields(
        &self,
        owner: Uuid,
        id: Uuid,
        patch: &IntegrationPatch,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE integrations SET
                   name = COALESCE($3, name),
                   config = COALESCE($4, config),
                   is_active = COALESCE($5, is_active),
                   updated_at = NOW()
               WHERE id = $1 AND user_id = $2"#,
        )
        .bind(id)
        .bind(owner)
        .bind(patch.name.as_deref())
        .bind(patch.config.clone())
        .bind(patch.is_active)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_with_vault(&self, owner: Uuid, id: Uuid) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"DELETE FROM integration_secrets s
               USING integrations i
               WHERE s.integration_id = i.id AND i.id = $1 AND i.user_id = $2"#,
        )
        .bind(id)
        .bind(owner)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM integrations WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<bool> {
        ensure_status_write(status)?;
        let result = sqlx::query(
            r#"UPDATE integrations SET
                   status = $2,
                   error_message = $3,
                   last_used_at = NOW(),
                   updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PendingIntegration>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            r#"SELECT id, user_id, type, created_at FROM integrations
               WHERE status = 'pending' AND created_at <= $1
               ORDER BY created_at ASC
               LIMIT $2"#,
        )
        .bind(cutoff)
        .bind(PENDING_BATCH)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PendingIntegration {
                    id: row.id,
                    user_id: row.user_id,
                    integration_type: row.kind.parse()?,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IntegrationRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    #[sqlx(rename = "type")]
    kind: String,
    status: String,
    is_active: bool,
    config: serde_json::Value,
    last_used_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IntegrationRow> for Integration {
    type Error = anyhow::Error;

    fn try_from(row: IntegrationRow) -> Result<Self, Self::Error> {
        Ok(Integration {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            integration_type: row.kind.parse()?,
            status: row.status.parse()?,
            is_active: row.is_active,
            config: row.config,
            last_used_at: row.last_used_at,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SecretRow {
    encrypted_dek: Vec<u8>,
    dek_nonce: Vec<u8>,
    encrypted_secret: Vec<u8>,
    secret_nonce: Vec<u8>,
}

impl From<SecretRow> for SealedSecret {
    fn from(row: SecretRow) -> Self {
        SealedSecret {
            encrypted_dek: row.encrypted_dek,
            dek_nonce: row.dek_nonce,
            encrypted_secret: row.encrypted_secret,
            secret_nonce: row.secret_nonce,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    id: Uuid,
    user_id: Uuid,
    #[sqlx(rename = "type")]
    kind: String,
    created_at: DateTime<Utc>,
}
