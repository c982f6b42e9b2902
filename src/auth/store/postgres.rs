//! Postgres stores.
//!
//! Queries are plain `sqlx::query` with runtime binding, each wrapped in a
//! `db.query` span. Rotation runs in a single transaction whose conditional
//! `UPDATE ... RETURNING` decides the winner; under READ COMMITTED a
//! concurrent loser blocks on the row lock and then matches zero rows.

use super::{AccountStore, RefreshCredentialStore, RotateOutcome, StoreError, StoreResult};
use crate::auth::account::{Account, ExpiringToken};
use crate::auth::credential::{ClientMetadata, RefreshCredential, TokenDigest};
use crate::auth::utils::is_unique_violation;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../../sql/schema.sql");

/// Connect to Postgres and make sure the tables exist.
///
/// # Errors
///
/// Returns an error if the connection or the schema bootstrap fails.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "CREATE",
        db.statement = "sql/schema.sql"
    );
    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .instrument(span)
        .await
        .context("failed to apply schema")?;

    Ok(pool)
}

macro_rules! db_span {
    ($operation:literal, $query:expr) => {
        tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = $operation,
            db.statement = $query
        )
    };
}

fn expiring_token(token: Option<String>, expires_at: Option<DateTime<Utc>>) -> Option<ExpiringToken> {
    match (token, expires_at) {
        (Some(token), Some(expires_at)) => Some(ExpiringToken::new(token, expires_at)),
        _ => None,
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        email_verified: row.try_get("email_verified")?,
        email_verification: expiring_token(
            row.try_get("email_verification_token")?,
            row.try_get("email_verification_expires_at")?,
        ),
        password_reset: expiring_token(
            row.try_get("password_reset_token")?,
            row.try_get("password_reset_expires_at")?,
        ),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn credential_from_row(row: &PgRow) -> Result<RefreshCredential> {
    let hash: Vec<u8> = row.try_get("token_hash")?;
    let token_hash =
        TokenDigest::from_slice(&hash).ok_or_else(|| anyhow!("token_hash is not 32 bytes"))?;
    Ok(RefreshCredential {
        token_hash,
        account_id: row.try_get("account_id")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        revoked_at: row.try_get("revoked_at")?,
        client: ClientMetadata::new(row.try_get("user_agent")?, row.try_get("ip_address")?),
        created_at: row.try_get("created_at")?,
        last_used_at: row.try_get("last_used_at")?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, email_verified, \
    email_verification_token, email_verification_expires_at, \
    password_reset_token, password_reset_expires_at, created_at, updated_at";

const CREDENTIAL_COLUMNS: &str = "token_hash, account_id, expires_at, revoked, revoked_at, \
    user_agent, ip_address, created_at, last_used_at";

#[derive(Clone, Debug)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn create(&self, account: Account) -> StoreResult<Account> {
        let query = r"
            INSERT INTO accounts
                (id, email, password_hash, email_verified,
                 email_verification_token, email_verification_expires_at,
                 password_reset_token, password_reset_expires_at,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ";
        let verification = account.email_verification.as_ref();
        let reset = account.password_reset.as_ref();
        let result = sqlx::query(query)
            .bind(account.id)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.email_verified)
            .bind(verification.map(|pair| pair.token.as_str()))
            .bind(verification.map(|pair| pair.expires_at))
            .bind(reset.map(|pair| pair.token.as_str()))
            .bind(reset.map(|pair| pair.expires_at))
            .bind(account.created_at)
            .bind(account.updated_at)
            .execute(&self.pool)
            .instrument(db_span!("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(account),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate(account.email)),
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert account")
                .into()),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span!("SELECT", query.as_str()))
            .await
            .context("failed to lookup account by id")?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span!("SELECT", query.as_str()))
            .await
            .context("failed to lookup account by email")?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn update(&self, account: &Account) -> StoreResult<()> {
        let query = r"
            UPDATE accounts
            SET password_hash = $2,
                email_verified = $3,
                email_verification_token = $4,
                email_verification_expires_at = $5,
                password_reset_token = $6,
                password_reset_expires_at = $7,
                updated_at = $8
            WHERE id = $1
        ";
        let verification = account.email_verification.as_ref();
        let reset = account.password_reset.as_ref();
        let result = sqlx::query(query)
            .bind(account.id)
            .bind(&account.password_hash)
            .bind(account.email_verified)
            .bind(verification.map(|pair| pair.token.as_str()))
            .bind(verification.map(|pair| pair.expires_at))
            .bind(reset.map(|pair| pair.token.as_str()))
            .bind(reset.map(|pair| pair.expires_at))
            .bind(account.updated_at)
            .execute(&self.pool)
            .instrument(db_span!("UPDATE", query))
            .await
            .context("failed to update account")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(account.id.to_string()));
        }
        Ok(())
    }

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool> {
        let query = "SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1) AS present";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(db_span!("SELECT", query))
            .await
            .context("failed to check account email")?;
        let present: bool = row
            .try_get("present")
            .context("failed to decode account email check")?;
        Ok(present)
    }
}

#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_credential<'e, E>(executor: E, credential: &RefreshCredential) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let query = r"
        INSERT INTO refresh_credentials
            (token_hash, account_id, expires_at, revoked, revoked_at,
             user_agent, ip_address, created_at, last_used_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ";
    let result = sqlx::query(query)
        .bind(credential.token_hash.as_bytes().as_slice())
        .bind(credential.account_id)
        .bind(credential.expires_at)
        .bind(credential.revoked)
        .bind(credential.revoked_at)
        .bind(credential.client.user_agent.as_deref())
        .bind(credential.client.ip_address.as_deref())
        .bind(credential.created_at)
        .bind(credential.last_used_at)
        .execute(executor)
        .instrument(db_span!("INSERT", query))
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate(format!(
            "{:?}",
            credential.token_hash
        ))),
        Err(err) => Err(anyhow::Error::new(err)
            .context("failed to insert refresh credential")
            .into()),
    }
}

#[async_trait]
impl RefreshCredentialStore for PgCredentialStore {
    async fn create(&self, credential: &RefreshCredential) -> StoreResult<()> {
        insert_credential(&self.pool, credential).await
    }

    async fn get_by_token(&self, digest: &TokenDigest) -> StoreResult<Option<RefreshCredential>> {
        let query = format!("SELECT {CREDENTIAL_COLUMNS} FROM refresh_credentials WHERE token_hash = $1");
        let row = sqlx::query(&query)
            .bind(digest.as_bytes().as_slice())
            .fetch_optional(&self.pool)
            .instrument(db_span!("SELECT", query.as_str()))
            .await
            .context("failed to lookup refresh credential")?;
        Ok(row.as_ref().map(credential_from_row).transpose()?)
    }

    async fn list_for_account(&self, account_id: Uuid) -> StoreResult<Vec<RefreshCredential>> {
        let query = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM refresh_credentials WHERE account_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(db_span!("SELECT", query.as_str()))
            .await
            .context("failed to list refresh credentials")?;
        Ok(rows
            .iter()
            .map(credential_from_row)
            .collect::<Result<Vec<_>>>()?)
    }

    async fn update(&self, credential: &RefreshCredential) -> StoreResult<()> {
        let query = "UPDATE refresh_credentials SET last_used_at = $2 WHERE token_hash = $1";
        let result = sqlx::query(query)
            .bind(credential.token_hash.as_bytes().as_slice())
            .bind(credential.last_used_at)
            .execute(&self.pool)
            .instrument(db_span!("UPDATE", query))
            .await
            .context("failed to touch refresh credential")?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{:?}", credential.token_hash)));
        }
        Ok(())
    }

    async fn revoke(&self, digest: &TokenDigest, now: DateTime<Utc>) -> StoreResult<bool> {
        let query = r"
            UPDATE refresh_credentials
            SET revoked = true, revoked_at = $2
            WHERE token_hash = $1 AND revoked = false
        ";
        let result = sqlx::query(query)
            .bind(digest.as_bytes().as_slice())
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span!("UPDATE", query))
            .await
            .context("failed to revoke refresh credential")?;
        Ok(result.rows_affected() > 0)
    }

    async fn rotate(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
        replacement: &RefreshCredential,
    ) -> StoreResult<RotateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin rotation transaction")?;

        let touch = "UPDATE refresh_credentials SET last_used_at = $2 WHERE token_hash = $1";
        sqlx::query(touch)
            .bind(digest.as_bytes().as_slice())
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span!("UPDATE", touch))
            .await
            .context("failed to touch refresh credential")?;

        let revoke = r"
            UPDATE refresh_credentials
            SET revoked = true, revoked_at = $2
            WHERE token_hash = $1 AND revoked = false AND expires_at > $2
            RETURNING token_hash
        ";
        let won = sqlx::query(revoke)
            .bind(digest.as_bytes().as_slice())
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span!("UPDATE", revoke))
            .await
            .context("failed to revoke refresh credential")?
            .is_some();

        if !won {
            tx.commit().await.context("commit rotation transaction")?;
            return Ok(RotateOutcome::Lost);
        }

        insert_credential(&mut *tx, replacement).await?;
        tx.commit().await.context("commit rotation transaction")?;
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_all_for_account(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let query = r"
            UPDATE refresh_credentials
            SET revoked = true, revoked_at = $2
            WHERE account_id = $1 AND revoked = false
        ";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span!("UPDATE", query))
            .await
            .context("failed to revoke account credentials")?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let query = r"
            DELETE FROM refresh_credentials
            WHERE expires_at <= $1 OR (revoked_at IS NOT NULL AND revoked_at < $2)
        ";
        let result = sqlx::query(query)
            .bind(now)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(db_span!("DELETE", query))
            .await
            .context("failed to delete expired credentials")?;
        Ok(result.rows_affected())
    }

    async fn delete_by_token(&self, digest: &TokenDigest) -> StoreResult<bool> {
        let query = "DELETE FROM refresh_credentials WHERE token_hash = $1";
        let result = sqlx::query(query)
            .bind(digest.as_bytes().as_slice())
            .execute(&self.pool)
            .instrument(db_span!("DELETE", query))
            .await
            .context("failed to delete refresh credential")?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> StoreResult<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span!("SELECT", query))
            .await
            .context("database health check failed")?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
