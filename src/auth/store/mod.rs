use crate::auth::account::Account;
use crate::auth::credential::{RefreshCredential, TokenDigest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an atomic refresh-credential rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The presented credential was revoked and the replacement stored.
    Rotated,
    /// The presented credential was no longer active; nothing was written
    /// except the last-used touch.
    Lost,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `Duplicate` if the email is taken.
    async fn create(&self, account: Account) -> StoreResult<Account>;
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Account>>;
    /// Fails with `NotFound` if the account does not exist.
    async fn update(&self, account: &Account) -> StoreResult<()>;
    async fn exists_by_email(&self, email: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait RefreshCredentialStore: Send + Sync {
    /// Fails with `Duplicate` if the digest already exists.
    async fn create(&self, credential: &RefreshCredential) -> StoreResult<()>;
    async fn get_by_token(&self, digest: &TokenDigest) -> StoreResult<Option<RefreshCredential>>;
    async fn list_for_account(&self, account_id: Uuid) -> StoreResult<Vec<RefreshCredential>>;
    /// Persists `last_used_at` only; value, owner and revocation are never
    /// changed through this call.
    async fn update(&self, credential: &RefreshCredential) -> StoreResult<()>;
    /// Returns `true` if this call moved the credential to revoked.
    async fn revoke(&self, digest: &TokenDigest, now: DateTime<Utc>) -> StoreResult<bool>;
    /// In one atomic unit: touch `last_used_at`, revoke `digest` if it is
    /// still active at `now`, and insert `replacement` only if it was.
    async fn rotate(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
        replacement: &RefreshCredential,
    ) -> StoreResult<RotateOutcome>;
    /// Revokes every active credential of the account and returns how many.
    async fn revoke_all_for_account(&self, account_id: Uuid, now: DateTime<Utc>)
    -> StoreResult<u64>;
    /// Deletes credentials that are expired at `now` or were revoked before `cutoff`.
    async fn delete_expired(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>) -> StoreResult<u64>;
    async fn delete_by_token(&self, digest: &TokenDigest) -> StoreResult<bool>;

    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}
