//! In-memory stores.
//!
//! Maps guarded by `tokio::sync::RwLock`. Nothing survives a restart and
//! nothing is shared across processes, so these back tests, local runs and
//! the `--dsn memory://` mode of the binary.
//!
//! Every mutation takes the write lock for its whole check-then-write
//! sequence. In particular [`MemoryCredentialStore::rotate`] holds one write
//! lock across the touch, the conditional revoke and the replacement insert,
//! which is what gives rotation its at-most-one-winner guarantee here.

use super::{AccountStore, RefreshCredentialStore, RotateOutcome, StoreError, StoreResult};
use crate::auth::account::Account;
use crate::auth::credential::{RefreshCredential, TokenDigest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct MemoryAccountStore {
    accounts: Arc<RwLock<HashMap<Uuid, Account>>>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create(&self, account: Account) -> StoreResult<Account> {
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|existing| existing.email == account.email) {
            return Err(StoreError::Duplicate(account.email));
        }
        if accounts.contains_key(&account.id) {
            return Err(StoreError::Duplicate(account.id.to_string()));
        }
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn update(&self, account: &Account) -> StoreResult<()> {
        let mut accounts = self.accounts.write().await;
        let Some(existing) = accounts.get_mut(&account.id) else {
            return Err(StoreError::NotFound(account.id.to_string()));
        };
        *existing = account.clone();
        Ok(())
    }

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .any(|account| account.email == email))
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<RwLock<HashMap<TokenDigest, RefreshCredential>>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshCredentialStore for MemoryCredentialStore {
    async fn create(&self, credential: &RefreshCredential) -> StoreResult<()> {
        let mut credentials = self.credentials.write().await;
        if credentials.contains_key(&credential.token_hash) {
            return Err(StoreError::Duplicate(format!("{:?}", credential.token_hash)));
        }
        credentials.insert(credential.token_hash, credential.clone());
        Ok(())
    }

    async fn get_by_token(&self, digest: &TokenDigest) -> StoreResult<Option<RefreshCredential>> {
        Ok(self.credentials.read().await.get(digest).cloned())
    }

    async fn list_for_account(&self, account_id: Uuid) -> StoreResult<Vec<RefreshCredential>> {
        let mut found: Vec<RefreshCredential> = self
            .credentials
            .read()
            .await
            .values()
            .filter(|credential| credential.account_id == account_id)
            .cloned()
            .collect();
        found.sort_by_key(|credential| credential.created_at);
        Ok(found)
    }

    async fn update(&self, credential: &RefreshCredential) -> StoreResult<()> {
        let mut credentials = self.credentials.write().await;
        let Some(existing) = credentials.get_mut(&credential.token_hash) else {
            return Err(StoreError::NotFound(format!("{:?}", credential.token_hash)));
        };
        existing.last_used_at = credential.last_used_at;
        Ok(())
    }

    async fn revoke(&self, digest: &TokenDigest, now: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self
            .credentials
            .write()
            .await
            .get_mut(digest)
            .is_some_and(|credential| credential.revoke(now)))
    }

    async fn rotate(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
        replacement: &RefreshCredential,
    ) -> StoreResult<RotateOutcome> {
        let mut credentials = self.credentials.write().await;
        let Some(current) = credentials.get_mut(digest) else {
            return Ok(RotateOutcome::Lost);
        };
        current.last_used_at = Some(now);
        if !current.is_active(now) {
            return Ok(RotateOutcome::Lost);
        }
        if credentials.contains_key(&replacement.token_hash) {
            return Err(StoreError::Duplicate(format!("{:?}", replacement.token_hash)));
        }
        if let Some(current) = credentials.get_mut(digest) {
            current.revoke(now);
        }
        credentials.insert(replacement.token_hash, replacement.clone());
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_all_for_account(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut revoked = 0;
        for credential in self.credentials.write().await.values_mut() {
            if credential.account_id == account_id && credential.revoke(now) {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_expired(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut credentials = self.credentials.write().await;
        let before = credentials.len();
        credentials.retain(|_, credential| !credential.is_stale(now, cutoff));
        Ok((before - credentials.len()) as u64)
    }

    async fn delete_by_token(&self, digest: &TokenDigest) -> StoreResult<bool> {
        Ok(self.credentials.write().await.remove(digest).is_some())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
