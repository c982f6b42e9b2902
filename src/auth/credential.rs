//! Opaque refresh credentials.
//!
//! The raw value is handed to the client exactly once; storage only ever sees
//! its SHA-256 digest. A credential is active while it is unrevoked and
//! unexpired, and revocation is one-way.

use crate::auth::utils::{generate_token, hash_token};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenDigest([u8; 32]);

impl TokenDigest {
    #[must_use]
    pub fn of(token: &str) -> Self {
        Self(hash_token(token))
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns `None` unless the slice is exactly 32 bytes.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// Only a prefix, enough to correlate log lines.
impl fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenDigest(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…)")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl ClientMetadata {
    #[must_use]
    pub fn new(user_agent: Option<String>, ip_address: Option<String>) -> Self {
        Self {
            user_agent,
            ip_address,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshCredential {
    pub token_hash: TokenDigest,
    pub account_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub client: ClientMetadata,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A freshly minted credential together with the raw value for the client.
#[derive(Debug)]
pub struct IssuedCredential {
    pub token: String,
    pub credential: RefreshCredential,
}

impl RefreshCredential {
    /// Mint a new credential for `account_id` that lives for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if `now + ttl` is out of range or the OS RNG fails.
    pub fn issue(
        account_id: Uuid,
        ttl: Duration,
        client: ClientMetadata,
        now: DateTime<Utc>,
    ) -> Result<IssuedCredential> {
        let expires_at = now
            .checked_add_signed(ttl)
            .context("refresh credential lifetime out of range")?;
        let token = generate_token()?;
        let credential = Self {
            token_hash: TokenDigest::of(&token),
            account_id,
            expires_at,
            revoked: false,
            revoked_at: None,
            client,
            created_at: now,
            last_used_at: None,
        };
        Ok(IssuedCredential { token, credential })
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// Returns `true` if this call changed the state.
    pub fn revoke(&mut self, now: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        self.revoked = true;
        self.revoked_at = Some(now);
        true
    }

    /// Eligible for housekeeping: expired, or revoked before `cutoff`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>) -> bool {
        self.is_expired(now) || self.revoked_at.is_some_and(|at| at < cutoff)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn issued_credential_is_active_and_hashed() {
        let now = Utc::now();
        let issued = RefreshCredential::issue(
            Uuid::new_v4(),
            Duration::days(7),
            ClientMetadata::default(),
            now,
        )
        .unwrap();
        assert!(issued.credential.is_active(now));
        assert_eq!(issued.credential.token_hash, TokenDigest::of(&issued.token));
        assert_eq!(issued.credential.expires_at, now + Duration::days(7));
    }

    #[test]
    fn unrepresentable_expiry_is_an_error() {
        let result = RefreshCredential::issue(
            Uuid::new_v4(),
            Duration::days(365 * 1_000_000),
            ClientMetadata::default(),
            Utc::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn expiry_is_strict() {
        let now = Utc::now();
        let issued =
            RefreshCredential::issue(Uuid::new_v4(), Duration::seconds(10), ClientMetadata::default(), now)
                .unwrap();
        let credential = issued.credential;
        assert!(credential.is_active(now + Duration::seconds(9)));
        assert!(!credential.is_active(now + Duration::seconds(10)));
        assert!(credential.is_expired(now + Duration::seconds(10)));
    }

    #[test]
    fn revoke_is_one_way() {
        let now = Utc::now();
        let mut credential =
            RefreshCredential::issue(Uuid::new_v4(), Duration::days(1), ClientMetadata::default(), now)
                .unwrap()
                .credential;
        assert!(credential.revoke(now));
        assert!(!credential.revoke(now + Duration::seconds(5)));
        assert_eq!(credential.revoked_at, Some(now));
        assert!(!credential.is_active(now));
    }

    #[test]
    fn stale_covers_expired_and_old_revocations() {
        let now = Utc::now();
        let cutoff = now - Duration::days(30);
        let mut credential =
            RefreshCredential::issue(Uuid::new_v4(), Duration::days(1), ClientMetadata::default(), now)
                .unwrap()
                .credential;
        assert!(!credential.is_stale(now, cutoff));

        credential.revoke(now - Duration::days(1));
        assert!(!credential.is_stale(now, cutoff));

        credential.revoked_at = Some(now - Duration::days(31));
        assert!(credential.is_stale(now, cutoff));

        assert!(credential.is_stale(now + Duration::days(2), cutoff));
    }

    #[test]
    fn digest_debug_is_truncated() {
        let digest = TokenDigest::from_bytes([0xab; 32]);
        assert_eq!(format!("{digest:?}"), "TokenDigest(abababab…)");
        assert!(TokenDigest::from_slice(&[0u8; 31]).is_none());
        assert_eq!(TokenDigest::from_slice(&[0xab; 32]), Some(digest));
    }
}
