use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// A one-shot token with its expiry; the pair is either fully present or absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl ExpiringToken {
    #[must_use]
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// Constant-time match on the value, then a strict expiry check.
    #[must_use]
    pub fn matches(&self, candidate: &str, now: DateTime<Utc>) -> bool {
        let equal: bool = self.token.as_bytes().ct_eq(candidate.as_bytes()).into();
        equal && now < self.expires_at
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub email_verified: bool,
    pub email_verification: Option<ExpiringToken>,
    pub password_reset: Option<ExpiringToken>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Build a new, unverified account. `email` must already be normalized.
    #[must_use]
    pub fn new(email: String, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            email_verified: false,
            email_verification: None,
            password_reset: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_email_verification(mut self, token: ExpiringToken) -> Self {
        self.email_verification = Some(token);
        self
    }

    #[must_use]
    pub fn verification_token_valid(&self, candidate: &str, now: DateTime<Utc>) -> bool {
        self.email_verification
            .as_ref()
            .is_some_and(|pair| pair.matches(candidate, now))
    }

    #[must_use]
    pub fn reset_token_valid(&self, candidate: &str, now: DateTime<Utc>) -> bool {
        self.password_reset
            .as_ref()
            .is_some_and(|pair| pair.matches(candidate, now))
    }

    pub fn mark_email_verified(&mut self, now: DateTime<Utc>) {
        self.email_verified = true;
        self.email_verification = None;
        self.updated_at = now;
    }

    /// Replace any pending verification token.
    pub fn set_email_verification(&mut self, token: ExpiringToken, now: DateTime<Utc>) {
        self.email_verification = Some(token);
        self.updated_at = now;
    }

    /// Replace any pending reset token.
    pub fn set_password_reset(&mut self, token: ExpiringToken, now: DateTime<Utc>) {
        self.password_reset = Some(token);
        self.updated_at = now;
    }

    /// Store a new password hash and consume the reset token.
    pub fn reset_password(&mut self, password_hash: String, now: DateTime<Utc>) {
        self.password_hash = password_hash;
        self.password_reset = None;
        self.updated_at = now;
    }
}
