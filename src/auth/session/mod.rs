//! Session engine: signup, login, refresh-token rotation and revocation.
//!
//! The engine is stateless between calls; everything it knows lives in the
//! stores and the token codec. The only mutual-exclusion point is
//! [`RefreshCredentialStore::rotate`], so concurrent refreshes of one token
//! produce exactly one winner.

mod config;

#[cfg(test)]
mod tests;

pub use config::{
    DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_PASSWORD_RESET_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS,
    DEFAULT_REPLAY_GRACE_SECONDS, DEFAULT_RETENTION_SECONDS, DEFAULT_VERIFICATION_TTL_SECONDS,
    MAX_LIFETIME_SECONDS, ReplayResponse, SessionConfig,
};

use crate::auth::account::{Account, ExpiringToken};
use crate::auth::credential::{ClientMetadata, RefreshCredential, TokenDigest};
use crate::auth::error::{AuthError, CredentialRejection, TokenRejection};
use crate::auth::password::{MAX_PASSWORD_BYTES, PasswordError, PasswordHasher};
use crate::auth::store::{AccountStore, RefreshCredentialStore, RotateOutcome, StoreError};
use crate::auth::token::{AccessClaims, Jwks, TokenCodec, TokenError};
use crate::auth::utils::{MIN_PASSWORD_LEN, generate_token, normalize_email, valid_email};
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub account_id: Uuid,
    /// Raw email verification token; delivering it is up to the caller.
    pub verification_token: String,
}

fn token_rejected(reason: TokenRejection) -> AuthError {
    info!(reason = %reason, "token rejected");
    AuthError::InvalidToken
}

fn login_rejected(reason: CredentialRejection) -> AuthError {
    info!(reason = %reason, "login rejected");
    AuthError::InvalidCredentials
}

fn internal(err: impl Into<anyhow::Error>) -> AuthError {
    AuthError::Internal(err.into())
}

fn expiring_token(ttl: Duration, now: DateTime<Utc>) -> Result<ExpiringToken, AuthError> {
    let expires_at = now
        .checked_add_signed(ttl)
        .ok_or_else(|| internal(anyhow!("token lifetime out of range")))?;
    let token = generate_token().map_err(AuthError::Internal)?;
    Ok(ExpiringToken::new(token, expires_at))
}

fn check_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput("password too short"));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(AuthError::InvalidInput("password too long"));
    }
    Ok(())
}

pub struct SessionEngine {
    accounts: Arc<dyn AccountStore>,
    credentials: Arc<dyn RefreshCredentialStore>,
    hasher: Arc<PasswordHasher>,
    codec: Arc<TokenCodec>,
    config: SessionConfig,
}

impl SessionEngine {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        credentials: Arc<dyn RefreshCredentialStore>,
        hasher: PasswordHasher,
        codec: Arc<TokenCodec>,
        config: SessionConfig,
    ) -> Self {
        Self {
            accounts,
            credentials,
            hasher: Arc::new(hasher),
            codec,
            config,
        }
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create an unverified account and its email verification token.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a malformed email or an out-of-bounds password,
    /// `DuplicateAccount` if the email is taken.
    #[instrument(skip_all)]
    pub async fn signup(&self, email: &str, password: &str) -> Result<SignupOutcome, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidInput("invalid email"));
        }
        check_password(password)?;
        if self.accounts.exists_by_email(&email).await? {
            return Err(AuthError::DuplicateAccount);
        }

        let password_hash = self.hash_password(password.to_string()).await?;
        let now = Utc::now();
        let verification = expiring_token(self.config.verification_ttl(), now)?;
        let verification_token = verification.token.clone();
        let account =
            Account::new(email, password_hash, now).with_email_verification(verification);

        let account = match self.accounts.create(account).await {
            Ok(account) => account,
            Err(StoreError::Duplicate(_)) => return Err(AuthError::DuplicateAccount),
            Err(err) => return Err(err.into()),
        };
        info!(account_id = %account.id, "account created");

        Ok(SignupOutcome {
            account_id: account.id,
            verification_token,
        })
    }

    /// Exchange an email and password for a token pair.
    ///
    /// # Errors
    ///
    /// Every credential problem is `InvalidCredentials`; the actual reason is
    /// only logged.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: ClientMetadata,
    ) -> Result<TokenPair, AuthError> {
        let email = normalize_email(email);
        let Some(account) = self.accounts.get_by_email(&email).await? else {
            self.verify_dummy(password.to_string()).await?;
            return Err(login_rejected(CredentialRejection::UnknownEmail));
        };

        match self
            .verify_password(password.to_string(), account.password_hash.clone())
            .await?
        {
            Ok(()) => {}
            Err(PasswordError::MalformedHash) => {
                warn!(account_id = %account.id, "stored password hash is malformed");
                return Err(login_rejected(CredentialRejection::MalformedHash));
            }
            Err(_) => return Err(login_rejected(CredentialRejection::WrongPassword)),
        }

        if self.config.require_verified_email() && !account.email_verified {
            return Err(login_rejected(CredentialRejection::Unverified));
        }

        let now = Utc::now();
        let access_token = self.issue_access_token(account.id, now)?;
        let issued = RefreshCredential::issue(account.id, self.config.refresh_ttl(), client, now)
            .map_err(AuthError::Internal)?;
        self.credentials.create(&issued.credential).await?;
        info!(account_id = %account.id, "login succeeded");

        Ok(TokenPair {
            access_token,
            refresh_token: issued.token,
            expires_in: self.config.access_ttl_seconds(),
        })
    }

    /// Rotate a refresh token: revoke the presented one and hand out a new pair.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for unknown, revoked, expired or orphaned tokens and for
    /// the losers of a concurrent rotation.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: ClientMetadata,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let digest = TokenDigest::of(refresh_token);

        let Some(current) = self.credentials.get_by_token(&digest).await? else {
            return Err(token_rejected(TokenRejection::NotFound));
        };
        if current.revoked {
            self.handle_replay(&current, now).await?;
            return Err(token_rejected(TokenRejection::Replayed));
        }
        if current.is_expired(now) {
            return Err(token_rejected(TokenRejection::Expired));
        }
        if self.accounts.get_by_id(current.account_id).await?.is_none() {
            return Err(token_rejected(TokenRejection::AccountMissing));
        }

        // Signing has no side effects, so a lost rotation simply drops it.
        let access_token = self.issue_access_token(current.account_id, now)?;
        let replacement =
            RefreshCredential::issue(current.account_id, self.config.refresh_ttl(), client, now)
                .map_err(AuthError::Internal)?;

        match self
            .credentials
            .rotate(&digest, now, &replacement.credential)
            .await?
        {
            RotateOutcome::Rotated => {
                debug!(account_id = %current.account_id, "refresh token rotated");
                Ok(TokenPair {
                    access_token,
                    refresh_token: replacement.token,
                    expires_in: self.config.access_ttl_seconds(),
                })
            }
            RotateOutcome::Lost => Err(token_rejected(TokenRejection::RotationLost)),
        }
    }

    async fn handle_replay(
        &self,
        credential: &RefreshCredential,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let Some(revoked_at) = credential.revoked_at else {
            return Ok(());
        };
        let age = now.signed_duration_since(revoked_at);
        match self.config.replay_response() {
            ReplayResponse::RevokeAll if age >= self.config.replay_grace() => {
                let revoked = self
                    .credentials
                    .revoke_all_for_account(credential.account_id, now)
                    .await?;
                warn!(
                    account_id = %credential.account_id,
                    revoked,
                    "revoked refresh token replayed, all credentials revoked"
                );
            }
            _ => {
                warn!(account_id = %credential.account_id, "revoked refresh token replayed");
            }
        }
        Ok(())
    }

    /// Revoke one refresh token. Unknown and already revoked tokens succeed.
    ///
    /// # Errors
    ///
    /// Only store failures.
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let changed = self
            .credentials
            .revoke(&TokenDigest::of(refresh_token), Utc::now())
            .await?;
        debug!(changed, "logout");
        Ok(())
    }

    /// Revoke every active refresh token of an account.
    ///
    /// # Errors
    ///
    /// Only store failures.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn logout_all(&self, account_id: Uuid) -> Result<u64, AuthError> {
        let revoked = self
            .credentials
            .revoke_all_for_account(account_id, Utc::now())
            .await?;
        info!(revoked, "logged out everywhere");
        Ok(revoked)
    }

    /// # Errors
    ///
    /// `InvalidToken` for any verification failure; the reason is logged.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.codec.verify(token).map_err(|err| {
            info!(reason = err.reason(), "access token rejected");
            AuthError::InvalidToken
        })
    }

    /// Mark an account verified if `token` matches its pending verification.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for unknown accounts, mismatched or expired tokens.
    #[instrument(skip_all)]
    pub async fn verify_email(&self, email: &str, token: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let Some(mut account) = self.accounts.get_by_email(&email).await? else {
            return Err(token_rejected(TokenRejection::AccountMissing));
        };
        if account.email_verified {
            return Ok(());
        }
        let now = Utc::now();
        if !account.verification_token_valid(token, now) {
            return Err(token_rejected(TokenRejection::VerificationMismatch));
        }
        account.mark_email_verified(now);
        self.accounts.update(&account).await?;
        info!(account_id = %account.id, "email verified");
        Ok(())
    }

    /// Issue a fresh verification token for an unverified account, replacing
    /// the pending one.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for unknown accounts, `InvalidInput` if the email is
    /// already verified.
    #[instrument(skip_all)]
    pub async fn resend_verification(&self, email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email);
        let Some(mut account) = self.accounts.get_by_email(&email).await? else {
            return Err(token_rejected(TokenRejection::AccountMissing));
        };
        if account.email_verified {
            return Err(AuthError::InvalidInput("email already verified"));
        }
        let now = Utc::now();
        let verification = expiring_token(self.config.verification_ttl(), now)?;
        let token = verification.token.clone();
        account.set_email_verification(verification, now);
        self.accounts.update(&account).await?;
        info!(account_id = %account.id, "verification token reissued");
        Ok(token)
    }

    /// Start a password reset. Returns the raw reset token for the caller to
    /// deliver, or `None` when no account has this email.
    ///
    /// # Errors
    ///
    /// Only store failures.
    #[instrument(skip_all)]
    pub async fn request_password_reset(&self, email: &str) -> Result<Option<String>, AuthError> {
        let email = normalize_email(email);
        let Some(mut account) = self.accounts.get_by_email(&email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(None);
        };
        let now = Utc::now();
        let reset = expiring_token(self.config.password_reset_ttl(), now)?;
        let token = reset.token.clone();
        account.set_password_reset(reset, now);
        self.accounts.update(&account).await?;
        info!(account_id = %account.id, "password reset requested");
        Ok(Some(token))
    }

    /// Set a new password with a pending reset token. The token is consumed
    /// and every refresh credential of the account is revoked.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for unknown accounts, mismatched or expired tokens,
    /// `InvalidInput` for an out-of-bounds password.
    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let Some(mut account) = self.accounts.get_by_email(&email).await? else {
            return Err(token_rejected(TokenRejection::AccountMissing));
        };
        let now = Utc::now();
        if !account.reset_token_valid(token, now) {
            return Err(token_rejected(TokenRejection::ResetMismatch));
        }
        check_password(new_password)?;

        let password_hash = self.hash_password(new_password.to_string()).await?;
        account.reset_password(password_hash, now);
        self.accounts.update(&account).await?;
        let revoked = self
            .credentials
            .revoke_all_for_account(account.id, now)
            .await?;
        info!(account_id = %account.id, revoked, "password reset");
        Ok(())
    }

    /// Delete refresh credentials that are expired, or were revoked longer
    /// than the retention period before `now`.
    ///
    /// # Errors
    ///
    /// Only store failures.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let cutoff = now
            .checked_sub_signed(self.config.retention())
            .ok_or_else(|| internal(anyhow!("retention cutoff out of range")))?;
        let deleted = self.credentials.delete_expired(now, cutoff).await?;
        info!(deleted, "refresh credential sweep finished");
        Ok(deleted)
    }

    /// # Errors
    ///
    /// `TokenError::NoPublicKeys` when signing with a shared secret.
    pub fn public_keys(&self) -> Result<Jwks, TokenError> {
        self.codec.jwks()
    }

    /// Name of the credential backend, after a round trip to it.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the backend does not answer.
    pub async fn health(&self) -> Result<&'static str, AuthError> {
        self.credentials.health_check().await?;
        Ok(self.credentials.backend_name())
    }

    fn issue_access_token(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<String, AuthError> {
        self.codec
            .issue_at(&account_id.to_string(), self.config.access_ttl(), now)
            .map(|issued| issued.token)
            .map_err(internal)
    }

    async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(internal)?
            .map_err(|err| match err {
                PasswordError::Empty | PasswordError::TooLong => {
                    AuthError::InvalidInput("invalid password")
                }
                other => internal(other),
            })
    }

    async fn verify_password(
        &self,
        password: String,
        hash: String,
    ) -> Result<Result<(), PasswordError>, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(internal)
    }

    async fn verify_dummy(&self, password: String) -> Result<(), AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.verify_dummy(&password))
            .await
            .map_err(internal)
    }
}
