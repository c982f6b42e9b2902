use crate::auth::store::StoreError;
use std::fmt;
use thiserror::Error;

/// Public outcome of an engine call. Internal reasons never leave the crate
/// except as `tracing` fields.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid token")]
    InvalidToken,
    #[error("account already exists")]
    DuplicateAccount,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCredentials,
    InvalidToken,
    DuplicateAccount,
    InvalidInput,
    StoreUnavailable,
    Internal,
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::InvalidToken => ErrorKind::InvalidToken,
            Self::DuplicateAccount => ErrorKind::DuplicateAccount,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(err) => Self::StoreUnavailable(err),
            // Any other store error reaching this point is a broken invariant.
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Why a refresh token or verification token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    NotFound,
    Replayed,
    Expired,
    AccountMissing,
    RotationLost,
    VerificationMismatch,
    ResetMismatch,
}

impl TokenRejection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Replayed => "replayed",
            Self::Expired => "expired",
            Self::AccountMissing => "account_missing",
            Self::RotationLost => "rotation_lost",
            Self::VerificationMismatch => "verification_mismatch",
            Self::ResetMismatch => "reset_mismatch",
        }
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a login was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRejection {
    UnknownEmail,
    WrongPassword,
    MalformedHash,
    Unverified,
}

impl CredentialRejection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownEmail => "unknown_email",
            Self::WrongPassword => "wrong_password",
            Self::MalformedHash => "malformed_hash",
            Self::Unverified => "unverified",
        }
    }
}

impl fmt::Display for CredentialRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
