//! Password hashing and verification.
//!
//! Hashes are Argon2id PHC strings. The work factor (Argon2 iteration count) is
//! clamped to `[MIN_COST, MAX_COST]` no matter what the caller asks for, and
//! inputs longer than `MAX_PASSWORD_BYTES` are refused instead of truncated.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::rngs::OsRng;
use std::sync::OnceLock;
use thiserror::Error;

pub const MIN_COST: u32 = 2;
pub const MAX_COST: u32 = 10;
pub const DEFAULT_COST: u32 = 3;
pub const MAX_PASSWORD_BYTES: usize = 1024;

const MEMORY_KIB: u32 = Params::DEFAULT_M_COST;
const PARALLELISM: u32 = 1;
const DUMMY_PASSWORD: &str = "sesame-dummy-password";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password is empty")]
    Empty,
    #[error("password exceeds {MAX_PASSWORD_BYTES} bytes")]
    TooLong,
    #[error("malformed password hash")]
    MalformedHash,
    #[error("password mismatch")]
    Mismatch,
    #[error("password hashing failed")]
    Hash,
}

#[derive(Debug)]
pub struct PasswordHasher {
    cost: u32,
    dummy_hash: OnceLock<Option<String>>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl PasswordHasher {
    #[must_use]
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_COST, MAX_COST),
            dummy_hash: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn cost(&self) -> u32 {
        self.cost
    }

    fn argon2(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(MEMORY_KIB, self.cost, PARALLELISM, None)
            .map_err(|_| PasswordError::Hash)?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hash a password into an Argon2id PHC string.
    ///
    /// # Errors
    ///
    /// Returns `Empty` or `TooLong` for out-of-bounds input and `Hash` if the
    /// underlying hasher fails.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        check_length(password)?;
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| PasswordError::Hash)?;
        Ok(hash.to_string())
    }

    /// Verify a password against a stored PHC string.
    ///
    /// The parameters embedded in the stored hash are used, so hashes created
    /// with an older cost keep verifying after the cost changes.
    ///
    /// # Errors
    ///
    /// Returns `Mismatch` when the password does not match and `MalformedHash`
    /// when the stored value is not a valid PHC string.
    pub fn verify(&self, password: &str, hash: &str) -> Result<(), PasswordError> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(PasswordError::Mismatch);
        }
        let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::MalformedHash)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|err| match err {
                argon2::password_hash::Error::Password => PasswordError::Mismatch,
                _ => PasswordError::MalformedHash,
            })
    }

    /// Burn the same amount of work as a real verification.
    ///
    /// Used when the account does not exist so response timing does not reveal
    /// whether an email is registered.
    pub fn verify_dummy(&self, password: &str) {
        let dummy = self
            .dummy_hash
            .get_or_init(|| self.hash(DUMMY_PASSWORD).ok());
        if let Some(hash) = dummy {
            let _ = self.verify(password, hash);
        }
    }
}

fn check_length(password: &str) -> Result<(), PasswordError> {
    if password.is_empty() {
        return Err(PasswordError::Empty);
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(PasswordError::TooLong);
    }
    Ok(())
}
