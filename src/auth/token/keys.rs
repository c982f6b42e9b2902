//! Signing and verification key material.
//!
//! A [`KeySet`] is an immutable value. The codec publishes whole key sets, so
//! a reader never observes a half-rotated state.

use super::error::TokenError;
use super::jwks::thumbprint;
use anyhow::{Context, Result};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    HS256,
    RS256,
}

impl Algorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
        }
    }

    pub(crate) fn jwt(self) -> jsonwebtoken::Algorithm {
        match self {
            Self::HS256 => jsonwebtoken::Algorithm::HS256,
            Self::RS256 => jsonwebtoken::Algorithm::RS256,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(Self::HS256),
            "RS256" => Ok(Self::RS256),
            other => Err(TokenError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct ActiveKey {
    kid: String,
    encoding_key: Arc<EncodingKey>,
    public_key: RsaPublicKey,
}

impl ActiveKey {
    /// # Errors
    ///
    /// Returns `KeyParse` if the key cannot be re-encoded as PKCS#1 DER.
    pub fn new(private_key: RsaPrivateKey) -> Result<Self, TokenError> {
        let der = private_key
            .to_pkcs1_der()
            .map_err(|_| TokenError::KeyParse)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            kid: thumbprint(&public_key),
            encoding_key: Arc::new(EncodingKey::from_rsa_der(der.as_bytes())),
            public_key,
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

impl fmt::Debug for ActiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveKey").field("kid", &self.kid).finish_non_exhaustive()
    }
}

pub enum KeySet {
    Symmetric {
        secret: SecretSlice<u8>,
        encoding_key: Arc<EncodingKey>,
    },
    Asymmetric {
        active: ActiveKey,
        /// Every key tokens may be verified with, keyed by kid. Always includes the active key.
        verifying: BTreeMap<String, RsaPublicKey>,
    },
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symmetric { .. } => f.debug_struct("Symmetric").finish_non_exhaustive(),
            Self::Asymmetric { active, verifying } => f
                .debug_struct("Asymmetric")
                .field("active", active)
                .field("verifying", &verifying.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

impl KeySet {
    /// # Errors
    ///
    /// Returns `WeakSecret` if the secret is shorter than [`MIN_SECRET_BYTES`].
    pub fn symmetric(secret: Vec<u8>) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(TokenError::WeakSecret(MIN_SECRET_BYTES));
        }
        Ok(Self::Symmetric {
            encoding_key: Arc::new(EncodingKey::from_secret(&secret)),
            secret: SecretSlice::from(secret),
        })
    }

    /// Build an asymmetric key set from the active private key and any
    /// retired public keys that should keep verifying.
    ///
    /// # Errors
    ///
    /// Returns `KeyParse` if the private key cannot be prepared for signing.
    pub fn asymmetric(
        private_key: RsaPrivateKey,
        retired: Vec<RsaPublicKey>,
    ) -> Result<Self, TokenError> {
        let active = ActiveKey::new(private_key)?;
        let mut verifying: BTreeMap<String, RsaPublicKey> = retired
            .into_iter()
            .map(|key| (thumbprint(&key), key))
            .collect();
        verifying.insert(active.kid.clone(), active.public_key.clone());
        Ok(Self::Asymmetric { active, verifying })
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Symmetric { .. } => Algorithm::HS256,
            Self::Asymmetric { .. } => Algorithm::RS256,
        }
    }

    #[must_use]
    pub fn active_kid(&self) -> Option<&str> {
        match self {
            Self::Symmetric { .. } => None,
            Self::Asymmetric { active, .. } => Some(active.kid()),
        }
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        match self {
            Self::Symmetric { encoding_key, .. } => encoding_key,
            Self::Asymmetric { active, .. } => active.encoding_key(),
        }
    }

    /// The key a token signed under `kid` verifies with.
    pub(crate) fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, TokenError> {
        match self {
            Self::Symmetric { secret, .. } => Ok(DecodingKey::from_secret(secret.expose_secret())),
            Self::Asymmetric { verifying, .. } => {
                let kid = kid.ok_or(TokenError::MissingKid)?;
                let key = verifying
                    .get(kid)
                    .ok_or_else(|| TokenError::UnknownKid(kid.to_string()))?;
                Ok(DecodingKey::from_rsa_raw_components(
                    &key.n().to_bytes_be(),
                    &key.e().to_bytes_be(),
                ))
            }
        }
    }

    /// Same verifying keys, new active key; the old active key stays verifiable.
    pub(crate) fn rotated(&self, private_key: RsaPrivateKey) -> Result<Self, TokenError> {
        let Self::Asymmetric { verifying, .. } = self else {
            return Err(TokenError::RotationUnsupported);
        };
        let active = ActiveKey::new(private_key)?;
        let mut verifying = verifying.clone();
        verifying.insert(active.kid.clone(), active.public_key.clone());
        Ok(Self::Asymmetric { active, verifying })
    }

    pub(crate) fn without(&self, kid: &str) -> Result<Self, TokenError> {
        let Self::Asymmetric { active, verifying } = self else {
            return Err(TokenError::RotationUnsupported);
        };
        if active.kid == kid {
            return Err(TokenError::ActiveKey);
        }
        if !verifying.contains_key(kid) {
            return Err(TokenError::UnknownKid(kid.to_string()));
        }
        let mut verifying = verifying.clone();
        verifying.remove(kid);
        Ok(Self::Asymmetric {
            active: active.clone(),
            verifying,
        })
    }
}

/// Decode an RSA private key from PEM or DER, PKCS#8 or PKCS#1.
///
/// # Errors
///
/// Returns `KeyParse` if no encoding matches.
pub fn decode_private_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey, TokenError> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| TokenError::KeyParse)?;
        if let Ok(k) = RsaPrivateKey::from_pkcs8_pem(s) {
            return Ok(k);
        }
        if let Ok(k) = RsaPrivateKey::from_pkcs1_pem(s) {
            return Ok(k);
        }
        return Err(TokenError::KeyParse);
    }

    if let Ok(k) = RsaPrivateKey::from_pkcs8_der(pem_or_der) {
        return Ok(k);
    }
    if let Ok(k) = RsaPrivateKey::from_pkcs1_der(pem_or_der) {
        return Ok(k);
    }
    Err(TokenError::KeyParse)
}

/// Decode an RSA public key from PEM or DER, SPKI or PKCS#1.
///
/// # Errors
///
/// Returns `KeyParse` if no encoding matches.
pub fn decode_public_key(pem_or_der: &[u8]) -> Result<RsaPublicKey, TokenError> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| TokenError::KeyParse)?;
        if let Ok(k) = RsaPublicKey::from_public_key_pem(s) {
            return Ok(k);
        }
        if let Ok(k) = RsaPublicKey::from_pkcs1_pem(s) {
            return Ok(k);
        }
        return Err(TokenError::KeyParse);
    }

    if let Ok(k) = RsaPublicKey::from_public_key_der(pem_or_der) {
        return Ok(k);
    }
    if let Ok(k) = RsaPublicKey::from_pkcs1_der(pem_or_der) {
        return Ok(k);
    }
    Err(TokenError::KeyParse)
}

/// Where the codec gets its key material from, at startup and on reload.
pub trait KeySource: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the key material cannot be read or parsed.
    fn load(&self) -> Result<KeySet>;
}

/// Key material configured from the command line: an inline HS256 secret, or
/// RSA key files re-read on every load.
#[derive(Debug)]
pub enum FileKeySource {
    Secret(SecretString),
    Rsa {
        signing_key: PathBuf,
        verification_keys: Vec<PathBuf>,
    },
}

impl KeySource for FileKeySource {
    fn load(&self) -> Result<KeySet> {
        match self {
            Self::Secret(secret) => {
                let bytes = secret.expose_secret().as_bytes().to_vec();
                KeySet::symmetric(bytes).context("invalid JWT secret")
            }
            Self::Rsa {
                signing_key,
                verification_keys,
            } => {
                let raw = std::fs::read(signing_key).with_context(|| {
                    format!("failed to read signing key {}", signing_key.display())
                })?;
                let private_key = decode_private_key(&raw).with_context(|| {
                    format!("failed to parse signing key {}", signing_key.display())
                })?;

                let mut retired = Vec::with_capacity(verification_keys.len());
                for path in verification_keys {
                    let raw = std::fs::read(path).with_context(|| {
                        format!("failed to read verification key {}", path.display())
                    })?;
                    retired.push(decode_public_key(&raw).with_context(|| {
                        format!("failed to parse verification key {}", path.display())
                    })?);
                }

                KeySet::asymmetric(private_key, retired)
                    .with_context(|| format!("invalid signing key {}", signing_key.display()))
            }
        }
    }
}
