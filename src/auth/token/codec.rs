use super::error::TokenError;
use super::jwks::{Jwk, Jwks};
use super::keys::{Algorithm, KeySet};
use arc_swap::ArcSwap;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Header, Validation};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_LEEWAY_SECONDS: i64 = 5;

/// Verified access-token claims. `kid` comes from the verified header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip)]
    pub kid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Recover the declared `alg` of a header jsonwebtoken refused to parse, so
/// `none` and unknown algorithms are reported as a mismatch.
fn declared_alg(token: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Declared {
        alg: String,
    }

    let header = token.split('.').next()?;
    let bytes = Base64UrlUnpadded::decode_vec(header).ok()?;
    serde_json::from_slice::<Declared>(&bytes)
        .ok()
        .map(|declared| declared.alg)
}

fn header_error(token: &str, err: &jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::Json(_) | ErrorKind::Utf8(_) => declared_alg(token)
            .map_or(TokenError::InvalidHeader, TokenError::AlgorithmMismatch),
        _ => TokenError::Malformed,
    }
}

fn verification_error(alg: jsonwebtoken::Algorithm, err: &jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => TokenError::AlgorithmMismatch(format!("{alg:?}")),
        ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        ErrorKind::MissingRequiredClaim(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            TokenError::InvalidClaims
        }
        _ => TokenError::Malformed,
    }
}

/// Signs and verifies access tokens with a single pinned algorithm.
#[derive(Debug)]
pub struct TokenCodec {
    algorithm: Algorithm,
    issuer: String,
    leeway: Duration,
    keys: ArcSwap<KeySet>,
}

impl TokenCodec {
    /// # Errors
    ///
    /// Returns `KeyMismatch` if the key set does not belong to `algorithm`.
    pub fn new(
        algorithm: Algorithm,
        issuer: impl Into<String>,
        keys: KeySet,
    ) -> Result<Self, TokenError> {
        if keys.algorithm() != algorithm {
            return Err(TokenError::KeyMismatch);
        }
        Ok(Self {
            algorithm,
            issuer: issuer.into(),
            leeway: Duration::seconds(DEFAULT_LEEWAY_SECONDS),
            keys: ArcSwap::from_pointee(keys),
        })
    }

    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn active_kid(&self) -> Option<String> {
        self.keys.load().active_kid().map(str::to_string)
    }

    /// Sign an access token for `subject` that lives for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or signing fails.
    pub fn issue(&self, subject: &str, ttl: Duration) -> Result<IssuedToken, TokenError> {
        self.issue_at(subject, ttl, Utc::now())
    }

    /// Like [`Self::issue`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `LifetimeOutOfRange` if `now + ttl` is not representable, and
    /// `Signing` if jsonwebtoken cannot sign with the active key.
    pub fn issue_at(
        &self,
        subject: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(TokenError::LifetimeOutOfRange)?;
        let keys = self.keys.load();

        let mut header = Header::new(self.algorithm.jwt());
        header.kid = keys.active_kid().map(str::to_string);
        let claims = AccessClaims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            kid: None,
        };
        let token = jsonwebtoken::encode(&header, &claims, keys.encoding_key())
            .map_err(|_| TokenError::Signing)?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verify a token against the current key set and return its claims.
    ///
    /// # Errors
    ///
    /// Returns the first check that failed; see [`TokenError::reason`].
    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Like [`Self::verify`] with an explicit clock.
    ///
    /// jsonwebtoken pins the algorithm, checks the signature, the issuer and
    /// the required claims. The `exp`/`iat` window is checked here against
    /// `now`, since jsonwebtoken only reads the system clock.
    ///
    /// # Errors
    ///
    /// Returns the first check that failed; see [`TokenError::reason`].
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        if token.split('.').count() != 3 {
            return Err(TokenError::Malformed);
        }

        let header = jsonwebtoken::decode_header(token).map_err(|err| header_error(token, &err))?;
        if header.alg != self.algorithm.jwt() {
            return Err(TokenError::AlgorithmMismatch(format!("{:?}", header.alg)));
        }

        let keys = self.keys.load();
        let decoding_key = keys.decoding_key(header.kid.as_deref())?;

        let mut validation = Validation::new(self.algorithm.jwt());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = jsonwebtoken::decode::<AccessClaims>(token, &decoding_key, &validation)
            .map_err(|err| verification_error(header.alg, &err))?;
        let mut claims = data.claims;

        let now = now.timestamp();
        let leeway = self.leeway.num_seconds();
        if claims.exp.saturating_add(leeway) <= now {
            return Err(TokenError::Expired);
        }
        if claims.iat.saturating_sub(leeway) > now {
            return Err(TokenError::NotYetValid);
        }

        claims.kid = data.header.kid;
        Ok(claims)
    }

    /// Make `private_key` the active signing key; previous keys keep verifying.
    ///
    /// Returns the new key id.
    ///
    /// # Errors
    ///
    /// Returns `RotationUnsupported` for symmetric codecs.
    pub fn rotate(&self, private_key: RsaPrivateKey) -> Result<String, TokenError> {
        let mut outcome = Err(TokenError::RotationUnsupported);
        self.keys.rcu(|current| match current.rotated(private_key.clone()) {
            Ok(next) => {
                outcome = Ok(next.active_kid().map(str::to_string).unwrap_or_default());
                Arc::new(next)
            }
            Err(err) => {
                outcome = Err(err);
                Arc::clone(current)
            }
        });
        let kid = outcome?;
        info!(kid = %kid, "signing key rotated");
        Ok(kid)
    }

    /// Stop accepting tokens signed by `kid`.
    ///
    /// # Errors
    ///
    /// Returns `ActiveKey` for the active key, `UnknownKid` if no such key
    /// is known, and `RotationUnsupported` for symmetric codecs.
    pub fn retire(&self, kid: &str) -> Result<(), TokenError> {
        let mut outcome = Ok(());
        self.keys.rcu(|current| match current.without(kid) {
            Ok(next) => {
                outcome = Ok(());
                Arc::new(next)
            }
            Err(err) => {
                outcome = Err(err);
                Arc::clone(current)
            }
        });
        outcome?;
        info!(kid = %kid, "verification key retired");
        Ok(())
    }

    /// Publish a freshly loaded key set.
    ///
    /// # Errors
    ///
    /// Returns `KeyMismatch` if the key set belongs to another algorithm.
    pub fn replace(&self, keys: KeySet) -> Result<(), TokenError> {
        if keys.algorithm() != self.algorithm {
            return Err(TokenError::KeyMismatch);
        }
        let kid = keys.active_kid().map(str::to_string);
        self.keys.store(Arc::new(keys));
        info!(kid = ?kid, "key set replaced");
        Ok(())
    }

    /// The public half of every verifying key.
    ///
    /// # Errors
    ///
    /// Returns `NoPublicKeys` for symmetric codecs.
    pub fn jwks(&self) -> Result<Jwks, TokenError> {
        match self.keys.load().as_ref() {
            KeySet::Symmetric { .. } => Err(TokenError::NoPublicKeys),
            KeySet::Asymmetric { verifying, .. } => Ok(Jwks {
                keys: verifying
                    .iter()
                    .map(|(kid, key)| Jwk::from_rsa_public_key(key, kid.clone()))
                    .collect(),
            }),
        }
    }
}
