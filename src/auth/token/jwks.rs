use super::error::TokenError;
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

/// JSON Web Key Set served at `/.well-known/jwks.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Serialize this JWKS to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    pub kid: String,
    pub n: String,
    pub e: String,
}

impl Jwk {
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            kid: kid.into(),
            n: Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be()),
            e: Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be()),
        }
    }

    /// Convert this JWK back to an `RsaPublicKey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base64url values cannot be decoded or the RSA key is invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, TokenError> {
        let n_bytes = Base64UrlUnpadded::decode_vec(&self.n).map_err(|_| TokenError::KeyParse)?;
        let e_bytes = Base64UrlUnpadded::decode_vec(&self.e).map_err(|_| TokenError::KeyParse)?;
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&e_bytes);
        RsaPublicKey::new(n, e).map_err(|_| TokenError::KeyParse)
    }
}

/// RFC 7638 JWK SHA-256 thumbprint, used as the `kid`.
#[must_use]
pub fn thumbprint(public_key: &RsaPublicKey) -> String {
    let e = Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be());
    let n = Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be());
    // Required members only, lexicographic order, no whitespace.
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    let digest = Sha256::digest(canonical.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::token::keys::decode_private_key;
    use crate::auth::token::test_keys::{PRIMARY_PRIVATE_KEY_PEM, SECONDARY_PRIVATE_KEY_PEM};

    fn public(pem: &str) -> RsaPublicKey {
        RsaPublicKey::from(&decode_private_key(pem.as_bytes()).unwrap())
    }

    #[test]
    fn thumbprint_is_stable_and_distinct() {
        let primary = public(PRIMARY_PRIVATE_KEY_PEM);
        let secondary = public(SECONDARY_PRIVATE_KEY_PEM);
        assert_eq!(thumbprint(&primary), thumbprint(&primary));
        assert_ne!(thumbprint(&primary), thumbprint(&secondary));
        // 32 bytes, base64url without padding.
        assert_eq!(thumbprint(&primary).len(), 43);
    }

    #[test]
    fn jwk_round_trips_public_key() {
        let primary = public(PRIMARY_PRIVATE_KEY_PEM);
        let jwk = Jwk::from_rsa_public_key(&primary, thumbprint(&primary));
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg.as_deref(), Some("RS256"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert_eq!(jwk.to_rsa_public_key().unwrap(), primary);
    }

    #[test]
    fn jwks_serializes_use_field() {
        let primary = public(PRIMARY_PRIVATE_KEY_PEM);
        let jwks = Jwks {
            keys: vec![Jwk::from_rsa_public_key(&primary, "k1")],
        };
        let json = jwks.to_json_pretty().unwrap();
        assert!(json.contains(r#""use": "sig""#));
        assert!(jwks.find_by_kid("k1").is_some());
        assert!(jwks.find_by_kid("k2").is_none());
    }

    #[test]
    fn bad_base64_is_a_key_parse_error() {
        let jwk = Jwk {
            kty: "RSA".into(),
            alg: None,
            key_use: None,
            kid: "x".into(),
            n: "***".into(),
            e: "AQAB".into(),
        };
        assert!(matches!(jwk.to_rsa_public_key(), Err(TokenError::KeyParse)));
    }
}
