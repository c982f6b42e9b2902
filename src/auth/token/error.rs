use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    Malformed,
    #[error("invalid token header")]
    InvalidHeader,
    #[error("algorithm mismatch: {0}")]
    AlgorithmMismatch(String),
    #[error("missing key id")]
    MissingKid,
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid claims")]
    InvalidClaims,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("token expired")]
    Expired,
    #[error("token issued in the future")]
    NotYetValid,
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("key set does not match the configured algorithm")]
    KeyMismatch,
    #[error("symmetric secret must be at least {0} bytes")]
    WeakSecret(usize),
    #[error("key rotation is not supported for symmetric keys")]
    RotationUnsupported,
    #[error("the active key cannot be retired")]
    ActiveKey,
    #[error("no public keys to publish")]
    NoPublicKeys,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signing failed")]
    Signing,
    #[error("token lifetime out of range")]
    LifetimeOutOfRange,
}

impl TokenError {
    /// Short, stable label used as a structured log field.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::InvalidHeader => "invalid_header",
            Self::AlgorithmMismatch(_) => "algorithm_mismatch",
            Self::MissingKid => "missing_kid",
            Self::UnknownKid(_) => "unknown_kid",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidClaims => "invalid_claims",
            Self::InvalidIssuer => "invalid_issuer",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::KeyParse => "key_parse",
            Self::KeyMismatch => "key_mismatch",
            Self::WeakSecret(_) => "weak_secret",
            Self::RotationUnsupported => "rotation_unsupported",
            Self::ActiveKey => "active_key",
            Self::NoPublicKeys => "no_public_keys",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::Signing => "signing",
            Self::LifetimeOutOfRange => "lifetime_out_of_range",
        }
    }
}
