//! # Sesame (credential lifecycle engine)
//!
//! `sesame` turns an email and password into a short-lived signed access token
//! plus a long-lived, single-use refresh token, and manages the refresh tokens
//! until they are rotated, revoked or swept.
//!
//! ## Tokens
//!
//! Access tokens are compact JWS values signed with **HS256** (shared secret) or
//! **RS256** (RSA key pair). RS256 tokens carry a `kid` header equal to the RFC
//! 7638 thumbprint of the signing key, so keys can be rotated while older tokens
//! still verify. The verifying keys are published as a JWK Set at
//! `/.well-known/jwks.json`.
//!
//! ## Refresh credentials
//!
//! Refresh tokens are opaque random strings. Only their SHA-256 digest is
//! stored. Every refresh revokes the presented token and issues a replacement
//! in one atomic step; concurrent refreshes of the same token produce exactly
//! one winner. Presenting a revoked token again is a replay and can optionally
//! revoke every credential of the account.
//!
//! ## Storage
//!
//! Accounts and refresh credentials live behind the traits in
//! [`auth::store`], with a `PostgreSQL` and an in-memory implementation.

pub mod auth;
pub mod cli;
pub mod sesame;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with("sesame/"));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }
}
