//! Access-token signing and verification.
//!
//! Tokens are compact JWS (`header.claims.signature`) encoded and verified
//! with `jsonwebtoken`, signed with either HS256 or RS256. A codec is pinned to one algorithm and rejects anything
//! else, `none` included. In RS256 mode every token carries the RFC 7638
//! thumbprint of its signing key as `kid`, and keys can be rotated without a
//! restart.

mod codec;
mod error;
mod jwks;
mod keys;
#[cfg(test)]
pub(crate) mod test_keys;

pub use codec::{AccessClaims, DEFAULT_LEEWAY_SECONDS, IssuedToken, TokenCodec};
pub use error::TokenError;
pub use jwks::{Jwk, Jwks, thumbprint};
pub use keys::{
    ActiveKey, Algorithm, FileKeySource, KeySet, KeySource, MIN_SECRET_BYTES, decode_private_key,
    decode_public_key,
};
