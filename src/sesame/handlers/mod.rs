//! Route handlers and the pieces they share: error mapping, bearer
//! extraction and client metadata.

pub mod auth;
pub mod health;
pub mod jwks;

use crate::auth::{AuthError, ErrorKind, credential::ClientMetadata};
use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts},
    http::{
        HeaderMap, StatusCode,
        header::{AUTHORIZATION, USER_AGENT},
        request::Parts,
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr};
use tracing::error;
use utoipa::ToSchema;

const MAX_USER_AGENT_LEN: usize = 512;

/// Body of every error response. `error` is a fixed code, never a reason.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

/// [`AuthError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self.0.kind() {
            ErrorKind::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            ErrorKind::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            ErrorKind::DuplicateAccount => (StatusCode::CONFLICT, "duplicate_account"),
            ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, "invalid_input"),
            ErrorKind::StoreUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        match &self.0 {
            AuthError::StoreUnavailable(err) | AuthError::Internal(err) => {
                error!("{}: {err:#}", self.0);
            }
            _ => {}
        }
        (
            status,
            Json(ErrorBody {
                error: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Request extension marking the service as deployed behind a proxy whose
/// `X-Forwarded-For` header can be trusted.
#[derive(Debug, Clone, Copy)]
pub struct TrustForwardedFor;

/// Device details recorded on refresh credentials.
///
/// The address is the peer of the connection unless [`TrustForwardedFor`]
/// is installed, in which case the first `X-Forwarded-For` entry wins.
#[derive(Debug, Clone, Default)]
pub struct Client(pub ClientMetadata);

impl<S: Send + Sync> FromRequestParts<S> for Client {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.chars().take(MAX_USER_AGENT_LEN).collect::<String>())
            .filter(|v| !v.is_empty());

        let forwarded = parts
            .extensions
            .get::<TrustForwardedFor>()
            .and_then(|_| parts.headers.get("x-forwarded-for"))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| v.parse::<std::net::IpAddr>().is_ok())
            .map(str::to_string);

        let ip_address = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(Self(ClientMetadata::new(user_agent, ip_address)))
    }
}
