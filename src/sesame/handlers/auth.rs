//! Account and session endpoints under `/v1/auth`.

use super::{ApiError, Client, ErrorBody, bearer_token};
use crate::auth::{AuthError, SessionEngine, TokenPair};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SignupResponse {
    pub account_id: Uuid,
    /// Email verification token. Delivering it to the address owner is left
    /// to the caller.
    pub verification_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub account_id: String,
    pub issuer: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created, email not yet verified.", body = SignupResponse),
        (status = 400, description = "Malformed email or unacceptable password.", body = ErrorBody),
        (status = 409, description = "Email already registered.", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn signup(
    engine: Extension<Arc<SessionEngine>>,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = engine.signup(&request.email, &request.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            account_id: outcome.account_id,
            verification_token: outcome.verification_token,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified."),
        (status = 401, description = "Unknown, mismatched or expired token.", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn verify_email(
    engine: Extension<Arc<SessionEngine>>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<StatusCode, ApiError> {
    engine.verify_email(&request.email, &request.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Access and refresh token.", body = TokenPair),
        (status = 401, description = "Invalid credentials.", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login(
    engine: Extension<Arc<SessionEngine>>,
    Client(client): Client,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = engine
        .login(&request.email, &request.password, client)
        .await?;
    Ok(Json(pair))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair; the presented refresh token is now revoked.", body = TokenPair),
        (status = 401, description = "Unknown, revoked or expired refresh token.", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn refresh(
    engine: Extension<Arc<SessionEngine>>,
    Client(client): Client,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = engine.refresh(&request.refresh_token, client).await?;
    Ok(Json(pair))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = RefreshRequest,
    responses(
        (status = 204, description = "Refresh token revoked, or it was never valid."),
    ),
    tag = "auth"
)]
pub async fn logout(
    engine: Extension<Arc<SessionEngine>>,
    Json(request): Json<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    engine.logout(&request.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    responses(
        (status = 200, description = "Every refresh token of the caller revoked.", body = LogoutAllResponse),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout_all(
    engine: Extension<Arc<SessionEngine>>,
    headers: HeaderMap,
) -> Result<Json<LogoutAllResponse>, ApiError> {
    let account_id = authenticate(&engine, &headers)?;
    let revoked = engine.logout_all(account_id).await?;
    Ok(Json(LogoutAllResponse { revoked }))
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Claims of the presented access token.", body = MeResponse),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(
    engine: Extension<Arc<SessionEngine>>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or(AuthError::InvalidToken)?;
    let claims = engine.verify_access_token(token)?;
    Ok(Json(MeResponse {
        account_id: claims.sub,
        issuer: claims.iss,
        issued_at: claims.iat,
        expires_at: claims.exp,
    }))
}

fn authenticate(engine: &SessionEngine, headers: &HeaderMap) -> Result<Uuid, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::InvalidToken)?;
    let claims = engine.verify_access_token(token)?;
    Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)
}
