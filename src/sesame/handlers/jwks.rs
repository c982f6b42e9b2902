use super::ErrorBody;
use crate::auth::{SessionEngine, token::Jwks};
use axum::{
    Json,
    extract::Extension,
    http::{StatusCode, header::CACHE_CONTROL},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    responses(
        (status = 200, description = "Public keys that verify access tokens.", body = Jwks),
        (status = 404, description = "Tokens are signed with a shared secret.", body = ErrorBody),
    ),
    tag = "keys"
)]
pub async fn jwks(engine: Extension<Arc<SessionEngine>>) -> Response {
    match engine.public_keys() {
        Ok(keys) => (
            StatusCode::OK,
            [(CACHE_CONTROL, "public, max-age=300")],
            Json(keys),
        )
            .into_response(),
        Err(err) => {
            debug!(reason = err.reason(), "no public keys to publish");
            (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: "not_found".to_string(),
                }),
            )
                .into_response()
        }
    }
}
