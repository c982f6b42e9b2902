//! HTTP adapter: routes, request tracing and background tasks around a
//! [`SessionEngine`].

pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

use crate::auth::{
    SessionEngine,
    token::{KeySource, TokenCodec},
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
};
use chrono::Utc;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle, time::MissedTickBehavior};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span, warn};
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

const REQUEST_ID: &str = "x-request-id";

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// The full application: routes, request id handling and tracing, bound to
/// `engine`.
pub fn app(engine: Arc<SessionEngine>) -> Router {
    let (router, _openapi) = router().split_for_parts();
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID),
                |_req: &_| HeaderValue::from_str(Uuid::new_v4().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(engine)),
    )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    engine: Arc<SessionEngine>,
    key_source: Arc<dyn KeySource>,
    sweep_interval: Option<Duration>,
    trust_forwarded_for: bool,
) -> Result<()> {
    let sweeper = sweep_interval.map(|every| spawn_sweeper(engine.clone(), every));
    let reloader = spawn_key_reloader(engine.codec().clone(), key_source)?;

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    let mut app = app(engine);
    if trust_forwarded_for {
        info!("Client addresses are taken from X-Forwarded-For");
        app = app.layer(Extension(handlers::TrustForwardedFor));
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    if let Some(reloader) = reloader {
        reloader.abort();
    }

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Periodically delete expired and long-revoked refresh credentials. A failed
/// pass is logged and retried on the next tick.
pub fn spawn_sweeper(engine: Arc<SessionEngine>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = engine.sweep(Utc::now()).await {
                warn!("Refresh credential sweep failed: {err}");
            }
        }
    })
}

/// Load `source` and publish the result. On failure the current keys stay in
/// place.
///
/// # Errors
/// Returns an error if the keys cannot be loaded or belong to another algorithm.
pub fn reload_keys(codec: &TokenCodec, source: &dyn KeySource) -> Result<()> {
    let keys = source.load().context("failed to load signing keys")?;
    codec
        .replace(keys)
        .context("reloaded keys do not match the configured algorithm")
}

#[cfg(unix)]
fn spawn_key_reloader(
    codec: Arc<TokenCodec>,
    source: Arc<dyn KeySource>,
) -> Result<Option<JoinHandle<()>>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    Ok(Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading signing keys");
            if let Err(err) = reload_keys(&codec, source.as_ref()) {
                error!("Key reload failed, keeping current keys: {err:#}");
            }
        }
    })))
}

#[cfg(not(unix))]
fn spawn_key_reloader(
    _codec: Arc<TokenCodec>,
    _source: Arc<dyn KeySource>,
) -> Result<Option<JoinHandle<()>>> {
    Ok(None)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}
