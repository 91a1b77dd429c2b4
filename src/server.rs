//! HTTP gateway: routes, body validation and error-to-status mapping.
//!
//! All resolution endpoints take `POST` with a JSON body. Bodies are read as
//! raw bytes and validated per endpoint so that every malformed or
//! incomplete request maps to 400 before any player is fetched.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ResolveError;
use crate::resolver::Resolver;
use crate::types::{self, Endpoint, RawBody, Request};

/// Application state shared across all requests
#[derive(Clone)]
struct AppState {
    resolver: Resolver,
    metrics: Arc<Metrics>,
}

/// Server metrics
struct Metrics {
    total_requests: AtomicU64,
    requests_in_flight: AtomicU64,
    start_time: Instant,
}

/// RAII guard for tracking in-flight requests
struct RequestGuard<'a>(&'a AtomicU64);

impl<'a> RequestGuard<'a> {
    fn enter(metrics: &'a Metrics) -> Self {
        metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        metrics.requests_in_flight.fetch_add(1, Ordering::Relaxed);
        Self(&metrics.requests_in_flight)
    }
}

impl<'a> Drop for RequestGuard<'a> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Build the Axum application with routes and middleware
pub fn build_app(resolver: Resolver) -> Router {
    let metrics = Arc::new(Metrics {
        total_requests: AtomicU64::new(0),
        requests_in_flight: AtomicU64::new(0),
        start_time: Instant::now(),
    });

    let state = AppState { resolver, metrics };

    Router::new()
        // Resolution API
        .route(
            Endpoint::DecryptSignature.path(),
            post(decrypt_signature).fallback(method_not_allowed),
        )
        .route(
            Endpoint::GetSts.path(),
            post(get_sts).fallback(method_not_allowed),
        )
        .route(
            Endpoint::ResolveUrl.path(),
            post(resolve_url).fallback(method_not_allowed),
        )
        // Operations
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .fallback(unmatched)
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn decrypt_signature(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<types::Response>, ApiError> {
    dispatch(&state, Endpoint::DecryptSignature, &body).await
}

async fn get_sts(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<types::Response>, ApiError> {
    dispatch(&state, Endpoint::GetSts, &body).await
}

async fn resolve_url(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<types::Response>, ApiError> {
    dispatch(&state, Endpoint::ResolveUrl, &body).await
}

async fn dispatch(
    state: &AppState,
    endpoint: Endpoint,
    body: &[u8],
) -> Result<Json<types::Response>, ApiError> {
    let _guard = RequestGuard::enter(&state.metrics);

    let request = Request::parse(endpoint, body).inspect_err(|e| {
        tracing::warn!("Rejected {} request: {}", endpoint, e);
    })?;

    tracing::info!("{} for player {}", endpoint, request.player_url());

    let response = state.resolver.handle(request).await.inspect_err(|e| {
        tracing::error!("{} failed: {}", endpoint, e);
    })?;

    Ok(Json(response))
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Requests for unknown paths go through the same checks as real ones
/// (method, JSON body, player URL) before being reported as not found.
async fn unmatched(method: Method, body: Bytes) -> ApiError {
    if method != Method::POST {
        return ApiError::MethodNotAllowed;
    }
    let raw: RawBody = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => return ApiError::Resolve(e.into()),
    };
    if let Err(e) = raw.require_player_url() {
        return ApiError::Resolve(e);
    }
    ApiError::NotFound
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Get server metrics
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        total_requests: state.metrics.total_requests.load(Ordering::Relaxed),
        requests_in_flight: state.metrics.requests_in_flight.load(Ordering::Relaxed),
        uptime_seconds: state.metrics.start_time.elapsed().as_secs(),
        cached_players: state.resolver.cache().entry_count().await,
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    total_requests: u64,
    requests_in_flight: u64,
    uptime_seconds: u64,
    cached_players: u64,
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    Resolve(ResolveError),
    NotFound,
    MethodNotAllowed,
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        ApiError::Resolve(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Resolve(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Resolve(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not Found".to_string()),
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "Method Not Allowed".to_string(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
