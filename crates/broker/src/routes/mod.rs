//! HTTP route handlers for the broker.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                    - Liveness check
//! GET    /health/ready              - Readiness check (store ping)
//!
//! # Orders
//! GET    /v1/orders/{order_uid}     - Order aggregate as JSON (cache, then store)
//! GET    /v1/orders/                - Blank id, always 400
//!
//! # Admin
//! GET    /v1/admin/cache            - Cache entry count
//! DELETE /v1/admin/cache/{order_uid} - Evict one cached order
//! ```

pub mod admin;
pub mod health;
pub mod orders;

use std::time::Duration;

use axum::{
    Router,
    http::Method,
    routing::{delete, get},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::state::AppState;

/// Create the admin routes router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/cache", get(admin::cache_stats))
        .route("/cache/{order_uid}", delete(admin::evict))
}

/// Create all routes for the broker.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        // Orders (not nested so the trailing-slash form is routed too)
        .route("/v1/orders/", get(orders::blank))
        .route("/v1/orders/{order_uid}", get(orders::show))
        .nest("/v1/admin", admin_routes())
}

/// Build the full application: routes, request tracing, and CORS.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .max_age(Duration::from_secs(300));

    routes()
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}
