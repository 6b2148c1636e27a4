//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::health::{health, ready};
use crate::handlers::status::get_status;
use crate::handlers::videos::{
    get_video, list_all_videos, list_user_videos, request_upload, update_views,
};
use crate::handlers::webhooks::{storage_event, transcoder_event};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    // Webhook receivers. No rate limiting: throttling a storage or
    // transcoder notification only triggers the sender's redelivery loop.
    let webhook_routes = Router::new()
        .route("/videos/s3-trigger", post(storage_event))
        .route("/videos/ecs-trigger", post(transcoder_event));

    let video_routes = Router::new()
        // Upload admission
        .route("/videos/upload", post(request_upload))
        // Listings (static segments before the :video_id matcher)
        .route("/videos/all", get(list_all_videos))
        .route("/videos", get(list_user_videos))
        // Single-record operations
        .route("/videos/:video_id", get(get_video))
        .route("/videos/:video_id/status", get(get_status))
        .route("/videos/:video_id/views", post(update_views));

    let rate_limiter = std::sync::Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .merge(video_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .merge(webhook_routes);

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
