//! API routes

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{dispatch, health, history, metrics, preview, schedules};

/// Create the API router
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let state = Arc::new(state);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Dispatch routes
    let dispatch_routes = Router::new()
        .route("/", post(dispatch::start_dispatch))
        .route("/:run_id", get(dispatch::get_dispatch))
        .route("/:run_id/cancel", post(dispatch::cancel_dispatch));

    // API v1 routes with authentication
    let api_v1 = Router::new()
        .nest("/dispatch", dispatch_routes)
        .route("/preview", post(preview::preview))
        .route("/history", get(history::list_history))
        .route("/schedules", post(schedules::create_schedule))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state.clone());

    // Prometheus scrape endpoint (no auth required)
    let metrics_routes = Router::new()
        .route("/", get(metrics::metrics))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .nest("/metrics", metrics_routes)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(origins)
}
