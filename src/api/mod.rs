//! API layer - HTTP handlers and routing
//!
//! This module contains the HTTP API endpoints for schoolhub:
//! - Attendance code endpoints (tenant scoped)
//! - Health check

pub mod attendance;
pub mod middleware;

use axum::{
    http::{header, header::InvalidHeaderValue, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppState, SchoolContext};

/// Build the main API router
pub fn build_api_router() -> Router<AppState> {
    // Tenant scoped routes
    let attendance_routes = Router::new()
        .nest("/attendance", attendance::router())
        .route_layer(axum_middleware::from_fn(middleware::require_school));

    Router::new()
        .route("/health", get(health))
        .merge(attendance_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Result<Router, InvalidHeaderValue> {
    let cors = CorsLayer::new()
        .allow_origin(cors_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(middleware::SCHOOL_ID_HEADER),
        ]);

    Ok(Router::new()
        .nest("/api/v1", build_api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// GET /api/v1/health - Liveness check
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
