//! Route definitions for the API server

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

/// Creates the main application router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    // Browser dashboards poll from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Replay control surface
        .route("/api/simulation/status", get(handlers::simulation_status))
        .route("/api/simulation/control", post(handlers::simulation_control))
        .route("/api/simulation/debug", get(handlers::simulation_debug))
        // Upstream proxy and live feed
        .route("/api/scoreboard", get(handlers::get_scoreboard))
        .route("/api/scoreboard/stream", get(handlers::scoreboard_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
