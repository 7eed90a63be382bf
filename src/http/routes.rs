use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session state
        .route("/session", get(handlers::get_session))
        .route("/session/reset", post(handlers::reset_session))
        // Clip capture
        .route(
            "/session/clips/:digit/:variant/record",
            post(handlers::start_clip),
        )
        .route(
            "/session/clips/:digit/:variant/stop",
            post(handlers::stop_clip),
        )
        .route(
            "/session/clips/:digit/:variant/preview",
            get(handlers::preview_clip),
        )
        // Submission
        .route("/session/submit", post(handlers::submit_session))
        // The collection UI is served from another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
