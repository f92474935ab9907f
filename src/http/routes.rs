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
        // Call state
        .route("/call", get(handlers::get_call))
        .route("/call/transcript", get(handlers::get_transcript))
        // Call control
        .route("/call/open", post(handlers::open_call))
        .route("/call/end", post(handlers::end_call))
        .route("/call/mute", post(handlers::toggle_mute))
        .route("/call/text", post(handlers::send_text))
        // The call surface is usually served from another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
