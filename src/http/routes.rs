use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Largest accepted request body (uploaded audio included)
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        // Unified text / base64 audio / upload endpoint
        .route("/ai-agent/message", post(handlers::post_message))
        // Legacy text-only endpoint (query parameters)
        .route(
            "/ai-agent/ai-agent-message",
            post(handlers::post_legacy_message),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}
