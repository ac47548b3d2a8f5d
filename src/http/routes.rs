use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Admission
        .route("/streams", post(handlers::start_stream))
        .route("/streams/stats", get(handlers::get_stats))
        .route(
            "/streams/queue/:ticket_id",
            get(handlers::get_queue_status).delete(handlers::withdraw_ticket),
        )
        // Streaming control
        .route(
            "/streams/:session_id/chunks/:sequence",
            post(handlers::add_chunk),
        )
        .route("/streams/:session_id/context", put(handlers::update_context))
        .route("/streams/:session_id/pause", post(handlers::pause_stream))
        .route("/streams/:session_id/resume", post(handlers::resume_stream))
        .route("/streams/:session_id/stop", post(handlers::stop_stream))
        .route("/streams/:session_id/cancel", post(handlers::cancel_stream))
        .route("/streams/:session_id/retry", post(handlers::retry_stream))
        .route(
            "/streams/:session_id/reconnect",
            post(handlers::reconnect_stream),
        )
        // Session queries
        .route(
            "/streams/:session_id/status",
            get(handlers::get_stream_status),
        )
        .route(
            "/streams/:session_id/transcript",
            get(handlers::get_stream_transcript),
        )
        .route("/streams/:session_id/events", get(handlers::stream_events))
        .route(
            "/streams/:session_id",
            axum::routing::delete(handlers::close_stream),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
