//! Axum router configuration with middleware.
//!
//! All routes are under `/v1/`, plus an unauthenticated `/health`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Events
        .route(
            "/event",
            post(handlers::event::post_event).get(handlers::event::list_events),
        )
        // Sequence control
        .route(
            "/sequence/{project}/{keptn_context}/control",
            post(handlers::sequence::control_sequence),
        )
        .route("/sequence/timeout", post(handlers::sequence::timeout_sequence))
        // Queries
        .route(
            "/sequence-execution",
            get(handlers::sequence::list_sequence_executions),
        )
        .route(
            "/sequence-state/{project}",
            get(handlers::state::get_sequence_states),
        )
        // Dispatcher
        .route("/dispatcher", get(handlers::dispatcher::get_status))
        .route("/dispatcher/pause", post(handlers::dispatcher::pause))
        .route("/dispatcher/resume", post(handlers::dispatcher::resume))
        .route("/dispatcher/mode", put(handlers::dispatcher::set_mode))
        // Projects
        .route("/project/{project}", delete(handlers::project::delete_project));

    Router::new()
        .nest("/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
