use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::metrics::stream;
use crate::middleware::request_events;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    let hub = state.hub;

    Router::new()
        // ── Demo endpoints ──────────────────────────────────────
        .route("/api/test/alloc", get(handlers::demo::alloc))
        .route(
            "/api/test/alloc-multi-namespace",
            get(handlers::demo::alloc_multi_namespace),
        )
        // ── Allocation stats ────────────────────────────────────
        .route("/api/alloc/stats", get(stream::get_stats))
        .route("/api/alloc/stream", get(stream::stats_stream))
        .route("/api/alloc/status", get(stream::tracer_status))
        .route("/api/alloc/reset", post(stream::reset_stats))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn_with_state(hub, request_events))
        .layer(CorsLayer::permissive())
}
