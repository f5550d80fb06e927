use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use super::collector::StatsSnapshot;
use crate::AppState;

// ─── GET /api/alloc/stats ────────────────────────────────────────
/// Returns a single JSON snapshot, handy for curl.

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

// ─── POST /api/alloc/reset ───────────────────────────────────────

pub async fn reset_stats(State(state): State<Arc<AppState>>) -> StatusCode {
    state.stats.reset();
    StatusCode::NO_CONTENT
}

// ─── GET /api/alloc/status ───────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct TracerStatus {
    pub running: bool,
    pub in_flight: usize,
    pub observers: usize,
}

pub async fn tracer_status(State(state): State<Arc<AppState>>) -> Json<TracerStatus> {
    Json(TracerStatus {
        running: state.tracer.is_running(),
        in_flight: state.tracer.in_flight(),
        observers: state.tracer.bus().observer_count(),
    })
}

// ─── GET /api/alloc/stream ───────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes a full `StatsSnapshot` as JSON every 500 ms.

pub async fn stats_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));

    let stream = IntervalStream::new(interval).map(move |_| {
        let snapshot = state.stats.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok(Event::default().event("stats").data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
