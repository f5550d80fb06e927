use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::debug;

use crate::runtime::{correlation, CorrelationId, EventHub};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Raises request start/stop events on `hub` around every request and runs
/// the handler inside a correlation scope, so allocation ticks raised while
/// it runs carry the request's correlation id.
///
/// Adds three response headers:
///
///   x-request-id: echoed from the request, or the correlation id
///   X-Response-Time-Us: total handler wall time in microseconds
///   Server-Timing: same value in the standard Server-Timing format
pub async fn request_events(
    State(hub): State<&'static EventHub>,
    req: Request,
    next: Next,
) -> Response {
    let id = CorrelationId::new();
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| id.to_string(), str::to_owned);
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    hub.request_start(id, &request_id, method.as_str(), &path);
    // Stop is raised even if the handler panics or the client goes away.
    let _stop = StopOnDrop { hub, id };

    let start = Instant::now();
    let mut response = correlation::scope(id, next.run(req)).await;
    let elapsed = start.elapsed();
    let us = elapsed.as_micros();

    // ── Inject response headers ─────────────────────────────────
    if let Ok(val) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert("X-Response-Time-Us", val);
    }
    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    debug!(
        correlation_id = %id,
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_us = us as u64,
        "request finished"
    );

    response
}

struct StopOnDrop {
    hub: &'static EventHub,
    id: CorrelationId,
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.hub.request_stop(self.id);
    }
}
