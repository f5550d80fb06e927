//! Stop events from the middleware when a handler never finishes normally.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::{middleware as axum_mw, routing::get, Router};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use request_alloc_tracer::middleware::{request_events, REQUEST_ID_HEADER};
use request_alloc_tracer::tracer::{
    ObserverError, ObserverHandle, RequestSummary, SummaryObserver, TracedRequest,
};
use request_alloc_tracer::{AllocTracerService, EventHub, TracerOptions};
use tower::ServiceExt;

#[derive(Default)]
struct Summaries(Mutex<Vec<TracedRequest>>);

impl SummaryObserver for Summaries {
    fn on_summary(&self, summary: &RequestSummary<'_>) -> Result<(), ObserverError> {
        self.0.lock().push(summary.to_traced_request());
        Ok(())
    }
}

async fn explode() -> &'static str {
    panic!("handler bug")
}

struct Traced {
    app: Router,
    tracer: AllocTracerService,
    summaries: Arc<Summaries>,
    _observer: ObserverHandle,
}

/// Private hub, so no global allocator is needed.
fn traced_app() -> Traced {
    let hub: &'static EventHub = Box::leak(Box::new(EventHub::new()));
    let tracer = AllocTracerService::new(hub, TracerOptions::default());
    tracer.start().unwrap();
    let summaries = Arc::new(Summaries::default());
    let observer = tracer.bus().subscribe(summaries.clone());

    let app = Router::new()
        .route("/hang", get(|| std::future::pending::<()>()))
        .route("/explode", get(explode))
        .layer(axum_mw::from_fn_with_state(hub, request_events));
    Traced {
        app,
        tracer,
        summaries,
        _observer: observer,
    }
}

fn request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(REQUEST_ID_HEADER, "cancel-me")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn cancelled_request_still_stops() {
    let Traced {
        app,
        tracer,
        summaries,
        _observer,
    } = traced_app();

    let outcome =
        tokio::time::timeout(Duration::from_millis(20), app.oneshot(request("/hang"))).await;
    assert!(outcome.is_err(), "handler should still be pending");

    assert_eq!(tracer.in_flight(), 0);
    let traced = summaries.0.lock();
    assert_eq!(traced.len(), 1);
    assert_eq!(traced[0].request.path, "/hang");
    assert_eq!(traced[0].request.request_id, "cancel-me");
}

#[tokio::test]
async fn panicking_handler_still_stops() {
    let Traced {
        app,
        tracer,
        summaries,
        _observer,
    } = traced_app();

    let joined = tokio::spawn(app.oneshot(request("/explode"))).await;
    assert!(joined.unwrap_err().is_panic());

    assert_eq!(tracer.in_flight(), 0);
    let traced = summaries.0.lock();
    assert_eq!(traced.len(), 1);
    assert_eq!(traced[0].request.path, "/explode");
}
