//! Drives the demo router in-process with the ticking allocator installed.
//!
//! Everything lives in one test: the allocator reports to the process-wide
//! hub, so concurrent tests in this binary would see each other's requests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use parking_lot::Mutex;
use request_alloc_tracer::metrics::AllocationStats;
use request_alloc_tracer::tracer::{ObserverError, RequestSummary, SummaryObserver, TracedRequest};
use request_alloc_tracer::{server, AllocTracerService, AppState, EventHub, TickingAllocator, TracerOptions};
use tower::ServiceExt;

#[global_allocator]
static GLOBAL: TickingAllocator = TickingAllocator::system();

#[derive(Default)]
struct Summaries(Mutex<Vec<TracedRequest>>);

impl SummaryObserver for Summaries {
    fn on_summary(&self, summary: &RequestSummary<'_>) -> Result<(), ObserverError> {
        self.0.lock().push(summary.to_traced_request());
        Ok(())
    }
}

impl Summaries {
    fn take(&self) -> Vec<TracedRequest> {
        std::mem::take(&mut *self.0.lock())
    }
}

async fn get(app: &axum::Router, uri: &str, request_id: Option<&str>) -> axum::response::Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(id) = request_id {
        builder = builder.header("x-request-id", id);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn traces_allocations_per_http_request() {
    let hub = EventHub::global();
    let mut options = TracerOptions::default();
    options.ignored_path_prefixes.push("/api/alloc/".into());

    let tracer = Arc::new(AllocTracerService::new(hub, options));
    tracer.start().unwrap();
    let summaries = Arc::new(Summaries::default());
    let _summaries_handle = tracer.bus().subscribe(summaries.clone());
    let stats = Arc::new(AllocationStats::new());
    let _stats_handle = tracer.bus().subscribe(stats.clone());

    let app = server::create_router(Arc::new(AppState {
        hub,
        tracer: Arc::clone(&tracer),
        stats: Arc::clone(&stats),
    }));

    // ── Big buffer plus char buffers, query string stripped ─────
    let response = get(&app, "/api/test/alloc?a=1&b=2s", Some("it-1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "it-1");
    assert!(response.headers().contains_key("X-Response-Time-Us"));
    assert!(response.headers().contains_key("Server-Timing"));

    let traced = summaries.take();
    assert_eq!(traced.len(), 1);
    let req = &traced[0];
    assert_eq!(req.request.path, "/api/test/alloc");
    assert_eq!(req.request.verb, "GET");
    assert_eq!(req.request.request_id, "it-1");
    assert!(req.allocated_bytes > 14_000_000, "{}", req.allocated_bytes);
    assert!(req.allocations["demo.Bytes"] >= 10_000_000);
    assert!(req.allocations["demo.Chars"] >= 2_000_000);
    assert!(req.finished_at > req.started_at);

    // ── Many types across namespaces ────────────────────────────
    let response = get(&app, "/api/test/alloc-multi-namespace", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let generated_id = response.headers()["x-request-id"].to_str().unwrap().to_owned();

    let traced = summaries.take();
    assert_eq!(traced.len(), 1);
    let req = &traced[0];
    assert_eq!(req.request.request_id, generated_id);
    assert!(req.allocated_bytes > 10_000_000);
    assert!(req.allocations.len() >= 50, "{:?}", req.allocations.keys());

    // ── Validation errors are still traced ──────────────────────
    let response = get(&app, "/api/test/alloc?mb=0", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(summaries.take().len(), 1);

    // ── Ignored prefix is never traced ──────────────────────────
    let response = get(&app, "/api/alloc/stats", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(summaries.take().is_empty());
    assert_eq!(stats.snapshot().total_requests, 3);
    assert_eq!(tracer.in_flight(), 0);

    tracer.stop();
}
