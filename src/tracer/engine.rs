use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{trace, warn};

use super::bus::SummaryBus;
use super::event::TraceEvent;
use super::panic_message;
use super::pool::{record_pool, RecordPool};
use super::record::{AllocationRecord, Request};
use crate::config::TracerOptions;
use crate::runtime::{CorrelationId, EventListener, RawEvent};

/// Joins request lifecycle events and allocation ticks on their correlation
/// id.
///
/// Every entry point may be called from any thread at any time. Per id,
/// start → ticks → stop is assumed; across ids nothing is.
///
/// Known limitation: a request whose stop event never arrives keeps its
/// table entry and record for the life of the process.
pub struct CorrelationEngine {
    requests: DashMap<CorrelationId, Box<AllocationRecord>>,
    pool: RecordPool,
    options: TracerOptions,
    bus: Arc<SummaryBus>,
}

impl CorrelationEngine {
    pub fn new(options: TracerOptions, bus: Arc<SummaryBus>) -> Self {
        Self {
            requests: DashMap::new(),
            pool: record_pool(options.max_pool_size),
            options,
            bus,
        }
    }

    /// Decode and apply one raw event. Nothing escapes: decode failures and
    /// panics are logged against the event's correlation id.
    pub fn handle(&self, event: &RawEvent<'_>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            TraceEvent::decode(event).map(|decoded| {
                if let Some(decoded) = decoded {
                    self.dispatch(decoded);
                }
            })
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(
                correlation_id = %event.correlation_id,
                stream = ?event.stream,
                event_id = event.event_id,
                %error,
                "failed to classify a runtime event"
            ),
            Err(payload) => {
                let panic = panic_message(payload.as_ref());
                match self.identity_of(event) {
                    Some(request) => warn!(
                        correlation_id = %event.correlation_id,
                        request_id = %request.request_id,
                        verb = %request.verb,
                        path = %request.path,
                        panic,
                        "failed to tie a runtime event to an HTTP request"
                    ),
                    None => warn!(
                        correlation_id = %event.correlation_id,
                        panic,
                        "failed to tie a runtime event to an HTTP request"
                    ),
                }
            }
        }
    }

    fn dispatch(&self, event: TraceEvent<'_>) {
        match event {
            TraceEvent::RequestStart {
                id,
                request_id,
                verb,
                path,
            } => self.on_request_start(id, Request::new(request_id, verb, path)),
            TraceEvent::AllocationTick {
                id,
                type_name,
                bytes,
            } => self.on_allocation_tick(id, type_name, bytes),
            TraceEvent::RequestStop { id } => {
                self.on_request_stop(id);
            }
        }
    }

    /// Best-effort request identity for diagnostics.
    fn identity_of(&self, event: &RawEvent<'_>) -> Option<Request> {
        if let Ok(Some(TraceEvent::RequestStart {
            request_id,
            verb,
            path,
            ..
        })) = TraceEvent::decode(event)
        {
            return Some(Request::new(request_id, verb, path));
        }
        self.requests
            .get(&event.correlation_id)
            .and_then(|record| record.request().cloned())
    }

    // ── Operations ──────────────────────────────────────────────

    /// Begin tracing `request` under `id`, unless admission rejects it.
    pub fn on_request_start(&self, id: CorrelationId, request: Request) {
        if !self.options.admits(&request) {
            trace!(correlation_id = %id, path = %request.path, "request not admitted for tracing");
            return;
        }

        let mut record = self.pool.acquire();
        record.begin(request, Utc::now());

        if let Some(superseded) = self.requests.insert(id, record) {
            warn!(
                correlation_id = %id,
                superseded_request_id = superseded.request().map(|r| r.request_id.as_str()),
                "request start seen twice for one correlation id; earlier record discarded"
            );
            self.pool.release(superseded);
        }
    }

    /// Attribute `bytes` of `type_name` to the request traced under `id`.
    /// Unknown ids are ignored.
    pub fn on_allocation_tick(&self, id: CorrelationId, type_name: &str, bytes: u64) {
        // The shard read guard is held while adding, so a concurrent stop
        // cannot take the record away mid-update.
        if let Some(record) = self.requests.get(&id) {
            record.add(type_name, bytes);
        }
    }

    /// Finalize the request traced under `id` and publish its summary.
    /// Returns `false` if nothing was being traced under `id`.
    pub fn on_request_stop(&self, id: CorrelationId) -> bool {
        let Some((_, record)) = self.requests.remove(&id) else {
            return false;
        };

        // Back to the pool however publication ends.
        let mut record = self.pool.release_on_drop(record);
        record.finish(Utc::now());
        match record.summary() {
            Some(summary) => {
                self.bus.publish(&summary);
            }
            None => warn!(correlation_id = %id, "traced record finished without a request"),
        }
        true
    }

    /// Requests currently being traced.
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    /// Idle records waiting in the pool.
    pub fn pooled(&self) -> usize {
        self.pool.pooled()
    }
}

impl EventListener for CorrelationEngine {
    fn on_event(&self, event: &RawEvent<'_>) {
        self.handle(event);
    }
}

impl std::fmt::Debug for CorrelationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationEngine")
            .field("in_flight", &self.in_flight())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::{PayloadValue, Stream, EVENT_REQUEST_START};
    use crate::tracer::bus::{ObserverError, SummaryObserver};
    use crate::tracer::summary::{RequestSummary, TracedRequest};

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<TracedRequest>>,
    }

    impl SummaryObserver for Collect {
        fn on_summary(&self, summary: &RequestSummary<'_>) -> Result<(), ObserverError> {
            self.seen.lock().push(summary.to_traced_request());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Exploding {
        calls: AtomicUsize,
    }

    impl SummaryObserver for Exploding {
        fn on_summary(&self, _: &RequestSummary<'_>) -> Result<(), ObserverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("reporting consumer failed");
        }
    }

    fn engine_with(options: TracerOptions) -> (CorrelationEngine, Arc<Collect>) {
        let bus = SummaryBus::new();
        let collect = Arc::new(Collect::default());
        std::mem::forget(bus.subscribe(collect.clone()));
        (CorrelationEngine::new(options, bus), collect)
    }

    fn start(engine: &CorrelationEngine, id: CorrelationId, path: &str) {
        engine.on_request_start(id, Request::new(id.to_string(), "GET", path));
    }

    #[test]
    fn full_lifecycle_publishes_once() {
        let (engine, collect) = engine_with(TracerOptions::default());
        let id = CorrelationId::new();

        start(&engine, id, "/api/test");
        engine.on_allocation_tick(id, "System.Byte[]", 100_000);
        engine.on_allocation_tick(id, "System.Char[]", 40_000);
        engine.on_allocation_tick(id, "System.Byte[]", 100_000);
        assert_eq!(engine.in_flight(), 1);

        assert!(engine.on_request_stop(id));
        assert!(!engine.on_request_stop(id));

        let seen = collect.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].request.path, "/api/test");
        assert_eq!(seen[0].allocated_bytes, 240_000);
        assert_eq!(seen[0].allocations["System.Byte[]"], 200_000);
        assert_eq!(seen[0].allocations["System.Char[]"], 40_000);
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(engine.pooled(), 1);
    }

    #[test]
    fn orphaned_ticks_are_dropped() {
        let (engine, collect) = engine_with(TracerOptions::default());
        let id = CorrelationId::new();

        engine.on_allocation_tick(id, "ns.T", 1_000_000);
        assert_eq!(engine.in_flight(), 0);
        assert!(!engine.on_request_stop(id));

        // Stale tick after the request finished.
        start(&engine, id, "/");
        engine.on_request_stop(id);
        engine.on_allocation_tick(id, "ns.T", 1_000_000);
        assert_eq!(engine.in_flight(), 0);

        let seen = collect.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].allocated_bytes, 0);
    }

    #[test]
    fn rejected_requests_are_never_published() {
        let options = TracerOptions::default().with_admission(|r| r.path != "/ignored");
        let (engine, collect) = engine_with(options);
        let id = CorrelationId::new();

        start(&engine, id, "/ignored");
        engine.on_allocation_tick(id, "ns.T", 50_000_000);
        engine.on_request_stop(id);

        assert!(collect.seen.lock().is_empty());
        assert_eq!(engine.pooled(), 0);
    }

    #[test]
    fn duplicate_start_supersedes_and_recycles() {
        let (engine, collect) = engine_with(TracerOptions::default());
        let id = CorrelationId::new();

        engine.on_request_start(id, Request::new("first", "GET", "/a"));
        engine.on_allocation_tick(id, "ns.T", 10);
        engine.on_request_start(id, Request::new("second", "GET", "/b"));
        assert_eq!(engine.in_flight(), 1);
        assert_eq!(engine.pooled(), 1);

        engine.on_request_stop(id);
        let seen = collect.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].request.request_id, "second");
        assert_eq!(seen[0].allocated_bytes, 0);
    }

    #[test]
    fn record_is_recycled_even_if_an_observer_panics() {
        let bus = SummaryBus::new();
        let exploding = Arc::new(Exploding::default());
        let _handle = bus.subscribe(exploding.clone());
        let engine = CorrelationEngine::new(TracerOptions::default(), bus);
        let id = CorrelationId::new();

        start(&engine, id, "/");
        engine.on_allocation_tick(id, "ns.T", 1);
        assert!(engine.on_request_stop(id));

        assert_eq!(exploding.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(engine.pooled(), 1);
    }

    #[test]
    fn concurrent_ticks_sum_exactly() {
        let (engine, collect) = engine_with(TracerOptions::default());
        let engine = Arc::new(engine);
        let id = CorrelationId::new();
        start(&engine, id, "/busy");

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..2_000u64 {
                        let name = if i % 3 == 0 { "a.X" } else { "b.Y" };
                        engine.on_allocation_tick(id, name, t + i % 7);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        engine.on_request_stop(id);

        let expected: u64 = (0..8u64)
            .flat_map(|t| (0..2_000u64).map(move |i| t + i % 7))
            .sum();
        let seen = collect.seen.lock();
        assert_eq!(seen[0].allocated_bytes, expected);
        assert_eq!(seen[0].allocations.values().sum::<u64>(), expected);
    }

    #[test]
    fn malformed_events_are_contained() {
        let (engine, collect) = engine_with(TracerOptions::default());
        let event = RawEvent {
            stream: Stream::RequestLifecycle,
            event_id: EVENT_REQUEST_START,
            correlation_id: CorrelationId::new(),
            payload: &[PayloadValue::U64(1)],
        };
        engine.handle(&event);
        assert_eq!(engine.in_flight(), 0);
        assert!(collect.seen.lock().is_empty());
    }

    #[test]
    fn panicking_admission_is_contained() {
        let options = TracerOptions::default().with_admission(|_| panic!("bad predicate"));
        let (engine, _collect) = engine_with(options);
        let id = CorrelationId::new();
        let payload = [
            PayloadValue::Str("r"),
            PayloadValue::Str("GET"),
            PayloadValue::Str("/"),
        ];
        engine.handle(&RawEvent {
            stream: Stream::RequestLifecycle,
            event_id: EVENT_REQUEST_START,
            correlation_id: id,
            payload: &payload,
        });
        assert_eq!(engine.in_flight(), 0);
    }
}
