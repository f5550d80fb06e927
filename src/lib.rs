//! Per-request allocation tracing for HTTP services.
//!
//! Allocation ticks from a [`runtime::TickingAllocator`] and request
//! start/stop events from the `request_events` middleware meet in
//! the [`tracer::CorrelationEngine`]. Each finished request is published as
//! a [`tracer::RequestSummary`] and, by default, logged as an
//! [`report::AllocationReport`].

use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod report;
pub mod runtime;
pub mod server;
pub mod tracer;

pub use config::{Admission, ConfigError, ReporterOptions, TracerOptions};
pub use runtime::{CorrelationId, EventHub, TickingAllocator};
pub use tracer::{AllocTracerService, RequestSummary, SummaryObserver, TracedRequest};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Hub the middleware raises request events on.
    pub hub: &'static EventHub,

    /// The running tracer; owns the summary bus.
    pub tracer: Arc<AllocTracerService>,

    /// Aggregates every published summary for the stats endpoints.
    pub stats: Arc<metrics::AllocationStats>,
}
