//! Correlation and aggregation engine.
//!
//! Raw runtime events are decoded into [`TraceEvent`]s, joined on their
//! correlation id into pooled [`AllocationRecord`]s, and each finished record
//! is published once as a [`RequestSummary`] on the [`SummaryBus`].
//! [`AllocTracerService`] wires all of it to an [`EventHub`](crate::runtime::EventHub).

use std::any::Any;

mod bus;
mod engine;
mod event;
mod pool;
mod record;
mod service;
mod summary;

pub use bus::{ObserverError, ObserverHandle, SummaryBus, SummaryObserver};
pub use engine::CorrelationEngine;
pub use event::{DecodeError, TraceEvent};
pub use pool::{record_pool, ObjectPool, Pooled, RecordPool};
pub use record::{AllocationRecord, Request};
pub use service::{AllocTracerService, ServiceError};
pub use summary::{
    namespace_of, rank_namespaces, rank_types, RankedBytes, RequestSummary, TracedRequest,
    UNKNOWN_NAMESPACE,
};

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
