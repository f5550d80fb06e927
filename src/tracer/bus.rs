use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use super::panic_message;
use super::summary::RequestSummary;

// ─── Observer contract ───────────────────────────────────────────

#[derive(Debug, Error)]
#[error("summary observer failed: {source}")]
pub struct ObserverError {
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl ObserverError {
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Receives one [`RequestSummary`] per completed, traced request.
///
/// Called synchronously on the thread that observed the request stop.
/// The summary must be copied if it is needed after the call returns.
/// Implementations must not subscribe or unsubscribe observers from inside
/// `on_summary`.
pub trait SummaryObserver: Send + Sync {
    fn on_summary(&self, summary: &RequestSummary<'_>) -> Result<(), ObserverError>;

    /// The bus was closed; no further summaries will arrive.
    fn on_completed(&self) {}
}

// ─── SummaryBus ──────────────────────────────────────────────────

/// Publish/subscribe channel for request summaries.
///
/// Open from construction until [`close`](Self::close), which completes
/// every observer. Each observer is isolated: an error or panic in one is
/// logged and the rest still receive the summary.
pub struct SummaryBus {
    observers: RwLock<Vec<(u64, Arc<dyn SummaryObserver>)>>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl SummaryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            observers: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register `observer`. Dropping the returned handle unsubscribes it.
    /// On a closed bus the observer is completed immediately.
    pub fn subscribe(self: &Arc<Self>, observer: Arc<dyn SummaryObserver>) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut observers = self.observers.write();
            if !self.closed.load(Ordering::Acquire) {
                observers.push((id, observer));
                return ObserverHandle {
                    bus: Arc::downgrade(self),
                    id,
                };
            }
        }
        complete(observer.as_ref());
        ObserverHandle {
            bus: Weak::new(),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.observers.write().retain(|(oid, _)| *oid != id);
    }

    /// Deliver `summary` to every observer, in subscription order.
    /// Returns how many observers handled it without failing.
    pub fn publish(&self, summary: &RequestSummary<'_>) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        let observers = self.observers.read();
        let mut delivered = 0;
        for (_, observer) in observers.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_summary(summary)));
            let request = summary.request();
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(error)) => warn!(
                    request_id = %request.request_id,
                    verb = %request.verb,
                    path = %request.path,
                    %error,
                    "failed to notify an observer of a traced request"
                ),
                Err(payload) => warn!(
                    request_id = %request.request_id,
                    verb = %request.verb,
                    path = %request.path,
                    panic = panic_message(payload.as_ref()),
                    "observer panicked while handling a traced request"
                ),
            }
        }
        delivered
    }

    /// Stop publishing and complete every observer. Idempotent.
    pub fn close(&self) {
        let drained = {
            let mut observers = self.observers.write();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *observers)
        };
        for (_, observer) in drained {
            complete(observer.as_ref());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

fn complete(observer: &dyn SummaryObserver) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| observer.on_completed())) {
        warn!(
            panic = panic_message(payload.as_ref()),
            "observer panicked while completing"
        );
    }
}

impl fmt::Debug for SummaryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryBus")
            .field("observers", &self.observer_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Keeps an observer subscribed; unsubscribes on drop.
#[derive(Debug)]
pub struct ObserverHandle {
    bus: Weak<SummaryBus>,
    id: u64,
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;

    use super::*;
    use crate::tracer::record::{AllocationRecord, Request};

    #[derive(Default)]
    struct Counting {
        summaries: AtomicUsize,
        completed: AtomicBool,
    }

    impl SummaryObserver for Counting {
        fn on_summary(&self, _: &RequestSummary<'_>) -> Result<(), ObserverError> {
            self.summaries.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_completed(&self) {
            self.completed.store(true, Ordering::SeqCst);
        }
    }

    struct Failing;

    impl SummaryObserver for Failing {
        fn on_summary(&self, _: &RequestSummary<'_>) -> Result<(), ObserverError> {
            Err(ObserverError::new("nope"))
        }
    }

    struct Panicking;

    impl SummaryObserver for Panicking {
        fn on_summary(&self, _: &RequestSummary<'_>) -> Result<(), ObserverError> {
            panic!("observer bug")
        }
    }

    fn finished_record() -> AllocationRecord {
        let mut record = AllocationRecord::blank();
        record.begin(Request::new("req", "GET", "/x"), Utc::now());
        record.add("ns.T", 10);
        record.finish(Utc::now());
        record
    }

    #[test]
    fn failing_observers_do_not_starve_others() {
        let bus = SummaryBus::new();
        let counting = Arc::new(Counting::default());
        let _a = bus.subscribe(Arc::new(Failing));
        let _b = bus.subscribe(Arc::new(Panicking));
        let _c = bus.subscribe(counting.clone());

        let mut record = finished_record();
        let delivered = bus.publish(&record.summary().unwrap());

        assert_eq!(delivered, 1);
        assert_eq!(counting.summaries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let bus = SummaryBus::new();
        let counting = Arc::new(Counting::default());
        let handle = bus.subscribe(counting.clone());
        drop(handle);

        let mut record = finished_record();
        assert_eq!(bus.publish(&record.summary().unwrap()), 0);
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn close_completes_observers_and_stops_publishing() {
        let bus = SummaryBus::new();
        let counting = Arc::new(Counting::default());
        let _handle = bus.subscribe(counting.clone());

        bus.close();
        bus.close();
        assert!(counting.completed.load(Ordering::SeqCst));

        let mut record = finished_record();
        assert_eq!(bus.publish(&record.summary().unwrap()), 0);
        assert_eq!(counting.summaries.load(Ordering::SeqCst), 0);

        let late = Arc::new(Counting::default());
        let _late = bus.subscribe(late.clone());
        assert!(late.completed.load(Ordering::SeqCst));
    }
}
