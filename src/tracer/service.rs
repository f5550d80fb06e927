use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use super::bus::{ObserverHandle, SummaryBus, SummaryObserver};
use super::engine::CorrelationEngine;
use crate::config::TracerOptions;
use crate::report::{AllocReporter, ReportSink, TracingSink};
use crate::runtime::{EventHub, EventListener, Stream, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("allocation tracer is already running")]
    AlreadyRunning,
    #[error("allocation tracer was stopped and cannot be restarted")]
    Closed,
}

/// Live wiring, present between `start` and `stop`.
struct Running {
    engine: Arc<CorrelationEngine>,
    _events: Subscription,
    _reporter: ObserverHandle,
}

/// Hosts the tracer: owns the summary bus, attaches the reporter to it and
/// the correlation engine to the event hub.
pub struct AllocTracerService {
    hub: &'static EventHub,
    options: TracerOptions,
    bus: Arc<SummaryBus>,
    reporter: Arc<dyn SummaryObserver>,
    running: Mutex<Option<Running>>,
}

impl AllocTracerService {
    /// Reports go to `tracing`.
    pub fn new(hub: &'static EventHub, options: TracerOptions) -> Self {
        Self::with_sink(hub, options, TracingSink)
    }

    pub fn with_sink<S: ReportSink + 'static>(
        hub: &'static EventHub,
        options: TracerOptions,
        sink: S,
    ) -> Self {
        let reporter = Arc::new(AllocReporter::new(options.reporter.clone(), sink));
        Self {
            hub,
            options,
            bus: SummaryBus::new(),
            reporter,
            running: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }
        if self.bus.is_closed() {
            return Err(ServiceError::Closed);
        }

        let reporter = self.bus.subscribe(Arc::clone(&self.reporter));
        let engine = Arc::new(CorrelationEngine::new(
            self.options.clone(),
            Arc::clone(&self.bus),
        ));
        let listener: Arc<dyn EventListener> = engine.clone();
        let events = self
            .hub
            .subscribe(&[Stream::RequestLifecycle, Stream::Allocation], listener);
        *running = Some(Running {
            engine,
            _events: events,
            _reporter: reporter,
        });

        info!(
            max_pool_size = self.options.max_pool_size,
            reporting = self.options.reporter.enabled,
            "allocation tracer started"
        );
        Ok(())
    }

    /// Detach from the hub, then close the bus. Idempotent.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let in_flight = running.engine.in_flight();
        // Hub subscription goes first so no event reaches a closed bus.
        drop(running);
        self.bus.close();
        info!(in_flight, "allocation tracer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Requests currently being traced; 0 when not running.
    pub fn in_flight(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map_or(0, |running| running.engine.in_flight())
    }

    /// Every published summary flows through here.
    pub fn bus(&self) -> &Arc<SummaryBus> {
        &self.bus
    }

    pub fn options(&self) -> &TracerOptions {
        &self.options
    }
}

impl Drop for AllocTracerService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for AllocTracerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocTracerService")
            .field("running", &self.is_running())
            .field("options", &self.options)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}
