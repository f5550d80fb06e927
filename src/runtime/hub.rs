use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{const_rwlock, RwLock};
use tracing::warn;

use super::alloc_ticks::suppress_ticks;
use super::event::{
    CorrelationId, PayloadValue, RawEvent, Stream, EVENT_ALLOCATION_TICK, EVENT_REQUEST_START,
    EVENT_REQUEST_STOP,
};
use crate::tracer::panic_message;

/// Receives raw events for the streams it was subscribed to.
///
/// Called inline on whichever thread produced the event, so implementations
/// must not block. A panic is caught and logged by the hub.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &RawEvent<'_>);
}

struct Registration {
    id: u64,
    streams: u8,
    listener: Arc<dyn EventListener>,
}

/// Process-wide fan-out point between event sources (the HTTP middleware,
/// the ticking allocator) and listeners (the correlation engine).
///
/// Const-constructible so that the allocator can reach [`EventHub::global`]
/// without lazy initialization.
pub struct EventHub {
    listeners: RwLock<Vec<Registration>>,
    /// Union of every registration's stream bits; lets sources skip work
    /// without touching the lock.
    enabled: AtomicU8,
    next_id: AtomicU64,
}

static GLOBAL: EventHub = EventHub::new();

impl EventHub {
    pub const fn new() -> Self {
        Self {
            listeners: const_rwlock(Vec::new()),
            enabled: AtomicU8::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// The hub the ticking allocator emits into.
    pub fn global() -> &'static EventHub {
        &GLOBAL
    }

    /// Enable `streams` for `listener`. Events stop flowing to it once the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe(
        &'static self,
        streams: &[Stream],
        listener: Arc<dyn EventListener>,
    ) -> Subscription {
        let _quiet = suppress_ticks();
        let mask = streams.iter().fold(0u8, |mask, s| mask | s.bit());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut listeners = self.listeners.write();
        listeners.push(Registration {
            id,
            streams: mask,
            listener,
        });
        self.refresh_enabled(&listeners);

        Subscription { hub: self, id }
    }

    fn unsubscribe(&self, id: u64) {
        let _quiet = suppress_ticks();
        let mut listeners = self.listeners.write();
        listeners.retain(|r| r.id != id);
        self.refresh_enabled(&listeners);
    }

    fn refresh_enabled(&self, listeners: &[Registration]) {
        let mask = listeners.iter().fold(0u8, |mask, r| mask | r.streams);
        self.enabled.store(mask, Ordering::Release);
    }

    /// Does any listener currently want `stream`?
    pub fn is_enabled(&self, stream: Stream) -> bool {
        self.enabled.load(Ordering::Acquire) & stream.bit() != 0
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver `event` to every listener enabled for its stream.
    ///
    /// Allocation ticks raised by the listeners themselves are suppressed
    /// on this thread for the duration of the dispatch.
    pub fn emit(&self, event: &RawEvent<'_>) {
        if !self.is_enabled(event.stream) {
            return;
        }
        let _quiet = suppress_ticks();
        let listeners = self.listeners.read();
        dispatch(&listeners, event);
    }

    /// Like [`emit`](Self::emit) but gives up instead of waiting when the
    /// registry is being modified. Used from inside the allocator.
    pub(crate) fn try_emit(&self, event: &RawEvent<'_>) -> bool {
        if !self.is_enabled(event.stream) {
            return false;
        }
        let _quiet = suppress_ticks();
        match self.listeners.try_read() {
            Some(listeners) => {
                dispatch(&listeners, event);
                true
            }
            None => false,
        }
    }

    // ── Typed emitters ──────────────────────────────────────────

    pub fn request_start(&self, id: CorrelationId, request_id: &str, verb: &str, path: &str) {
        self.emit(&RawEvent {
            stream: Stream::RequestLifecycle,
            event_id: EVENT_REQUEST_START,
            correlation_id: id,
            payload: &[
                PayloadValue::Str(request_id),
                PayloadValue::Str(verb),
                PayloadValue::Str(path),
            ],
        });
    }

    pub fn request_stop(&self, id: CorrelationId) {
        self.emit(&RawEvent {
            stream: Stream::RequestLifecycle,
            event_id: EVENT_REQUEST_STOP,
            correlation_id: id,
            payload: &[],
        });
    }

    pub fn allocation_tick(&self, id: CorrelationId, bytes: u64, type_name: &str) {
        self.emit(&RawEvent {
            stream: Stream::Allocation,
            event_id: EVENT_ALLOCATION_TICK,
            correlation_id: id,
            payload: &[PayloadValue::U64(bytes), PayloadValue::Str(type_name)],
        });
    }
}

/// Each listener is isolated: a panic is logged and never unwinds into the
/// event source, which may be the global allocator.
fn dispatch(listeners: &[Registration], event: &RawEvent<'_>) {
    let bit = event.stream.bit();
    for registration in listeners.iter().filter(|r| r.streams & bit != 0) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            registration.listener.on_event(event);
        }));
        if let Err(payload) = outcome {
            warn!(
                correlation_id = %event.correlation_id,
                stream = ?event.stream,
                event_id = event.event_id,
                panic = panic_message(payload.as_ref()),
                "event listener panicked"
            );
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Keeps a listener registered on an [`EventHub`]; unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    hub: &'static EventHub,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
