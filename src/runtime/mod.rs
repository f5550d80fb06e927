//! In-process runtime event source.
//!
//! Two streams flow through an [`EventHub`]: request lifecycle events raised
//! by the HTTP middleware and allocation ticks raised by the
//! [`TickingAllocator`]. Listeners enable the streams they care about and
//! receive [`RawEvent`]s inline on the producing thread.

mod alloc_ticks;
pub mod correlation;
mod event;
mod hub;

pub use alloc_ticks::{label_allocations, AllocationLabel, TickingAllocator, TICK_BYTES};
pub use event::{
    CorrelationId, PayloadValue, RawEvent, Stream, EVENT_ALLOCATION_TICK, EVENT_REQUEST_START,
    EVENT_REQUEST_STOP,
};
pub use hub::{EventHub, EventListener, Subscription};
