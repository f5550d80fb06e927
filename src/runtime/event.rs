use std::fmt;

use serde::Serialize;
use uuid::Uuid;

// ─── Well-known event ids ────────────────────────────────────────

/// Request lifecycle: an HTTP transaction started.
pub const EVENT_REQUEST_START: u16 = 3;
/// Request lifecycle: an HTTP transaction finished.
pub const EVENT_REQUEST_STOP: u16 = 4;
/// Allocation stream: another quantum of memory was allocated.
pub const EVENT_ALLOCATION_TICK: u16 = 10;

// ─── Streams ─────────────────────────────────────────────────────

/// The event streams a listener can enable on an [`EventHub`](super::EventHub).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Request start/stop notifications from the HTTP server.
    RequestLifecycle,
    /// Coarse allocation ticks from the allocator.
    Allocation,
}

impl Stream {
    pub(crate) const fn bit(self) -> u8 {
        match self {
            Self::RequestLifecycle => 0b01,
            Self::Allocation => 0b10,
        }
    }
}

// ─── Correlation id ──────────────────────────────────────────────

/// Opaque token shared by every event belonging to one HTTP transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

// ─── Raw events ──────────────────────────────────────────────────

/// A single payload field. Borrowed so that emitting never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadValue<'a> {
    Str(&'a str),
    U64(u64),
}

/// An event exactly as the source wrote it: stream, numeric id and an
/// untyped, positional payload. Listeners decode it themselves.
#[derive(Debug, Clone, Copy)]
pub struct RawEvent<'a> {
    pub stream: Stream,
    pub event_id: u16,
    pub correlation_id: CorrelationId,
    pub payload: &'a [PayloadValue<'a>],
}

impl<'a> RawEvent<'a> {
    pub fn field(&self, index: usize) -> Option<PayloadValue<'a>> {
        self.payload.get(index).copied()
    }
}
