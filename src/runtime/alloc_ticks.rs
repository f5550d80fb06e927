//! Allocation tick source.
//!
//! [`TickingAllocator`] wraps another [`GlobalAlloc`] and counts bytes per
//! thread. Every time a thread crosses [`TICK_BYTES`] it raises one
//! allocation tick on the hub, tagged with the current correlation id and
//! allocation label. Individual allocations are never reported.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

use super::correlation;
use super::event::{PayloadValue, RawEvent, Stream, EVENT_ALLOCATION_TICK};
use super::hub::EventHub;

/// Bytes a thread allocates between two ticks.
pub const TICK_BYTES: u64 = 100 * 1024;

const SMALL_LIMIT: usize = 1024;
const MEDIUM_LIMIT: usize = 64 * 1024;

thread_local! {
    static SUPPRESSED: Cell<bool> = const { Cell::new(false) };
    static SINCE_LAST_TICK: Cell<u64> = const { Cell::new(0) };
    static LABEL: Cell<Option<&'static str>> = const { Cell::new(None) };
}

// ─── Suppression ─────────────────────────────────────────────────

/// While alive, allocations on this thread raise no ticks. Held by the hub
/// during dispatch so tracer bookkeeping never reports itself.
pub(crate) struct SuppressGuard {
    previous: bool,
}

pub(crate) fn suppress_ticks() -> SuppressGuard {
    let previous = SUPPRESSED.try_with(|s| s.replace(true)).unwrap_or(true);
    SuppressGuard { previous }
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        let _ = SUPPRESSED.try_with(|s| s.set(self.previous));
    }
}

// ─── Labels ──────────────────────────────────────────────────────

/// Restores the previous allocation label when dropped.
#[derive(Debug)]
pub struct AllocationLabel {
    previous: Option<&'static str>,
}

/// Attribute ticks raised on this thread to `type_name` until the guard is
/// dropped. Labels are thread-scoped: do not hold the guard across an
/// `.await`.
pub fn label_allocations(type_name: &'static str) -> AllocationLabel {
    let previous = LABEL.try_with(|l| l.replace(Some(type_name))).unwrap_or(None);
    AllocationLabel { previous }
}

impl Drop for AllocationLabel {
    fn drop(&mut self) {
        let _ = LABEL.try_with(|l| l.set(self.previous));
    }
}

fn size_class(size: usize) -> &'static str {
    if size <= SMALL_LIMIT {
        "heap.Small"
    } else if size <= MEDIUM_LIMIT {
        "heap.Medium"
    } else {
        "heap.Large"
    }
}

// ─── Allocator ───────────────────────────────────────────────────

/// Global allocator wrapper raising allocation ticks.
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: TickingAllocator = TickingAllocator::system();
/// ```
#[derive(Debug)]
pub struct TickingAllocator<A = System> {
    inner: A,
    hub: Option<&'static EventHub>,
}

impl TickingAllocator<System> {
    pub const fn system() -> Self {
        Self::new(System)
    }
}

impl<A> TickingAllocator<A> {
    /// Ticks go to [`EventHub::global`].
    pub const fn new(inner: A) -> Self {
        Self { inner, hub: None }
    }

    pub const fn with_hub(inner: A, hub: &'static EventHub) -> Self {
        Self {
            inner,
            hub: Some(hub),
        }
    }

    fn hub(&self) -> &'static EventHub {
        self.hub.unwrap_or_else(EventHub::global)
    }

    fn account(&self, size: usize) {
        let hub = self.hub();
        if !hub.is_enabled(Stream::Allocation) {
            return;
        }
        let Ok(false) = SUPPRESSED.try_with(Cell::get) else {
            return;
        };

        let crossed = SINCE_LAST_TICK
            .try_with(|counter| {
                let total = counter.get().saturating_add(size as u64);
                if total >= TICK_BYTES {
                    counter.set(0);
                    Some(total)
                } else {
                    counter.set(total);
                    None
                }
            })
            .ok()
            .flatten();
        let Some(bytes) = crossed else {
            return;
        };

        // Ticks outside any request are useless to every listener.
        let Some(id) = correlation::current() else {
            return;
        };
        let type_name = LABEL
            .try_with(Cell::get)
            .ok()
            .flatten()
            .unwrap_or_else(|| size_class(size));

        hub.try_emit(&RawEvent {
            stream: Stream::Allocation,
            event_id: EVENT_ALLOCATION_TICK,
            correlation_id: id,
            payload: &[PayloadValue::U64(bytes), PayloadValue::Str(type_name)],
        });
    }
}

// SAFETY: every call is forwarded unchanged to `inner`; accounting only
// inspects sizes and never touches the returned memory.
unsafe impl<A: GlobalAlloc> GlobalAlloc for TickingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            self.account(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            self.account(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() && new_size > layout.size() {
            self.account(new_size - layout.size());
        }
        new_ptr
    }
}
