//! Task-scoped correlation id.
//!
//! The HTTP middleware runs each request inside [`scope`]; anything on the
//! same task (including the ticking allocator) can then ask for
//! [`current`].

use std::future::Future;

use super::event::CorrelationId;

tokio::task_local! {
    static CURRENT: CorrelationId;
}

/// Run `future` with `id` as the current correlation id on every poll.
pub fn scope<F: Future>(id: CorrelationId, future: F) -> impl Future<Output = F::Output> {
    CURRENT.scope(id, future)
}

/// Synchronous counterpart of [`scope`].
pub fn sync_scope<R>(id: CorrelationId, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(id, f)
}

/// The id of the request being served on this task, if any.
///
/// Never panics and never allocates; safe to call from the allocator.
pub fn current() -> Option<CorrelationId> {
    CURRENT.try_with(|id| *id).ok()
}
