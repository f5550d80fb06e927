use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::summary::RequestSummary;

// ─── Request identity ────────────────────────────────────────────

/// The externally observable HTTP transaction a record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    pub verb: String,
    pub path: String,
}

impl Request {
    pub fn new(
        request_id: impl Into<String>,
        verb: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            verb: verb.into(),
            path: path.into(),
        }
    }
}

// ─── Byte counters ───────────────────────────────────────────────

/// Total plus per-type breakdown, always mutated together.
/// Types keep the order in which they were first seen.
#[derive(Debug, Default)]
pub(crate) struct Allocations {
    total_bytes: u64,
    by_type: IndexMap<String, u64>,
}

impl Allocations {
    /// A tick that would overflow the total is dropped whole. No entry can
    /// exceed the total, so checking the total alone is enough.
    fn add(&mut self, type_name: &str, bytes: u64) {
        let Some(total_bytes) = self.total_bytes.checked_add(bytes) else {
            return;
        };
        match self.by_type.get_mut(type_name) {
            Some(existing) => *existing += bytes,
            None => {
                self.by_type.insert(type_name.to_owned(), bytes);
            }
        }
        self.total_bytes = total_bytes;
    }

    fn clear(&mut self) {
        self.total_bytes = 0;
        self.by_type.clear();
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.by_type.iter().map(|(name, bytes)| (name.as_str(), *bytes))
    }

    pub(crate) fn len(&self) -> usize {
        self.by_type.len()
    }
}

// ─── AllocationRecord ────────────────────────────────────────────

/// Per-request accumulator.
///
/// Identity and timestamps are only written while the record is exclusively
/// owned (before it enters the correlation table and after it leaves it);
/// the byte counters are the only state shared between threads and sit
/// behind a lock that belongs to this record alone.
#[derive(Debug)]
pub struct AllocationRecord {
    request: Option<Request>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    allocations: Mutex<Allocations>,
}

impl AllocationRecord {
    /// A record with no identity, zero bytes and no breakdown.
    pub fn blank() -> Self {
        Self {
            request: None,
            started_at: DateTime::<Utc>::MIN_UTC,
            finished_at: None,
            allocations: Mutex::new(Allocations::default()),
        }
    }

    pub fn begin(&mut self, request: Request, started_at: DateTime<Utc>) {
        self.request = Some(request);
        self.started_at = started_at;
    }

    /// Attribute `bytes` of `type_name` to this request. Safe to call from
    /// any number of threads at once.
    pub fn add(&self, type_name: &str, bytes: u64) {
        self.allocations.lock().add(type_name, bytes);
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
    }

    /// Back to the blank state. Keeps the breakdown's capacity.
    pub fn reset(&mut self) {
        self.request = None;
        self.started_at = DateTime::<Utc>::MIN_UTC;
        self.finished_at = None;
        self.allocations.get_mut().clear();
    }

    pub fn is_blank(&self) -> bool {
        let allocations = self.allocations.lock();
        self.request.is_none()
            && self.finished_at.is_none()
            && allocations.total_bytes == 0
            && allocations.by_type.is_empty()
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn total_bytes(&self) -> u64 {
        self.allocations.lock().total_bytes
    }

    /// Sum of the per-type breakdown; equals [`total_bytes`](Self::total_bytes).
    pub fn breakdown_sum(&self) -> u64 {
        self.allocations.lock().by_type.values().sum()
    }

    /// Read-only view of a finished record. `None` until both
    /// [`begin`](Self::begin) and [`finish`](Self::finish) have run.
    pub fn summary(&mut self) -> Option<RequestSummary<'_>> {
        let request = self.request.as_ref()?;
        let finished_at = self.finished_at?;
        Some(RequestSummary::new(
            request,
            self.started_at,
            finished_at,
            self.allocations.get_mut(),
        ))
    }
}

impl Default for AllocationRecord {
    fn default() -> Self {
        Self::blank()
    }
}
