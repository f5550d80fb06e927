use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use super::record::{Allocations, Request};

/// Namespace used for type names that contain no separator.
pub const UNKNOWN_NAMESPACE: &str = "unknown";

// ─── Ranked entries ──────────────────────────────────────────────

/// A type or namespace together with the bytes attributed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedBytes<'a> {
    pub name: &'a str,
    pub bytes: u64,
}

/// Descending by bytes; equal byte counts keep their input order.
pub fn rank_types<'a>(
    entries: impl IntoIterator<Item = (&'a str, u64)>,
    limit: usize,
) -> Vec<RankedBytes<'a>> {
    let ranked = entries
        .into_iter()
        .map(|(name, bytes)| RankedBytes { name, bytes })
        .collect();
    top(ranked, limit)
}

/// Groups types by [`namespace_of`], then ranks the groups like
/// [`rank_types`]. Ties keep the order in which each namespace was first
/// encountered.
pub fn rank_namespaces<'a>(
    entries: impl IntoIterator<Item = (&'a str, u64)>,
    limit: usize,
    separator: &str,
) -> Vec<RankedBytes<'a>> {
    let mut groups: IndexMap<&'a str, u64> = IndexMap::new();
    for (type_name, bytes) in entries {
        *groups.entry(namespace_of(type_name, separator)).or_insert(0) += bytes;
    }
    let ranked = groups
        .into_iter()
        .map(|(name, bytes)| RankedBytes { name, bytes })
        .collect();
    top(ranked, limit)
}

/// Everything before the last `separator`, or [`UNKNOWN_NAMESPACE`].
pub fn namespace_of<'a>(type_name: &'a str, separator: &str) -> &'a str {
    if separator.is_empty() {
        return UNKNOWN_NAMESPACE;
    }
    match type_name.rfind(separator) {
        Some(index) => &type_name[..index],
        None => UNKNOWN_NAMESPACE,
    }
}

fn top(mut ranked: Vec<RankedBytes<'_>>, limit: usize) -> Vec<RankedBytes<'_>> {
    // `sort_by` is stable, which is what preserves encounter order on ties.
    ranked.sort_by(|a, b| b.bytes.cmp(&a.bytes));
    ranked.truncate(limit);
    ranked
}

// ─── RequestSummary ──────────────────────────────────────────────

/// Read-only view of a finished request handed to summary observers.
///
/// Borrowed from a pooled record: it is only valid for the duration of the
/// callback. Use [`to_traced_request`](Self::to_traced_request) to keep a
/// copy.
#[derive(Debug, Clone, Copy)]
pub struct RequestSummary<'a> {
    request: &'a Request,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    allocations: &'a Allocations,
}

impl<'a> RequestSummary<'a> {
    pub(crate) fn new(
        request: &'a Request,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        allocations: &'a Allocations,
    ) -> Self {
        Self {
            request,
            started_at,
            finished_at,
            allocations,
        }
    }

    pub fn request(&self) -> &'a Request {
        self.request
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn total_bytes(&self) -> u64 {
        self.allocations.total_bytes()
    }

    /// Every `(type name, bytes)` pair, in first-seen order.
    pub fn allocations(&self) -> impl Iterator<Item = (&'a str, u64)> + 'a {
        self.allocations.iter()
    }

    pub fn type_count(&self) -> usize {
        self.allocations.len()
    }

    pub fn top_types(&self, limit: usize) -> Vec<RankedBytes<'a>> {
        rank_types(self.allocations(), limit)
    }

    pub fn top_namespaces(&self, limit: usize, separator: &str) -> Vec<RankedBytes<'a>> {
        rank_namespaces(self.allocations(), limit, separator)
    }

    /// An owned copy that outlives the callback.
    pub fn to_traced_request(&self) -> TracedRequest {
        TracedRequest {
            request: self.request.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            allocated_bytes: self.total_bytes(),
            allocations: self
                .allocations()
                .map(|(name, bytes)| (name.to_owned(), bytes))
                .collect(),
        }
    }
}

// ─── TracedRequest ───────────────────────────────────────────────

/// Owned, serializable copy of a [`RequestSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracedRequest {
    pub request: Request,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub allocated_bytes: u64,
    /// Type name → bytes, in first-seen order.
    pub allocations: IndexMap<String, u64>,
}

impl TracedRequest {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}
