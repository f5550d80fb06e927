use std::collections::VecDeque;
use std::time::Instant;

use hdrhistogram::Histogram;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::PercentileSet;
use crate::tracer::{rank_types, ObserverError, RequestSummary, SummaryObserver, TracedRequest};

// ─── Configuration ───────────────────────────────────────────────

/// How many traced requests we keep for the live feed
const MAX_RECENT_REQUESTS: usize = 50;

/// Types listed in the snapshot's cumulative breakdown
const TOP_TYPES: usize = 10;

/// Bytes per request: 1 B → 1 TiB, 3 significant figures
const BYTES_HIGH: u64 = 1 << 40;

/// Request duration: 1 μs → 60 s
const DURATION_HIGH_US: u64 = 60_000_000;

const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Summary observer aggregating every traced request.
/// The tracer pushes summaries in, the HTTP endpoints read snapshots.
pub struct AllocationStats {
    inner: Mutex<Inner>,
}

/// A bucket in the per-request allocation distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistBucket {
    pub range_start_kb: u64,
    pub range_end_kb: u64,
    pub count: u64,
}

/// Cumulative bytes for one type across all traced requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeTotal {
    pub type_name: String,
    pub bytes: u64,
}

/// Complete snapshot served as JSON and on every SSE tick.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub allocated_bytes: PercentileSet,
    pub duration_us: PercentileSet,

    pub total_requests: u64,
    pub total_allocated_bytes: u64,
    pub requests_per_sec: f64,
    pub elapsed_secs: f64,

    pub top_types: Vec<TypeTotal>,
    pub recent_requests: Vec<TracedRequest>,
    pub distribution: Vec<DistBucket>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    bytes_hist: Histogram<u64>,
    duration_hist: Histogram<u64>,

    total_requests: u64,
    total_allocated_bytes: u64,
    bytes_by_type: IndexMap<String, u64>,

    recent: VecDeque<TracedRequest>,

    // Anchored on the first traced request
    start_time: Option<Instant>,
}

// ─── AllocationStats impl ────────────────────────────────────────

impl AllocationStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Record one finished request.
    pub fn record(&self, request: TracedRequest) {
        self.inner.lock().record(request);
    }

    /// Wipe everything collected so far.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Default for AllocationStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryObserver for AllocationStats {
    fn on_summary(&self, summary: &RequestSummary<'_>) -> Result<(), ObserverError> {
        self.record(summary.to_traced_request());
        Ok(())
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            bytes_hist: Histogram::<u64>::new_with_bounds(1, BYTES_HIGH, HIST_SIGFIG)
                .expect("constant histogram bounds are valid"),
            duration_hist: Histogram::<u64>::new_with_bounds(1, DURATION_HIGH_US, HIST_SIGFIG)
                .expect("constant histogram bounds are valid"),
            total_requests: 0,
            total_allocated_bytes: 0,
            bytes_by_type: IndexMap::new(),
            recent: VecDeque::with_capacity(MAX_RECENT_REQUESTS + 1),
            start_time: None,
        }
    }

    fn record(&mut self, request: TracedRequest) {
        self.start_time.get_or_insert_with(Instant::now);

        // ── Counters ────────────────────────────────────────────
        self.total_requests += 1;
        self.total_allocated_bytes += request.allocated_bytes;
        for (type_name, bytes) in &request.allocations {
            match self.bytes_by_type.get_mut(type_name) {
                Some(total) => *total += bytes,
                None => {
                    self.bytes_by_type.insert(type_name.clone(), *bytes);
                }
            }
        }

        // ── Histograms (clamped into range) ─────────────────────
        let duration_us = u64::try_from(request.duration().as_micros()).unwrap_or(u64::MAX);
        self.bytes_hist.saturating_record(request.allocated_bytes.max(1));
        self.duration_hist.saturating_record(duration_us.max(1));

        // ── Live feed ───────────────────────────────────────────
        self.recent.push_back(request);
        if self.recent.len() > MAX_RECENT_REQUESTS {
            self.recent.pop_front();
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let elapsed_secs = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let rps = if elapsed_secs > 0.0 {
            self.total_requests as f64 / elapsed_secs
        } else {
            0.0
        };

        let top_types = rank_types(
            self.bytes_by_type.iter().map(|(name, bytes)| (name.as_str(), *bytes)),
            TOP_TYPES,
        )
        .into_iter()
        .map(|ranked| TypeTotal {
            type_name: ranked.name.to_owned(),
            bytes: ranked.bytes,
        })
        .collect();

        StatsSnapshot {
            allocated_bytes: PercentileSet::from_histogram(&self.bytes_hist),
            duration_us: PercentileSet::from_histogram(&self.duration_hist),
            total_requests: self.total_requests,
            total_allocated_bytes: self.total_allocated_bytes,
            requests_per_sec: rps,
            elapsed_secs,
            top_types,
            // Newest first
            recent_requests: self.recent.iter().rev().cloned().collect(),
            distribution: Self::compute_distribution(&self.bytes_hist),
        }
    }

    // ── Distribution for the bar chart ──────────────────────────

    /// Bucket upper bounds in KiB. Ticks arrive every 100 KiB, so anything
    /// below that shows up as zero.
    const DIST_BOUNDARIES_KB: &'static [u64] = &[
        100, 200, 500, 1_024, 2_048, 5_120, 10_240, 20_480, 51_200, 102_400,
    ];

    fn compute_distribution(hist: &Histogram<u64>) -> Vec<DistBucket> {
        if hist.len() == 0 {
            return Vec::new();
        }

        let bounds = Self::DIST_BOUNDARIES_KB;
        let mut counts = vec![0u64; bounds.len() + 1]; // +1 for overflow

        for iv in hist.iter_recorded() {
            let kb = iv.value_iterated_to() / 1024;
            // First boundary >= kb; past the end means overflow
            let idx = bounds.partition_point(|&b| b < kb);
            counts[idx] += iv.count_at_value();
        }

        let mut result = Vec::with_capacity(counts.len());
        let mut prev = 0u64;
        for (&boundary, &count) in bounds.iter().zip(&counts) {
            if count > 0 {
                result.push(DistBucket {
                    range_start_kb: prev,
                    range_end_kb: boundary,
                    count,
                });
            }
            prev = boundary;
        }
        let overflow = counts[bounds.len()];
        if overflow > 0 {
            result.push(DistBucket {
                range_start_kb: prev,
                range_end_kb: hist.max() / 1024,
                count: overflow,
            });
        }

        result
    }
}
