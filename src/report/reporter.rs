use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tracing::warn;

use super::sink::{ReportSink, SinkError, TracingSink};
use crate::config::ReporterOptions;
use crate::tracer::{ObserverError, RankedBytes, RequestSummary, SummaryObserver};

// ─── Report shape ────────────────────────────────────────────────

/// A type or namespace with its allocation in kilobytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KbEntry {
    pub name: String,
    pub kb: f64,
}

impl fmt::Display for KbEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}: {}KB)", self.name, self.kb)
    }
}

/// Everything logged for one traced request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationReport {
    pub request_id: String,
    pub verb: String,
    pub path: String,
    pub allocated_kb: f64,
    /// Largest first, at most `type_breakdown_limit` entries.
    pub by_type: Vec<KbEntry>,
    /// Largest first, at most `namespace_breakdown_limit` entries.
    pub by_namespace: Vec<KbEntry>,
}

/// `bytes / 1024` to `precision` decimals. Midpoints round to even.
pub fn kilobytes(bytes: u64, precision: u32) -> f64 {
    let kb = bytes as f64 / 1024.0;
    let scale = 10f64.powi(precision.min(15) as i32);
    (kb * scale).round_ties_even() / scale
}

// ─── AllocReporter ───────────────────────────────────────────────

/// Summary observer that gates, ranks and emits allocation reports.
pub struct AllocReporter<S = TracingSink> {
    options: ReporterOptions,
    sink: S,
}

impl AllocReporter<TracingSink> {
    pub fn tracing(options: ReporterOptions) -> Self {
        Self::new(options, TracingSink)
    }
}

impl<S: ReportSink> AllocReporter<S> {
    pub fn new(options: ReporterOptions, sink: S) -> Self {
        Self { options, sink }
    }

    pub fn options(&self) -> &ReporterOptions {
        &self.options
    }

    /// `None` when reporting is disabled or the request allocated less than
    /// the configured threshold.
    pub fn build_report(&self, summary: &RequestSummary<'_>) -> Option<AllocationReport> {
        let options = &self.options;
        if !options.enabled {
            return None;
        }
        let total = summary.total_bytes();
        if options
            .min_allocation_threshold_bytes
            .is_some_and(|threshold| total < threshold)
        {
            return None;
        }

        let precision = options.kilobyte_precision;
        let to_kb = |ranked: Vec<RankedBytes<'_>>| -> Vec<KbEntry> {
            ranked
                .into_iter()
                .map(|entry| KbEntry {
                    name: entry.name.to_owned(),
                    kb: kilobytes(entry.bytes, precision),
                })
                .collect()
        };

        let request = summary.request();
        Some(AllocationReport {
            request_id: request.request_id.clone(),
            verb: request.verb.clone(),
            path: request.path.clone(),
            allocated_kb: kilobytes(total, precision),
            by_type: to_kb(summary.top_types(options.type_breakdown_limit)),
            by_namespace: to_kb(summary.top_namespaces(
                options.namespace_breakdown_limit,
                &options.namespace_separator,
            )),
        })
    }

    fn report(&self, summary: &RequestSummary<'_>) -> Result<(), SinkError> {
        match self.build_report(summary) {
            Some(report) => self.sink.emit(&report),
            None => Ok(()),
        }
    }
}

impl<S: ReportSink> SummaryObserver for AllocReporter<S> {
    fn on_summary(&self, summary: &RequestSummary<'_>) -> Result<(), ObserverError> {
        let request = summary.request();
        match panic::catch_unwind(AssertUnwindSafe(|| self.report(summary))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(
                request_id = %request.request_id,
                verb = %request.verb,
                path = %request.path,
                %error,
                "failed to report request allocations"
            ),
            Err(payload) => warn!(
                request_id = %request.request_id,
                verb = %request.verb,
                path = %request.path,
                panic = crate::tracer::panic_message(payload.as_ref()),
                "failed to report request allocations"
            ),
        }
        Ok(())
    }
}

impl<S> fmt::Debug for AllocReporter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocReporter")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
