use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::reporter::{AllocationReport, KbEntry};

/// `tracing` target of every emitted report.
pub const REPORT_TARGET: &str = "request_alloc_tracer::report";

#[derive(Debug, Error)]
#[error("report sink failed: {0}")]
pub struct SinkError(pub String);

/// Where finished [`AllocationReport`]s go.
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &AllocationReport) -> Result<(), SinkError>;
}

impl<S: ReportSink + ?Sized> ReportSink for Arc<S> {
    fn emit(&self, report: &AllocationReport) -> Result<(), SinkError> {
        (**self).emit(report)
    }
}

/// Emits each report as one structured `info` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, report: &AllocationReport) -> Result<(), SinkError> {
        info!(
            target: REPORT_TARGET,
            request_id = %report.request_id,
            verb = %report.verb,
            path = %report.path,
            allocated_kb = report.allocated_kb,
            alloc_per_type = %render(&report.by_type),
            alloc_per_namespace = %render(&report.by_namespace),
            "request allocations"
        );
        Ok(())
    }
}

/// `(a: 1.5KB), (b: 0.25KB)`
pub(crate) fn render(entries: &[KbEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{entry}");
    }
    out
}
