//! Turns request summaries into bounded allocation reports.

mod reporter;
mod sink;

pub use reporter::{kilobytes, AllocReporter, AllocationReport, KbEntry};
pub use sink::{ReportSink, SinkError, TracingSink, REPORT_TARGET};
