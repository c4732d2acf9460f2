//! Failure reporting sink
//!
//! Permanent failures never throw across the subsystem boundary; they are
//! handed to this collaborator with full context and otherwise observed
//! only through the status publisher and direct queries.

use serde::Serialize;

/// Which queue instantiation produced the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureSource {
    Sync,
    Delivery,
}

/// Context handed to the reporting sink for one permanent failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub source: FailureSource,
    pub item_id: String,
    /// Entity tag for sync operations, channel name for delivery messages.
    pub subject: String,
    pub retry_count: u32,
    pub error: String,
}

pub trait FailureReporter: Send + Sync {
    fn report(&self, report: &FailureReport);
}

/// Default sink: a structured error event on the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl FailureReporter for LogReporter {
    fn report(&self, report: &FailureReport) {
        tracing::error!(
            source = ?report.source,
            item_id = %report.item_id,
            subject = %report.subject,
            retry_count = report.retry_count,
            error = %report.error,
            "Queue item failed permanently"
        );
    }
}
