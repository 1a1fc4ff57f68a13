//! # Metrics Collection
//!
//! Backend dispatch metrics through the `metrics` facade. The library never
//! installs an exporter; embedders pick their own recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use once_cell::sync::OnceCell;
use std::time::Duration;

use crate::domain::EncryptionType;

pub const BACKEND_CALLS_TOTAL: &str = "keyward_backend_calls_total";
pub const BACKEND_CALL_DURATION: &str = "keyward_backend_call_duration_seconds";
pub const AUDIT_FAILURES_TOTAL: &str = "keyward_audit_failures_total";

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register metric descriptions with whatever recorder is installed
pub fn describe_metrics() {
    DESCRIBED.get_or_init(|| {
        describe_counter!(
            BACKEND_CALLS_TOTAL,
            Unit::Count,
            "Remote backend calls by encryption type, operation and outcome"
        );
        describe_histogram!(
            BACKEND_CALL_DURATION,
            Unit::Seconds,
            "Latency of remote backend calls"
        );
        describe_counter!(
            AUDIT_FAILURES_TOTAL,
            Unit::Count,
            "Audit events that could not be delivered"
        );
    });
}

/// Outcome label of a backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Error,
    Timeout,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// Record one backend dispatch
pub fn record_backend_call(
    encryption_type: EncryptionType,
    operation: &'static str,
    outcome: CallOutcome,
    elapsed: Duration,
) {
    let labels = [
        ("encryption_type", encryption_type.as_str().to_string()),
        ("operation", operation.to_string()),
        ("outcome", outcome.as_str().to_string()),
    ];
    counter!(BACKEND_CALLS_TOTAL, &labels).increment(1);

    let duration_labels = [
        ("encryption_type", encryption_type.as_str().to_string()),
        ("operation", operation.to_string()),
    ];
    histogram!(BACKEND_CALL_DURATION, &duration_labels).record(elapsed.as_secs_f64());
}

/// Record an audit event the sink rejected
pub fn record_audit_failure(event_kind: &'static str) {
    let labels = [("event", event_kind.to_string())];
    counter!(AUDIT_FAILURES_TOTAL, &labels).increment(1);
}
