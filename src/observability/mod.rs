//! # Observability Infrastructure
//!
//! Structured logging (`tracing` + `tracing-subscriber`) and backend metrics
//! (`metrics` facade).

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::{describe_metrics, record_backend_call, CallOutcome};
