//! # Structured Logging
//!
//! Subscriber setup and span helpers built on the tracing ecosystem.
//!
//! Secret material never reaches a log line: plaintext is carried in
//! redacting wrappers, and every `#[instrument]` on a path that sees
//! plaintext skips the payload argument.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;
use crate::errors::{KeywardError, Result};

/// Create a tracing span for store operations.
///
/// ```rust,ignore
/// let span = db_span!("save_secret", tenant_id = %tenant);
/// ```
#[macro_export]
macro_rules! db_span {
    ($operation:expr) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for remote backend calls
#[macro_export]
macro_rules! backend_span {
    ($operation:expr, $encryption_type:expr) => {
        tracing::info_span!(
            "backend_call",
            operation = %$operation,
            encryption_type = %$encryption_type,
            call_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $encryption_type:expr, $($field:tt)*) => {
        tracing::info_span!(
            "backend_call",
            operation = %$operation,
            encryption_type = %$encryption_type,
            call_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Calling this twice
/// returns a config error instead of panicking.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            KeywardError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?;

    let result = if config.json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| KeywardError::config(format!("Failed to install log subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        "Logging initialized"
    );

    Ok(())
}

/// Log configuration at startup; the master key is never printed
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        key_version = %config.encryption.key_version,
        backend_timeout_secs = config.backends.call_timeout_secs,
        local_encryption_all = config.local_encryption.enabled_for_all,
        local_encryption_tenants = config.local_encryption.enabled_tenants.len(),
        database_url = %config.database.url,
        "keyward configuration"
    );
}
