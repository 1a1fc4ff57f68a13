//! # Configuration Settings
//!
//! Defines the configuration structure for keyward.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use validator::Validate;

use crate::domain::{SecretString, TenantId};
use crate::errors::{KeywardError, Result};
use crate::services::secret_encryption::{decode_key, KEY_SIZE};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Master key for the LOCAL backend
    #[validate(nested)]
    pub encryption: EncryptionConfig,

    /// Remote backend call policy
    #[validate(nested)]
    pub backends: BackendConfig,

    /// Tenants allowed to fall back to LOCAL encryption
    #[serde(default)]
    pub local_encryption: LocalEncryptionConfig,

    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Build configuration from `KEYWARD_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            encryption: EncryptionConfig::from_lookup(&lookup)?,
            backends: BackendConfig::from_lookup(&lookup)?,
            local_encryption: LocalEncryptionConfig::from_lookup(&lookup),
            database: DatabaseConfig::from_lookup(&lookup)?,
            observability: ObservabilityConfig::from_lookup(&lookup),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(KeywardError::from)?;

        self.validate_custom()?;

        Ok(())
    }

    /// Custom validation logic that goes beyond what the validator crate can do
    fn validate_custom(&self) -> Result<()> {
        decode_key(self.encryption.master_key_base64.expose_secret())?;

        if !self.database.url.starts_with("sqlite:") {
            return Err(KeywardError::validation_field(
                "Database URL must start with 'sqlite:'",
                "database.url",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(KeywardError::validation_field(
                "Min connections cannot exceed max connections",
                "database.min_connections",
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| KeywardError::config(format!("Invalid value for {}: {}", key, e))),
        None => Ok(default),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key).map(|s| s.eq_ignore_ascii_case("true") || s == "1").unwrap_or(default)
}

/// LOCAL backend key material
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EncryptionConfig {
    /// Base64-encoded 32-byte master encryption key
    pub master_key_base64: SecretString,

    /// Key version recorded on every sealed record
    #[validate(length(min = 1, max = 64, message = "Key version must be 1-64 characters"))]
    pub key_version: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self { master_key_base64: SecretString::default(), key_version: "default".to_string() }
    }
}

impl EncryptionConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let master_key_base64 = lookup("KEYWARD_SECRET_ENCRYPTION_KEY").ok_or_else(|| {
            KeywardError::config(
                "KEYWARD_SECRET_ENCRYPTION_KEY environment variable not set. \
                 Generate a key with: openssl rand -base64 32",
            )
        })?;

        let key_version =
            lookup("KEYWARD_SECRET_KEY_VERSION").unwrap_or_else(|| "default".to_string());

        Ok(Self { master_key_base64: SecretString::new(master_key_base64), key_version })
    }

    /// Fresh random key, for development and tests
    pub fn generate(key_version: impl Into<String>) -> Result<Self> {
        let mut key = zeroize::Zeroizing::new([0u8; KEY_SIZE]);
        SystemRandom::new()
            .fill(&mut key[..])
            .map_err(|_| KeywardError::internal("Failed to generate encryption key"))?;

        Ok(Self {
            master_key_base64: SecretString::new(BASE64.encode(&key[..])),
            key_version: key_version.into(),
        })
    }

    /// Deterministic key for unit tests; never use outside tests
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            master_key_base64: SecretString::new(BASE64.encode([0x42u8; KEY_SIZE])),
            key_version: "test".to_string(),
        }
    }
}

/// Remote backend call policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackendConfig {
    /// Per-call timeout for remote backend round-trips
    #[validate(range(
        min = 1,
        max = 30,
        message = "Backend timeout must be between 1 and 30 seconds"
    ))]
    pub call_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { call_timeout_secs: 5 }
    }
}

impl BackendConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self { call_timeout_secs: parse_var(lookup, "KEYWARD_BACKEND_TIMEOUT_SECS", 5)? })
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Which tenants may use the LOCAL fallback in the global-secret-manager chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalEncryptionConfig {
    /// Every tenant has local encryption enabled
    #[serde(default)]
    pub enabled_for_all: bool,

    #[serde(default)]
    pub enabled_tenants: BTreeSet<String>,
}

impl LocalEncryptionConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let enabled_tenants = lookup("KEYWARD_LOCAL_ENCRYPTION_TENANTS")
            .map(|raw| {
                raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
            })
            .unwrap_or_default();

        Self {
            enabled_for_all: parse_flag(lookup, "KEYWARD_LOCAL_ENCRYPTION_ALL", false),
            enabled_tenants,
        }
    }

    pub fn is_enabled(&self, tenant_id: &TenantId) -> bool {
        self.enabled_for_all || self.enabled_tenants.contains(tenant_id.as_str())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(max = 50, message = "Min connections must be at most 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Run embedded migrations when the pool is created
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/keyward.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            url: lookup("KEYWARD_DATABASE_URL").unwrap_or(defaults.url),
            max_connections: parse_var(
                lookup,
                "KEYWARD_DATABASE_MAX_CONNECTIONS",
                defaults.max_connections,
            )?,
            min_connections: parse_var(
                lookup,
                "KEYWARD_DATABASE_MIN_CONNECTIONS",
                defaults.min_connections,
            )?,
            connect_timeout_seconds: parse_var(
                lookup,
                "KEYWARD_DATABASE_CONNECT_TIMEOUT_SECONDS",
                defaults.connect_timeout_seconds,
            )?,
            idle_timeout_seconds: parse_var(
                lookup,
                "KEYWARD_DATABASE_IDLE_TIMEOUT_SECONDS",
                defaults.idle_timeout_seconds,
            )?,
            auto_migrate: parse_flag(
                lookup,
                "KEYWARD_DATABASE_AUTO_MIGRATE",
                defaults.auto_migrate,
            ),
        })
    }

    /// In-memory SQLite database, single connection so every query sees the same data
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            idle_timeout_seconds: 0,
            ..Self::default()
        }
    }

    /// True for `sqlite::memory:` and `mode=memory` URLs
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Service name attached to log output
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level or full `EnvFilter` directive
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "keyward".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            service_name: lookup("KEYWARD_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: lookup("KEYWARD_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logging: parse_flag(lookup, "KEYWARD_JSON_LOGGING", defaults.json_logging),
        }
    }
}
