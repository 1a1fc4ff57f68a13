//! # Keyward
//!
//! Secret-manager configuration and secret CRUD engine with pluggable
//! encryption backends.
//!
//! ## Architecture
//!
//! ```text
//! SecretCrudService ──► SecretManagerConfigService ──► BackendRegistry ──► EncryptionBackend
//!        │                         │                                        (LOCAL, KMS, Vault, ...)
//!        ▼                         ▼
//! SecretRecordStore        SecretManagerConfigStore        (in-memory or SQLite)
//! ```
//!
//! - **Backends**: one [`backends::EncryptionBackend`] per encryption type,
//!   dispatched through [`backends::BackendRegistry`] with a bounded timeout
//! - **Stores**: tenant-keyed persistence with compare-and-swap versions
//! - **Services**: validation, masking, reference guards and audit events
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use keyward::{AppConfig, Keyward, Result};
//! use keyward::domain::{NewSecret, Scope, TenantId};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let keyward = Keyward::builder(AppConfig::from_env()?).build_sqlite().await?;
//!     let tenant = TenantId::new("acct-1")?;
//!     let secret = keyward
//!         .secrets()
//!         .create(&tenant, NewSecret::text(Scope::account(), "db-password", "hunter2"))
//!         .await?;
//!     println!("created {}", secret.id);
//!     Ok(())
//! }
//! ```

pub mod backends;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod services;
pub mod startup;
pub mod storage;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{BackendErrorCode, KeywardError, Result};
pub use observability::init_logging;
pub use services::{SecretCrudService, SecretManagerConfigService};
pub use startup::{Keyward, KeywardBuilder};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "keyward");
    }
}
