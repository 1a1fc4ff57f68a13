//! # Configuration Management
//!
//! Runtime configuration for keyward, loaded from `KEYWARD_*` environment
//! variables and checked with `validator` plus custom rules.
//!
//! | Variable | Default |
//! |---|---|
//! | `KEYWARD_SECRET_ENCRYPTION_KEY` | required, base64 32 bytes |
//! | `KEYWARD_SECRET_KEY_VERSION` | `default` |
//! | `KEYWARD_BACKEND_TIMEOUT_SECS` | `5` |
//! | `KEYWARD_LOCAL_ENCRYPTION_ALL` | `false` |
//! | `KEYWARD_LOCAL_ENCRYPTION_TENANTS` | empty |
//! | `KEYWARD_DATABASE_URL` | `sqlite://./data/keyward.db` |
//! | `KEYWARD_LOG_LEVEL` | `info` |
//! | `KEYWARD_JSON_LOGGING` | `false` |

pub mod settings;

pub use settings::{
    AppConfig, BackendConfig, DatabaseConfig, EncryptionConfig, LocalEncryptionConfig,
    ObservabilityConfig,
};
