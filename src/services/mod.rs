//! Business logic services
//!
//! Secret-manager config lifecycle, secret CRUD, the master-key cipher used by
//! the LOCAL backend and the audit sink contract.

pub mod audit;
pub mod secret_crud;
pub mod secret_encryption;
pub mod secret_manager_config;

pub use audit::{AuditAction, AuditEvent, AuditSink, TracingAuditSink};
pub use secret_crud::{backend_name, SecretCrudService};
pub use secret_encryption::SecretCipher;
pub use secret_manager_config::SecretManagerConfigService;
