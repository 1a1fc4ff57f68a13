//! Encryption backend trait
//!
//! Defines the capability contract every backend family implements. A
//! backend is stateless with respect to configs: each call receives the
//! config (with unsealed credentials) it should act on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{EncryptedRecord, EncryptionType, SecretBytes, SecretManagerConfig, TenantId};
use crate::errors::{KeywardError, Result};

/// A secret engine mounted in a Vault-style backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEngine {
    pub name: String,
    pub engine_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
}

/// Trait for encryption backends
///
/// Implementations must be Send + Sync for use in async contexts.
#[async_trait]
pub trait EncryptionBackend: Send + Sync + std::fmt::Debug {
    /// The family this backend serves
    fn encryption_type(&self) -> EncryptionType;

    /// Live connectivity and credential check. Must not mutate remote state.
    async fn validate(&self, config: &SecretManagerConfig) -> Result<()>;

    /// Encrypt (or store) a new value under the logical `name`
    async fn encrypt_secret(
        &self,
        tenant_id: &TenantId,
        name: &str,
        plaintext: &SecretBytes,
        config: &SecretManagerConfig,
    ) -> Result<EncryptedRecord>;

    /// Create-or-replace the value stored under `name`.
    ///
    /// Path-keyed backends overwrite in place when `name` maps to the
    /// existing path; renames are orchestrated by the caller as a create at
    /// the new path followed by [`EncryptionBackend::delete_secret`].
    async fn update_secret(
        &self,
        tenant_id: &TenantId,
        name: &str,
        plaintext: &SecretBytes,
        _existing: &EncryptedRecord,
        config: &SecretManagerConfig,
    ) -> Result<EncryptedRecord> {
        self.encrypt_secret(tenant_id, name, plaintext, config).await
    }

    async fn decrypt_secret(
        &self,
        tenant_id: &TenantId,
        record: &EncryptedRecord,
        config: &SecretManagerConfig,
    ) -> Result<SecretBytes>;

    /// Read a value that already lives in the backend at `path`
    async fn resolve_reference(
        &self,
        _tenant_id: &TenantId,
        _path: &str,
        _config: &SecretManagerConfig,
    ) -> Result<SecretBytes> {
        Err(KeywardError::unsupported(format!(
            "{} does not support referenced secrets",
            self.encryption_type()
        )))
    }

    /// Remove remote state for a record.
    ///
    /// Reports [`crate::errors::BackendErrorCode::SecretNotFound`] when
    /// nothing exists at the record's location; the registry treats that as
    /// success. Backends that keep no remote state return `Ok`.
    async fn delete_secret(
        &self,
        _tenant_id: &TenantId,
        _record: &EncryptedRecord,
        _config: &SecretManagerConfig,
    ) -> Result<()> {
        Ok(())
    }

    /// Tear down backend-side state for a config being hard-deleted
    async fn deprovision(&self, _config: &SecretManagerConfig) -> Result<()> {
        Ok(())
    }

    /// List secret engines reachable with a candidate connection
    async fn list_engines(&self, _config: &SecretManagerConfig) -> Result<Vec<SecretEngine>> {
        Err(KeywardError::unsupported(format!(
            "{} does not expose secret engine metadata",
            self.encryption_type()
        )))
    }
}

/// Fail with a validation error unless the config carries plaintext credentials
pub(crate) fn require_credentials<'a>(
    config: &'a SecretManagerConfig,
    what: &str,
) -> Result<&'a str> {
    config.plaintext_credentials().map(|c| c.expose_secret()).ok_or_else(|| {
        KeywardError::validation_field(
            format!("{} requires {} credentials", config.encryption_type, what),
            "credentials",
        )
    })
}
