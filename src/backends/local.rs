//! LOCAL backend
//!
//! Seals values with the platform master key. It keeps no remote state, so
//! it is also the root that unseals every other config's credentials.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::backend::EncryptionBackend;
use crate::domain::{EncryptedRecord, EncryptionType, SecretBytes, SecretManagerConfig, TenantId};
use crate::errors::Result;
use crate::services::SecretCipher;

/// Local AES-256-GCM backend
#[derive(Debug, Clone)]
pub struct LocalBackend {
    cipher: Arc<SecretCipher>,
}

impl LocalBackend {
    pub fn new(cipher: Arc<SecretCipher>) -> Self {
        Self { cipher }
    }

    pub fn key_version(&self) -> &str {
        self.cipher.key_version()
    }

    /// Seal bootstrap material (config credentials) without a config
    pub fn seal(&self, plaintext: &SecretBytes) -> Result<EncryptedRecord> {
        self.cipher.seal(plaintext)
    }

    /// Open bootstrap material sealed by [`LocalBackend::seal`]
    pub fn open(&self, record: &EncryptedRecord) -> Result<SecretBytes> {
        self.cipher.open(record)
    }
}

#[async_trait]
impl EncryptionBackend for LocalBackend {
    fn encryption_type(&self) -> EncryptionType {
        EncryptionType::Local
    }

    async fn validate(&self, _config: &SecretManagerConfig) -> Result<()> {
        Ok(())
    }

    async fn encrypt_secret(
        &self,
        tenant_id: &TenantId,
        name: &str,
        plaintext: &SecretBytes,
        _config: &SecretManagerConfig,
    ) -> Result<EncryptedRecord> {
        debug!(tenant_id = %tenant_id, secret_name = %name, "Sealing secret locally");
        self.seal(plaintext)
    }

    async fn decrypt_secret(
        &self,
        _tenant_id: &TenantId,
        record: &EncryptedRecord,
        _config: &SecretManagerConfig,
    ) -> Result<SecretBytes> {
        self.open(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncryptionConfig;
    use crate::errors::BackendErrorCode;

    fn backend() -> LocalBackend {
        let cipher = SecretCipher::new(&EncryptionConfig::for_testing()).unwrap();
        LocalBackend::new(Arc::new(cipher))
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let backend = backend();
        let tenant = TenantId::new("acct").unwrap();
        let config = SecretManagerConfig::local_fallback(&tenant);

        let record = backend
            .encrypt_secret(&tenant, "s1", &SecretBytes::from("v1"), &config)
            .await
            .unwrap();
        assert!(matches!(record, EncryptedRecord::Sealed { .. }));

        let plaintext = backend.decrypt_secret(&tenant, &record, &config).await.unwrap();
        assert_eq!(plaintext.expose_secret(), b"v1");
    }

    #[tokio::test]
    async fn test_decrypt_of_foreign_record_fails() {
        let backend = backend();
        let tenant = TenantId::new("acct").unwrap();
        let config = SecretManagerConfig::local_fallback(&tenant);

        let err = backend
            .decrypt_secret(&tenant, &EncryptedRecord::Remote { path: "x".into() }, &config)
            .await
            .unwrap_err();
        assert_eq!(err.backend_code(), Some(BackendErrorCode::EncryptDecryptFailed));
    }

    #[tokio::test]
    async fn test_delete_is_noop() {
        let backend = backend();
        let tenant = TenantId::new("acct").unwrap();
        let config = SecretManagerConfig::local_fallback(&tenant);
        let record = backend.seal(&SecretBytes::from("v")).unwrap();

        assert!(backend.delete_secret(&tenant, &record, &config).await.is_ok());
    }
}
