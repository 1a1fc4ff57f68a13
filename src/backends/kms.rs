//! KMS-style envelope backend
//!
//! Each secret gets a fresh data key from the provider's KMS. The value is
//! sealed locally with that key; only the wrapped data key and the ciphertext
//! are stored. The plaintext data key is zeroized as soon as the cipher has
//! been built.
//!
//! Cloud SDKs stay outside the crate: embedders supply a [`KmsConnector`]
//! that turns a config into a [`KmsClient`].

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use super::backend::EncryptionBackend;
use crate::domain::{EncryptedRecord, EncryptionType, SecretBytes, SecretManagerConfig, TenantId};
use crate::errors::{BackendErrorCode, KeywardError, Result};
use crate::services::secret_encryption::decode_pair;
use crate::services::SecretCipher;

/// Data key pair returned by the KMS
pub struct DataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("plaintext", &"[REDACTED]")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Minimal KMS operations needed for envelope encryption
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Generate a 256-bit data key wrapped under `key_id`
    async fn generate_data_key(&self, key_id: &str) -> Result<DataKey>;

    /// Unwrap a data key previously produced by [`KmsClient::generate_data_key`]
    async fn decrypt_data_key(
        &self,
        key_id: &str,
        encrypted_data_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// Prove the credentials can use `key_id` without changing anything
    async fn check_access(&self, key_id: &str) -> Result<()>;
}

/// Builds a KMS client from a config with unsealed credentials
#[async_trait]
pub trait KmsConnector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, config: &SecretManagerConfig) -> Result<Arc<dyn KmsClient>>;
}

/// Envelope encryption backend for one KMS family
#[derive(Debug)]
pub struct EnvelopeBackend {
    encryption_type: EncryptionType,
    connector: Arc<dyn KmsConnector>,
}

impl EnvelopeBackend {
    pub fn new(encryption_type: EncryptionType, connector: Arc<dyn KmsConnector>) -> Self {
        Self { encryption_type, connector }
    }

    fn key_id<'a>(&self, config: &'a SecretManagerConfig) -> Result<&'a str> {
        config.connection.key_id.as_deref().filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            KeywardError::validation_field(
                format!("{} config requires a key id", self.encryption_type),
                "connection.key_id",
            )
        })
    }
}

#[async_trait]
impl EncryptionBackend for EnvelopeBackend {
    fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    #[instrument(skip(self, config), fields(config_id = %config.id))]
    async fn validate(&self, config: &SecretManagerConfig) -> Result<()> {
        let key_id = self.key_id(config)?;
        let client = self.connector.connect(config).await?;
        client.check_access(key_id).await
    }

    #[instrument(skip(self, plaintext, config), fields(tenant_id = %tenant_id, secret_name = %name))]
    async fn encrypt_secret(
        &self,
        tenant_id: &TenantId,
        name: &str,
        plaintext: &SecretBytes,
        config: &SecretManagerConfig,
    ) -> Result<EncryptedRecord> {
        let key_id = self.key_id(config)?;
        let client = self.connector.connect(config).await?;
        let data_key = client.generate_data_key(key_id).await?;

        let cipher = SecretCipher::from_key_bytes(&data_key.plaintext, key_id)?;
        let (ciphertext, nonce) = cipher.encrypt(plaintext.expose_secret())?;

        debug!(key_id = %key_id, "Envelope encrypted secret");

        Ok(EncryptedRecord::Envelope {
            key_id: key_id.to_string(),
            encrypted_data_key: BASE64.encode(&data_key.ciphertext),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    #[instrument(skip(self, record, config), fields(tenant_id = %tenant_id))]
    async fn decrypt_secret(
        &self,
        tenant_id: &TenantId,
        record: &EncryptedRecord,
        config: &SecretManagerConfig,
    ) -> Result<SecretBytes> {
        let EncryptedRecord::Envelope { key_id, encrypted_data_key, nonce, ciphertext } = record
        else {
            return Err(KeywardError::secret_management(
                BackendErrorCode::MalformedResponse,
                format!("{} cannot decrypt a '{}' record", self.encryption_type, record.kind()),
            ));
        };

        let wrapped = BASE64.decode(encrypted_data_key).map_err(|e| {
            KeywardError::secret_management(
                BackendErrorCode::MalformedResponse,
                format!("Malformed data key encoding: {}", e),
            )
        })?;
        let (ciphertext, nonce) = decode_pair(ciphertext, nonce)?;

        let client = self.connector.connect(config).await?;
        let data_key = client.decrypt_data_key(key_id, &wrapped).await?;

        SecretCipher::from_key_bytes(&data_key, key_id.as_str())?.decrypt(&ciphertext, &nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConnectionSettings;

    /// Wraps data keys by XOR with a fixed byte
    struct XorKms;

    #[async_trait]
    impl KmsClient for XorKms {
        async fn generate_data_key(&self, _key_id: &str) -> Result<DataKey> {
            let plaintext = vec![0x11u8; 32];
            let ciphertext = plaintext.iter().map(|b| b ^ 0x5a).collect();
            Ok(DataKey { plaintext: Zeroizing::new(plaintext), ciphertext })
        }

        async fn decrypt_data_key(
            &self,
            _key_id: &str,
            encrypted_data_key: &[u8],
        ) -> Result<Zeroizing<Vec<u8>>> {
            Ok(Zeroizing::new(encrypted_data_key.iter().map(|b| b ^ 0x5a).collect()))
        }

        async fn check_access(&self, key_id: &str) -> Result<()> {
            if key_id == "denied" {
                return Err(KeywardError::secret_management(
                    BackendErrorCode::AuthenticationFailed,
                    "access denied",
                ));
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    struct XorConnector;

    #[async_trait]
    impl KmsConnector for XorConnector {
        async fn connect(&self, _config: &SecretManagerConfig) -> Result<Arc<dyn KmsClient>> {
            Ok(Arc::new(XorKms))
        }
    }

    fn config(key_id: Option<&str>) -> SecretManagerConfig {
        let mut config = SecretManagerConfig::local_fallback(&TenantId::new("acct").unwrap());
        config.encryption_type = EncryptionType::GcpKms;
        config.connection =
            ConnectionSettings { key_id: key_id.map(String::from), ..Default::default() };
        config
    }

    fn backend() -> EnvelopeBackend {
        EnvelopeBackend::new(EncryptionType::GcpKms, Arc::new(XorConnector))
    }

    #[tokio::test]
    async fn test_envelope_roundtrip() {
        let backend = backend();
        let tenant = TenantId::new("acct").unwrap();
        let config = config(Some("projects/p/keys/k"));

        let record = backend
            .encrypt_secret(&tenant, "s1", &SecretBytes::from("payload"), &config)
            .await
            .unwrap();
        let EncryptedRecord::Envelope { key_id, .. } = &record else {
            panic!("expected envelope record");
        };
        assert_eq!(key_id, "projects/p/keys/k");

        let plaintext = backend.decrypt_secret(&tenant, &record, &config).await.unwrap();
        assert_eq!(plaintext.expose_secret(), b"payload");
    }

    #[tokio::test]
    async fn test_missing_key_id_is_validation_error() {
        let err = backend().validate(&config(None)).await.unwrap_err();
        assert!(matches!(err, KeywardError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_access_failure_propagates() {
        let err = backend().validate(&config(Some("denied"))).await.unwrap_err();
        assert_eq!(err.backend_code(), Some(BackendErrorCode::AuthenticationFailed));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_sealed_record_rejected() {
        let tenant = TenantId::new("acct").unwrap();
        let record = EncryptedRecord::Sealed {
            key_version: "v".into(),
            nonce: String::new(),
            ciphertext: String::new(),
        };
        let err = backend().decrypt_secret(&tenant, &record, &config(Some("k"))).await.unwrap_err();
        assert_eq!(err.backend_code(), Some(BackendErrorCode::MalformedResponse));
    }
}
