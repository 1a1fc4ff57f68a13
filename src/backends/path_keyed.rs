//! Path-keyed backends (Vault, AWS Secrets Manager, Azure Key Vault)
//!
//! The remote identity of a secret is its path, `{base_path}/{name}`, and the
//! value is written under the key `value`. Nothing but the path is stored
//! locally.
//!
//! References use the `path#key` form. Vault requires the key; the other
//! stores default to `value`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::backend::{EncryptionBackend, SecretEngine};
use crate::domain::{
    EncryptedRecord, EncryptionType, SecretBytes, SecretManagerConfig, SecretString, TenantId,
};
use crate::errors::{BackendErrorCode, KeywardError, Result};

/// Key under which inline values are written
pub const VALUE_KEY: &str = "value";

/// Base path used when a config does not set one
pub const DEFAULT_BASE_PATH: &str = "keyward";

/// A connected remote store
#[async_trait]
pub trait RemoteSecretStore: Send + Sync {
    /// Create or replace the value at `path`
    async fn write(&self, path: &str, key: &str, value: &SecretString) -> Result<()>;

    /// Read one key; `SecretNotFound` if the path or key is absent
    async fn read(&self, path: &str, key: &str) -> Result<SecretString>;

    /// Remove `path`; `SecretNotFound` if nothing is there
    async fn delete(&self, path: &str) -> Result<()>;

    /// Authenticate and touch nothing
    async fn check_access(&self) -> Result<()>;

    async fn list_engines(&self) -> Result<Vec<SecretEngine>> {
        Err(KeywardError::unsupported("This store does not expose secret engines"))
    }
}

/// Opens a [`RemoteSecretStore`] for a config with unsealed credentials
#[async_trait]
pub trait RemoteStoreConnector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, config: &SecretManagerConfig) -> Result<Arc<dyn RemoteSecretStore>>;
}

/// Split a reference into `(path, key)`
pub fn parse_reference(
    encryption_type: EncryptionType,
    reference: &str,
) -> Result<(String, String)> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(KeywardError::validation_field("Secret path must not be empty", "path"));
    }

    match reference.rsplit_once('#') {
        Some((path, key)) if !path.is_empty() && !key.is_empty() => {
            Ok((path.to_string(), key.to_string()))
        }
        Some(_) => Err(KeywardError::validation_field(
            format!("Secret path '{}' must have a non-empty path and key around '#'", reference),
            "path",
        )),
        None if encryption_type == EncryptionType::Vault => Err(KeywardError::validation_field(
            "Vault secret path must include '#' followed by the key name, \
             e.g. /foo/bar/my-secret#my-key",
            "path",
        )),
        None => Ok((reference.to_string(), VALUE_KEY.to_string())),
    }
}

/// Remote path for an inline secret named `name` under the config's base path
pub fn secret_path(config: &SecretManagerConfig, name: &str) -> String {
    let base = config
        .connection
        .base_path
        .as_deref()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_BASE_PATH);
    format!("{}/{}", base, name)
}

fn expect_remote(record: &EncryptedRecord) -> Result<&str> {
    record.remote_path().ok_or_else(|| {
        KeywardError::secret_management(
            BackendErrorCode::MalformedResponse,
            format!("Expected a remote record, found '{}'", record.kind()),
        )
    })
}

/// Backend for stores where the secret's name is its address
#[derive(Debug)]
pub struct PathKeyedBackend {
    encryption_type: EncryptionType,
    connector: Arc<dyn RemoteStoreConnector>,
}

impl PathKeyedBackend {
    pub fn new(encryption_type: EncryptionType, connector: Arc<dyn RemoteStoreConnector>) -> Self {
        Self { encryption_type, connector }
    }
}

#[async_trait]
impl EncryptionBackend for PathKeyedBackend {
    fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    #[instrument(skip(self, config), fields(config_id = %config.id))]
    async fn validate(&self, config: &SecretManagerConfig) -> Result<()> {
        self.connector.connect(config).await?.check_access().await
    }

    #[instrument(skip(self, plaintext, config), fields(tenant_id = %tenant_id, secret_name = %name))]
    async fn encrypt_secret(
        &self,
        tenant_id: &TenantId,
        name: &str,
        plaintext: &SecretBytes,
        config: &SecretManagerConfig,
    ) -> Result<EncryptedRecord> {
        let value = plaintext.to_secret_string().map_err(|_| {
            KeywardError::validation_field(
                format!("{} only stores UTF-8 secret values", self.encryption_type),
                "value",
            )
        })?;

        let path = secret_path(config, name);
        self.connector.connect(config).await?.write(&path, VALUE_KEY, &value).await?;

        debug!(path = %path, "Wrote secret to remote store");
        Ok(EncryptedRecord::Remote { path })
    }

    async fn decrypt_secret(
        &self,
        _tenant_id: &TenantId,
        record: &EncryptedRecord,
        config: &SecretManagerConfig,
    ) -> Result<SecretBytes> {
        let path = expect_remote(record)?;
        let value = self.connector.connect(config).await?.read(path, VALUE_KEY).await?;
        Ok(value.to_bytes())
    }

    #[instrument(skip(self, config), fields(tenant_id = %tenant_id))]
    async fn resolve_reference(
        &self,
        tenant_id: &TenantId,
        reference: &str,
        config: &SecretManagerConfig,
    ) -> Result<SecretBytes> {
        let (path, key) = parse_reference(self.encryption_type, reference)?;
        let value = self.connector.connect(config).await?.read(&path, &key).await?;
        Ok(value.to_bytes())
    }

    async fn delete_secret(
        &self,
        _tenant_id: &TenantId,
        record: &EncryptedRecord,
        config: &SecretManagerConfig,
    ) -> Result<()> {
        let path = expect_remote(record)?;
        self.connector.connect(config).await?.delete(path).await
    }

    async fn list_engines(&self, config: &SecretManagerConfig) -> Result<Vec<SecretEngine>> {
        self.connector.connect(config).await?.list_engines().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConnectionSettings;

    #[test]
    fn test_parse_reference_vault_requires_key() {
        let err = parse_reference(EncryptionType::Vault, "/foo/bar/my-secret").unwrap_err();
        assert!(matches!(err, KeywardError::Validation { .. }));

        let (path, key) = parse_reference(EncryptionType::Vault, "/foo/bar/my-secret#my-key")
            .unwrap();
        assert_eq!(path, "/foo/bar/my-secret");
        assert_eq!(key, "my-key");
    }

    #[test]
    fn test_parse_reference_defaults_key_for_other_stores() {
        let (path, key) = parse_reference(EncryptionType::AwsSecretsManager, "prod/db").unwrap();
        assert_eq!(path, "prod/db");
        assert_eq!(key, VALUE_KEY);
    }

    #[test]
    fn test_parse_reference_rejects_dangling_hash() {
        assert!(parse_reference(EncryptionType::Vault, "/foo#").is_err());
        assert!(parse_reference(EncryptionType::Vault, "#key").is_err());
        assert!(parse_reference(EncryptionType::Vault, "   ").is_err());
    }

    #[test]
    fn test_secret_path_uses_base_path() {
        let mut config = SecretManagerConfig::local_fallback(&TenantId::new("acct").unwrap());
        assert_eq!(secret_path(&config, "s1"), "keyward/s1");

        config.connection =
            ConnectionSettings { base_path: Some("/team/secrets/".into()), ..Default::default() };
        assert_eq!(secret_path(&config, "s1"), "team/secrets/s1");
    }
}
