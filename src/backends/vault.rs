//! HashiCorp Vault KV v2 store
//!
//! The config's url is the Vault address, its credentials are the token, and
//! `engine_name` picks the KV mount (default: "secret").

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

use super::backend::{require_credentials, SecretEngine};
use super::path_keyed::{RemoteSecretStore, RemoteStoreConnector};
use crate::domain::{SecretManagerConfig, SecretString};
use crate::errors::{BackendErrorCode, KeywardError, Result};

/// Default KV mount
pub const DEFAULT_KV_MOUNT: &str = "secret";

fn map_vault_error(operation: &str, path: &str, err: ClientError) -> KeywardError {
    let code = match &err {
        ClientError::APIError { code: 404, .. } => BackendErrorCode::SecretNotFound,
        ClientError::APIError { code: 401 | 403, .. } => BackendErrorCode::AuthenticationFailed,
        ClientError::RestClientError { .. } => BackendErrorCode::ConnectionFailed,
        _ => BackendErrorCode::OperationFailed,
    };

    if code != BackendErrorCode::SecretNotFound {
        error!(error = %err, path = %path, operation = %operation, "Vault call failed");
    }
    KeywardError::secret_management(
        code,
        format!("Vault {} of '{}' failed: {}", operation, path, err),
    )
}

/// Builds a [`VaultKvStore`] for each call
#[derive(Debug, Default, Clone)]
pub struct VaultConnector;

#[async_trait]
impl RemoteStoreConnector for VaultConnector {
    async fn connect(&self, config: &SecretManagerConfig) -> Result<Arc<dyn RemoteSecretStore>> {
        let address = config.connection.url.as_deref().ok_or_else(|| {
            KeywardError::validation_field("Vault config requires a url", "connection.url")
        })?;
        let token = require_credentials(config, "a Vault token")?;

        if config.connection.engine_version == Some(1) {
            return Err(KeywardError::unsupported("Only KV version 2 engines are supported"));
        }

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(address).token(token);
        if let Some(namespace) = config.connection.namespace.clone() {
            settings_builder.namespace(Some(namespace));
        }

        let settings = settings_builder.build().map_err(|e| {
            KeywardError::validation_field(
                format!("Invalid Vault configuration: {}", e),
                "connection",
            )
        })?;

        let client = VaultClient::new(settings).map_err(|e| {
            KeywardError::secret_management(
                BackendErrorCode::ConnectionFailed,
                format!("Failed to create Vault client: {}", e),
            )
        })?;

        let mount = config
            .connection
            .engine_name
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_KV_MOUNT.to_string());

        Ok(Arc::new(VaultKvStore { client, mount }))
    }
}

/// One authenticated Vault client bound to a KV v2 mount
pub struct VaultKvStore {
    client: VaultClient,
    mount: String,
}

#[async_trait]
impl RemoteSecretStore for VaultKvStore {
    async fn write(&self, path: &str, key: &str, value: &SecretString) -> Result<()> {
        let mut data = HashMap::new();
        data.insert(key.to_string(), value.expose_secret().to_string());

        kv2::set(&self.client, &self.mount, path, &data)
            .await
            .map_err(|e| map_vault_error("write", path, e))?;

        info!(path = %path, mount = %self.mount, "Stored secret in Vault");
        Ok(())
    }

    async fn read(&self, path: &str, key: &str) -> Result<SecretString> {
        let data: HashMap<String, String> = kv2::read(&self.client, &self.mount, path)
            .await
            .map_err(|e| map_vault_error("read", path, e))?;

        data.get(key).map(|v| SecretString::new(v.clone())).ok_or_else(|| {
            KeywardError::secret_management(
                BackendErrorCode::SecretNotFound,
                format!("Vault secret '{}' has no key '{}'", path, key),
            )
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        kv2::delete_metadata(&self.client, &self.mount, path)
            .await
            .map_err(|e| map_vault_error("delete", path, e))?;

        info!(path = %path, mount = %self.mount, "Deleted secret from Vault");
        Ok(())
    }

    async fn check_access(&self) -> Result<()> {
        vaultrs::token::lookup_self(&self.client)
            .await
            .map_err(|e| map_vault_error("token lookup", "auth/token/lookup-self", e))?;
        debug!(mount = %self.mount, "Vault token is valid");
        Ok(())
    }

    async fn list_engines(&self) -> Result<Vec<SecretEngine>> {
        let mounts = vaultrs::sys::mount::list(&self.client)
            .await
            .map_err(|e| map_vault_error("mount list", "sys/mounts", e))?;

        let mut engines: Vec<SecretEngine> = mounts
            .into_iter()
            .filter(|(_, m)| m.mount_type == "kv" || m.mount_type == "generic")
            .map(|(name, m)| SecretEngine {
                name: name.trim_end_matches('/').to_string(),
                version: m
                    .options
                    .as_ref()
                    .and_then(|o| o.get("version"))
                    .and_then(|v| v.parse().ok()),
                engine_type: m.mount_type,
            })
            .collect();
        engines.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(engines)
    }
}
