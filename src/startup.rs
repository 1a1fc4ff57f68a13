//! Service wiring
//!
//! Builds the backend registry and both services from an [`AppConfig`]. The
//! LOCAL backend (which also seals config credentials) and the Vault KV
//! backend are always registered; embedders add KMS or other families with
//! [`KeywardBuilder::with_backend`].

use std::sync::Arc;
use tracing::info;

use crate::backends::{
    BackendRegistry, EncryptionBackend, LocalBackend, PathKeyedBackend, VaultConnector,
};
use crate::config::AppConfig;
use crate::domain::EncryptionType;
use crate::errors::Result;
use crate::observability::{describe_metrics, log_config_info};
use crate::services::{
    AuditSink, SecretCipher, SecretCrudService, SecretManagerConfigService, TracingAuditSink,
};
use crate::storage::{
    create_pool, InMemoryConfigStore, InMemorySecretStore, SecretManagerConfigStore,
    SecretRecordStore, SqliteConfigStore, SqliteSecretStore,
};

/// The assembled engine
#[derive(Clone)]
pub struct Keyward {
    configs: Arc<SecretManagerConfigService>,
    secrets: Arc<SecretCrudService>,
}

impl Keyward {
    pub fn builder(config: AppConfig) -> KeywardBuilder {
        KeywardBuilder::new(config)
    }

    pub fn secret_managers(&self) -> &Arc<SecretManagerConfigService> {
        &self.configs
    }

    pub fn secrets(&self) -> &Arc<SecretCrudService> {
        &self.secrets
    }
}

pub struct KeywardBuilder {
    config: AppConfig,
    backends: Vec<Arc<dyn EncryptionBackend>>,
    audit: Arc<dyn AuditSink>,
}

impl KeywardBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self { config, backends: Vec::new(), audit: Arc::new(TracingAuditSink) }
    }

    /// Register an extra backend; replaces a built-in one of the same type
    pub fn with_backend(mut self, backend: Arc<dyn EncryptionBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Engine over in-process stores
    pub fn build_in_memory(self) -> Result<Keyward> {
        self.build_with_stores(
            Arc::new(InMemoryConfigStore::new()),
            Arc::new(InMemorySecretStore::new()),
        )
    }

    /// Engine over SQLite, migrating the schema when `auto_migrate` is set
    pub async fn build_sqlite(self) -> Result<Keyward> {
        self.config.validate()?;
        let pool = create_pool(&self.config.database).await?;
        self.build_with_stores(
            Arc::new(SqliteConfigStore::new(pool.clone())),
            Arc::new(SqliteSecretStore::new(pool)),
        )
    }

    pub fn build_with_stores(
        self,
        config_store: Arc<dyn SecretManagerConfigStore>,
        secret_store: Arc<dyn SecretRecordStore>,
    ) -> Result<Keyward> {
        self.config.validate()?;
        log_config_info(&self.config);
        describe_metrics();

        let cipher = Arc::new(SecretCipher::new(&self.config.encryption)?);
        let local = Arc::new(LocalBackend::new(cipher));

        let mut registry = BackendRegistry::new(self.config.backends.call_timeout());
        registry.register(local.clone());
        registry.register(Arc::new(PathKeyedBackend::new(
            EncryptionType::Vault,
            Arc::new(VaultConnector::default()),
        )));
        for backend in self.backends {
            registry.register(backend);
        }
        let registered = registry.registered_types();

        let configs = Arc::new(
            SecretManagerConfigService::new(
                config_store,
                secret_store.clone(),
                Arc::new(registry),
                local,
            )
            .with_local_encryption(self.config.local_encryption.clone())
            .with_audit_sink(self.audit.clone()),
        );
        let secrets = Arc::new(
            SecretCrudService::new(secret_store, configs.clone()).with_audit_sink(self.audit),
        );

        info!(backends = ?registered, "Keyward services ready");
        Ok(Keyward { configs, secrets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncryptionConfig;
    use crate::domain::{NewSecret, Scope, TenantId};

    fn config() -> AppConfig {
        let mut config =
            AppConfig { encryption: EncryptionConfig::for_testing(), ..Default::default() };
        config.local_encryption.enabled_for_all = true;
        config
    }

    #[test]
    fn test_build_rejects_missing_key() {
        assert!(Keyward::builder(AppConfig::default()).build_in_memory().is_err());
    }

    #[tokio::test]
    async fn test_in_memory_engine_roundtrip() {
        let keyward = Keyward::builder(config()).build_in_memory().unwrap();
        let tenant = TenantId::new("acct").unwrap();
        let scope = Scope::account();

        let secret = keyward
            .secrets()
            .create(&tenant, NewSecret::text(scope.clone(), "db-password", "hunter2"))
            .await
            .unwrap();
        let value =
            keyward.secrets().get_decrypted_value(&tenant, &scope, &secret.id).await.unwrap();
        assert_eq!(value.expose_secret(), b"hunter2");
    }

    #[tokio::test]
    async fn test_sqlite_engine() {
        let mut config = config();
        config.database = crate::config::DatabaseConfig::in_memory();
        let keyward = Keyward::builder(config).build_sqlite().await.unwrap();
        let tenant = TenantId::new("acct").unwrap();

        let global = keyward.secret_managers().get_global_secret_manager(&tenant).await.unwrap();
        assert_eq!(global.encryption_type, EncryptionType::Local);
    }
}
