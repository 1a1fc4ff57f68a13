//! Secret-manager configuration service
//!
//! Lifecycle of [`SecretManagerConfig`]s: create, update, delete, lookup,
//! connectivity tests and the global-secret-manager fallback chain.
//!
//! Credentials are sealed by the LOCAL bootstrap backend before they reach
//! the store and are only unsealed for callers that explicitly ask for them
//! (backend calls, `include_decrypted` reads). Everything returned outward is
//! masked.

use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::audit::{describe_changes, emit, AuditAction, AuditEvent, AuditSink, TracingAuditSink};
use crate::backends::{BackendRegistry, LocalBackend, SecretEngine};
use crate::config::LocalEncryptionConfig;
use crate::domain::{
    ConnectivityResult, DeleteOutcome, EncryptedRecord, EncryptionType, NewSecretManagerConfig,
    Scope, SecretManagerConfig, SecretManagerConfigUpdate, SecretManagerId, SecretString, TenantId,
};
use crate::errors::{KeywardError, Result};
use crate::storage::{SecretManagerConfigStore, SecretRecordStore};

const RESOURCE: &str = "secret manager";

/// Service for managing secret-manager configurations
pub struct SecretManagerConfigService {
    store: Arc<dyn SecretManagerConfigStore>,
    secrets: Arc<dyn SecretRecordStore>,
    registry: Arc<BackendRegistry>,
    bootstrap: Arc<LocalBackend>,
    local_encryption: LocalEncryptionConfig,
    audit: Arc<dyn AuditSink>,
}

impl SecretManagerConfigService {
    pub fn new(
        store: Arc<dyn SecretManagerConfigStore>,
        secrets: Arc<dyn SecretRecordStore>,
        registry: Arc<BackendRegistry>,
        bootstrap: Arc<LocalBackend>,
    ) -> Self {
        Self {
            store,
            secrets,
            registry,
            bootstrap,
            local_encryption: LocalEncryptionConfig::default(),
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_local_encryption(mut self, local_encryption: LocalEncryptionConfig) -> Self {
        self.local_encryption = local_encryption;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Parse the raw type tag and make sure a backend serves it
    fn supported_type(&self, raw: &str) -> Result<EncryptionType> {
        let encryption_type = EncryptionType::from_str(raw)?;
        if !self.registry.contains(encryption_type) {
            return Err(KeywardError::unsupported(format!(
                "Encryption type '{}' is not supported",
                encryption_type
            )));
        }
        Ok(encryption_type)
    }

    fn seal(&self, credentials: &SecretString) -> Result<EncryptedRecord> {
        self.bootstrap.seal(&credentials.to_bytes())
    }

    /// Copy with plaintext credentials restored from the sealed blob
    fn unseal(&self, config: &SecretManagerConfig) -> Result<SecretManagerConfig> {
        let mut unsealed = config.clone();
        unsealed.credentials = match &config.sealed_credentials {
            Some(sealed) => Some(self.bootstrap.open(sealed)?.to_secret_string()?),
            None => None,
        };
        Ok(unsealed)
    }

    /// Unsaved config built from a request, carrying plaintext credentials
    fn candidate(
        tenant_id: &TenantId,
        request: &NewSecretManagerConfig,
        encryption_type: EncryptionType,
    ) -> SecretManagerConfig {
        let now = Utc::now();
        SecretManagerConfig {
            id: SecretManagerId::new(),
            tenant_id: tenant_id.clone(),
            scope: request.scope.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            encryption_type,
            is_default: request.is_default,
            platform_managed: request.platform_managed,
            connection: request.connection.clone(),
            credentials: request.credentials.clone().filter(|c| !c.is_empty()),
            sealed_credentials: None,
            deleted: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Secrets owned by the config. Global configs can own secrets of any tenant.
    async fn references_to(&self, tenant_id: &TenantId, id: &SecretManagerId) -> Result<u64> {
        if tenant_id.is_global() {
            self.secrets.count_references_to_any_tenant(id).await
        } else {
            self.secrets.count_references_to(tenant_id, id).await
        }
    }

    /// Live config in exactly this scope, or `InvalidRequest`
    async fn load_live(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretManagerId,
    ) -> Result<SecretManagerConfig> {
        self.store
            .get(tenant_id, id)
            .await?
            .filter(|c| !c.deleted && c.scope == *scope)
            .ok_or_else(|| {
                KeywardError::invalid_request(format!("Secret manager '{}' does not exist", id))
            })
    }

    /// Create a new secret-manager config
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, config_name = %request.name, encryption_type = %request.encryption_type), name = "create_secret_manager")]
    pub async fn create(
        &self,
        tenant_id: &TenantId,
        request: NewSecretManagerConfig,
    ) -> Result<SecretManagerConfig> {
        let encryption_type = self.supported_type(&request.encryption_type)?;
        request.validate()?;
        request.scope.validate()?;

        if request.credentials.as_ref().is_some_and(SecretString::is_mask) {
            return Err(KeywardError::validation_field(
                "Credentials must be provided in clear text on create",
                "credentials",
            ));
        }

        if self.store.find_by_name(tenant_id, &request.name).await?.is_some() {
            return Err(KeywardError::duplicate(RESOURCE, "name", request.name));
        }

        let mut config = Self::candidate(tenant_id, &request, encryption_type);
        config.sealed_credentials = config.credentials.as_ref().map(|c| self.seal(c)).transpose()?;

        if request.skip_validation {
            info!(config_name = %config.name, "Skipping backend validation on create");
        } else {
            self.registry.validate(&config).await?;
        }

        let saved = self.store.save(&config.without_plaintext()).await?;

        info!(
            config_id = %saved.id,
            config_name = %saved.name,
            encryption_type = %saved.encryption_type,
            is_default = saved.is_default,
            "Secret manager created"
        );
        emit(self.audit.as_ref(), AuditEvent::secret_manager(AuditAction::Create, &saved)).await;

        Ok(saved.masked())
    }

    /// Update a config. Connection identity freezes once secrets use it.
    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, scope = %scope, config_id = %id), name = "update_secret_manager")]
    pub async fn update(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretManagerId,
        update: SecretManagerConfigUpdate,
    ) -> Result<SecretManagerConfig> {
        update.validate()?;
        let existing = self.load_live(tenant_id, scope, id).await?;

        if existing.platform_managed {
            return Err(KeywardError::unsupported(format!(
                "Secret manager '{}' is platform managed and cannot be modified",
                existing.name
            )));
        }
        if let Some(expected) = update.expected_version {
            if expected != existing.version {
                return Err(KeywardError::version_conflict(
                    RESOURCE,
                    id.as_str(),
                    expected,
                    existing.version,
                ));
            }
        }

        let mut next = existing.clone();
        let mut changed = Vec::new();

        if let Some(connection) = update.connection {
            let identity = existing.connection.identity_changes(&connection);
            if !identity.is_empty() {
                let references = self.references_to(tenant_id, id).await?;
                if references > 0 {
                    return Err(KeywardError::invalid_request(format!(
                        "Cannot change {} of secret manager '{}': {} secrets already use it",
                        identity.join(", "),
                        existing.name,
                        references
                    )));
                }
            }
            if connection != existing.connection {
                next.connection = connection;
                changed.push("connection");
            }
        }

        if let Some(name) = update.name.filter(|n| *n != existing.name) {
            if let Some(other) = self.store.find_by_name(tenant_id, &name).await? {
                if other.id != existing.id {
                    return Err(KeywardError::duplicate(RESOURCE, "name", name));
                }
            }
            next.name = name;
            changed.push("name");
        }

        if let Some(description) =
            update.description.filter(|d| Some(d) != existing.description.as_ref())
        {
            next.description = Some(description);
            changed.push("description");
        }

        if let Some(is_default) = update.is_default.filter(|d| *d != existing.is_default) {
            next.is_default = is_default;
            changed.push("default");
        }

        // The mask (or nothing) submitted back keeps the stored credentials
        let credentials_changed = match update.credentials {
            Some(credentials) if !credentials.is_mask() && !credentials.is_empty() => {
                next.sealed_credentials = Some(self.seal(&credentials)?);
                next.credentials = Some(credentials);
                changed.push("credentials");
                true
            }
            _ => false,
        };

        let connection_changed = next.connection != existing.connection;
        if (credentials_changed || connection_changed) && !update.skip_validation {
            let candidate = if credentials_changed { next.clone() } else { self.unseal(&next)? };
            self.registry.validate(&candidate).await?;
        }

        next.updated_at = Utc::now();
        let saved = self.store.save(&next.without_plaintext()).await?;

        info!(
            config_id = %saved.id,
            version = saved.version,
            changed = ?changed,
            "Secret manager updated"
        );
        let event = AuditEvent::secret_manager(AuditAction::Update, &saved)
            .with_description(describe_changes(&changed));
        emit(self.audit.as_ref(), event).await;

        Ok(saved.masked())
    }

    /// Delete a config. Blocked while any secret still uses it, soft or not.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, scope = %scope, config_id = %id), name = "delete_secret_manager")]
    pub async fn delete(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretManagerId,
        soft_delete: bool,
    ) -> Result<DeleteOutcome> {
        let Some(existing) =
            self.store.get(tenant_id, id).await?.filter(|c| !c.deleted && c.scope == *scope)
        else {
            return Ok(DeleteOutcome::NotFound);
        };

        if existing.platform_managed {
            return Err(KeywardError::unsupported(format!(
                "Secret manager '{}' is platform managed and cannot be deleted",
                existing.name
            )));
        }

        let references = self.references_to(tenant_id, id).await?;
        if references > 0 {
            warn!(config_id = %id, references, "Secret manager delete blocked by secrets");
            return Err(KeywardError::references_exist(
                RESOURCE,
                id.as_str(),
                references,
                "secrets",
            ));
        }

        let outcome = if soft_delete {
            if !self.store.soft_delete(tenant_id, id).await? {
                return Ok(DeleteOutcome::NotFound);
            }
            DeleteOutcome::SoftDeleted
        } else {
            let unsealed = self.unseal(&existing)?;
            self.registry.deprovision(&unsealed).await?;
            if !self.store.hard_delete(tenant_id, id).await? {
                return Ok(DeleteOutcome::NotFound);
            }
            DeleteOutcome::Deleted
        };

        info!(
            config_id = %id,
            config_name = %existing.name,
            outcome = ?outcome,
            "Secret manager deleted"
        );
        let action = if soft_delete { AuditAction::SoftDelete } else { AuditAction::Delete };
        emit(self.audit.as_ref(), AuditEvent::secret_manager(action, &existing)).await;

        Ok(outcome)
    }

    /// Fetch a live config by id, falling back to the global tenant.
    ///
    /// The LOCAL fallback id resolves only while the tenant has local
    /// encryption enabled or still owns secrets under it.
    ///
    /// Credentials are masked unless `include_decrypted` is set, in which
    /// case they are unsealed through the LOCAL bootstrap backend.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, config_id = %id), name = "get_secret_manager")]
    pub async fn get(
        &self,
        tenant_id: &TenantId,
        id: &SecretManagerId,
        include_decrypted: bool,
    ) -> Result<Option<SecretManagerConfig>> {
        if *id == SecretManagerId::local_fallback(tenant_id) {
            let reachable = self.local_encryption.is_enabled(tenant_id)
                || self.secrets.count_references_to(tenant_id, id).await? > 0;
            return Ok(reachable.then(|| SecretManagerConfig::local_fallback(tenant_id)));
        }

        let found = match self.store.get(tenant_id, id).await? {
            Some(config) => Some(config),
            None if !tenant_id.is_global() => self.store.get(&TenantId::global(), id).await?,
            None => None,
        };

        match found.filter(|c| !c.deleted) {
            Some(config) if include_decrypted => self.unseal(&config).map(Some),
            Some(config) => Ok(Some(config.masked())),
            None => Ok(None),
        }
    }

    /// Config with plaintext credentials for an internal backend call
    pub async fn resolve_for_use(
        &self,
        tenant_id: &TenantId,
        id: &SecretManagerId,
    ) -> Result<SecretManagerConfig> {
        self.get(tenant_id, id, true).await?.ok_or_else(|| {
            KeywardError::invalid_request(format!("Secret manager '{}' does not exist", id))
        })
    }

    /// Live configs of the tenant (and the global tenant's), masked and sorted by name
    #[instrument(skip(self), fields(tenant_id = %tenant_id), name = "list_secret_managers")]
    pub async fn list(
        &self,
        tenant_id: &TenantId,
        include_global: bool,
    ) -> Result<Vec<SecretManagerConfig>> {
        let mut configs: Vec<_> = self
            .store
            .list_for_tenant(tenant_id, include_global)
            .await?
            .iter()
            .map(SecretManagerConfig::masked)
            .collect();
        configs.sort_by(|a, b| {
            a.name.to_lowercase().cmp(&b.name.to_lowercase()).then_with(|| a.id.cmp(&b.id))
        });
        Ok(configs)
    }

    /// Live connectivity check. Never fails; problems come back as `Failure`.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, scope = %scope, config_id = %id), name = "test_secret_manager_connection")]
    pub async fn test_connection(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretManagerId,
    ) -> ConnectivityResult {
        let config = match self.get(tenant_id, id, true).await {
            Ok(Some(config)) if config.scope.contains(scope) => config,
            Ok(_) => {
                return ConnectivityResult::failure(format!(
                    "Secret manager '{}' does not exist",
                    id
                ))
            }
            Err(e) => return ConnectivityResult::failure(e.to_string()),
        };

        match self.registry.validate(&config).await {
            Ok(()) => {
                info!(config_id = %id, "Secret manager connectivity check succeeded");
                ConnectivityResult::Success
            }
            Err(e) => {
                warn!(config_id = %id, error = %e, "Secret manager connectivity check failed");
                ConnectivityResult::failure(e.to_string())
            }
        }
    }

    /// Sealed config at the head of the fallback chain
    async fn resolve_global(&self, tenant_id: &TenantId) -> Result<SecretManagerConfig> {
        if let Some(config) = self.store.find_default(tenant_id).await? {
            return Ok(config);
        }
        if self.local_encryption.is_enabled(tenant_id) {
            return Ok(SecretManagerConfig::local_fallback(tenant_id));
        }
        if !tenant_id.is_global() {
            if let Some(config) = self.store.find_default(&TenantId::global()).await? {
                return Ok(config);
            }
        }
        Err(KeywardError::invalid_request(format!(
            "No global secret manager is configured for tenant '{}'",
            tenant_id
        )))
    }

    /// The secret manager used when a secret names none.
    ///
    /// Resolution order: the tenant's own default, the LOCAL fallback when
    /// the tenant has local encryption enabled, the platform-wide default.
    #[instrument(skip(self), fields(tenant_id = %tenant_id), name = "get_global_secret_manager")]
    pub async fn get_global_secret_manager(
        &self,
        tenant_id: &TenantId,
    ) -> Result<SecretManagerConfig> {
        Ok(self.resolve_global(tenant_id).await?.masked())
    }

    /// Global secret manager with plaintext credentials
    pub async fn global_for_use(&self, tenant_id: &TenantId) -> Result<SecretManagerConfig> {
        let config = self.resolve_global(tenant_id).await?;
        self.unseal(&config)
    }

    /// Secret engines reachable with a candidate (unsaved) connection
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, encryption_type = %request.encryption_type), name = "get_secret_manager_metadata")]
    pub async fn get_metadata(
        &self,
        tenant_id: &TenantId,
        request: &NewSecretManagerConfig,
    ) -> Result<Vec<SecretEngine>> {
        let encryption_type = self.supported_type(&request.encryption_type)?;
        request.connection.validate()?;
        let candidate = Self::candidate(tenant_id, request, encryption_type);
        self.registry.list_engines(&candidate).await
    }
}
