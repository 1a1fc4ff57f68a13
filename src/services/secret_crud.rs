//! Secret CRUD service
//!
//! Creates, updates, deletes and lists secrets, dispatching every value
//! operation to the backend of the owning secret manager.
//!
//! ## Remote ordering
//!
//! Remote state is written before the local record and removed after it.
//! A rename on a path-keyed backend writes the new path, saves the record,
//! then deletes the old path, so a failure in between leaves an orphan
//! rather than a record pointing at nothing.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::audit::{describe_changes, emit, AuditAction, AuditEvent, AuditSink, TracingAuditSink};
use super::secret_manager_config::SecretManagerConfigService;
use crate::backends::{parse_reference, BackendRegistry};
use crate::domain::{
    validate_secret_name, DeleteOutcome, EncryptableEntity, EncryptedDataDetail, EncryptedRecord,
    NewSecret, Page, PageRequest, ParentReference, Scope, SecretBytes, SecretFilter, SecretId,
    SecretKind, SecretManagerConfig, SecretManagerId, SecretPayload, SecretRecord, SecretUpdate,
    SecretValue, TenantId, UsageRestrictions,
};
use crate::errors::{KeywardError, Result};
use crate::storage::SecretRecordStore;

const RESOURCE: &str = "secret";

/// Name under which a secret is stored in its backend.
///
/// Scope-qualified so equal names in sibling scopes never share a path.
pub fn backend_name(scope: &Scope, name: &str) -> String {
    match (&scope.org, &scope.project) {
        (Some(org), Some(project)) => format!("{}/{}/{}", org, project, name),
        (Some(org), None) => format!("{}/{}", org, name),
        _ => name.to_string(),
    }
}

/// Scopes searched when resolving a secret from `scope`, innermost first
fn scope_chain(scope: &Scope) -> Vec<Scope> {
    let mut chain = vec![scope.clone()];
    if scope.project.is_some() {
        if let Some(org) = &scope.org {
            chain.push(Scope::org(org.clone()));
        }
    }
    if !scope.is_account() {
        chain.push(Scope::account());
    }
    chain
}

/// Remote writes of an update that still need settling once the record is saved
struct PendingRemote {
    config: SecretManagerConfig,
    /// Written by this update; removed again if the save fails
    created: Option<EncryptedRecord>,
    /// Replaced by this update; removed once the save succeeds
    superseded: Option<EncryptedRecord>,
}

/// Service for secret text and file records
pub struct SecretCrudService {
    secrets: Arc<dyn SecretRecordStore>,
    configs: Arc<SecretManagerConfigService>,
    audit: Arc<dyn AuditSink>,
}

impl SecretCrudService {
    pub fn new(
        secrets: Arc<dyn SecretRecordStore>,
        configs: Arc<SecretManagerConfigService>,
    ) -> Self {
        Self { secrets, configs, audit: Arc::new(TracingAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    fn registry(&self) -> &BackendRegistry {
        self.configs.registry()
    }

    /// Whether a caller in `caller` may resolve the secret
    pub fn can_resolve(record: &SecretRecord, caller: &Scope) -> bool {
        record.scope.contains(caller) && record.usage_restrictions.permits(caller)
    }

    /// Owning config with plaintext credentials. A missing config or a
    /// type mismatch is a broken invariant, not a user error.
    async fn owning_config(
        &self,
        tenant_id: &TenantId,
        record: &SecretRecord,
    ) -> Result<SecretManagerConfig> {
        let config = self
            .configs
            .get(tenant_id, &record.secret_manager_id, true)
            .await?
            .ok_or_else(|| {
                KeywardError::internal(format!(
                    "Secret '{}' belongs to missing secret manager '{}'",
                    record.id, record.secret_manager_id
                ))
            })?;
        if config.encryption_type != record.encryption_type {
            return Err(KeywardError::internal(format!(
                "Secret '{}' has encryption type {} but its secret manager is {}",
                record.id, record.encryption_type, config.encryption_type
            )));
        }
        Ok(config)
    }

    async fn load(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
    ) -> Result<SecretRecord> {
        self.secrets.get(tenant_id, scope, id).await?.ok_or_else(|| {
            KeywardError::invalid_request(format!("Secret '{}' does not exist in {}", id, scope))
        })
    }

    /// Prove a reference is well-formed and readable through the backend
    async fn check_reference(
        &self,
        tenant_id: &TenantId,
        path: &str,
        config: &SecretManagerConfig,
    ) -> Result<()> {
        if !config.encryption_type.supports_references() {
            return Err(KeywardError::unsupported(format!(
                "{} does not support referenced secrets",
                config.encryption_type
            )));
        }
        parse_reference(config.encryption_type, path)?;
        self.registry().resolve_reference(tenant_id, path, config).await?;
        Ok(())
    }

    /// Best-effort removal of remote state that no record points at
    async fn discard_remote(
        &self,
        tenant_id: &TenantId,
        record: &EncryptedRecord,
        config: &SecretManagerConfig,
    ) {
        if let Err(e) = self.registry().delete(tenant_id, record, config).await {
            warn!(
                error = %e,
                record_kind = record.kind(),
                config_id = %config.id,
                "Failed to remove orphaned remote secret"
            );
        }
    }

    /// Create a secret
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, scope = %request.scope, secret_name = %request.name), name = "create_secret")]
    pub async fn create(&self, tenant_id: &TenantId, request: NewSecret) -> Result<SecretRecord> {
        validate_secret_name(&request.name)?;
        request.scope.validate()?;
        request.usage_restrictions.validate()?;

        if request.value.is_unchanged_marker() {
            return Err(KeywardError::validation_field("Secret value must not be empty", "value"));
        }
        if request.kind == SecretKind::File && matches!(request.value, SecretValue::Reference(_)) {
            return Err(KeywardError::validation_field(
                "Secret files cannot reference an existing path",
                "value",
            ));
        }

        let config = match &request.secret_manager_id {
            Some(id) => self.configs.resolve_for_use(tenant_id, id).await?,
            None => self.configs.global_for_use(tenant_id).await?,
        };

        if self.secrets.find_by_name(tenant_id, &request.scope, &request.name).await?.is_some() {
            return Err(KeywardError::duplicate(RESOURCE, "name", request.name));
        }

        let payload = match request.value {
            SecretValue::Reference(path) => {
                self.check_reference(tenant_id, &path, &config).await?;
                SecretPayload::Reference { path }
            }
            SecretValue::Inline(value) => {
                let name = backend_name(&request.scope, &request.name);
                let record = self.registry().encrypt(tenant_id, &name, &value, &config).await?;
                SecretPayload::Inline { record }
            }
        };

        let now = Utc::now();
        let record = SecretRecord {
            id: SecretId::new(),
            tenant_id: tenant_id.clone(),
            scope: request.scope,
            name: request.name,
            description: request.description,
            kind: request.kind,
            encryption_type: config.encryption_type,
            secret_manager_id: config.id.clone(),
            payload,
            parents: Default::default(),
            usage_restrictions: request.usage_restrictions,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let saved = match self.secrets.save(&record).await {
            Ok(saved) => saved,
            Err(e) => {
                if let SecretPayload::Inline { record: written } = &record.payload {
                    self.discard_remote(tenant_id, written, &config).await;
                }
                return Err(e);
            }
        };

        info!(
            secret_id = %saved.id,
            secret_name = %saved.name,
            encryption_type = %saved.encryption_type,
            reference = saved.payload.is_reference(),
            "Secret created"
        );
        emit(self.audit.as_ref(), AuditEvent::secret(AuditAction::Create, &saved)).await;

        Ok(saved)
    }

    /// Work out the new payload and the remote writes it needs
    async fn apply_value_change(
        &self,
        tenant_id: &TenantId,
        existing: &SecretRecord,
        next: &mut SecretRecord,
        value: Option<SecretValue>,
    ) -> Result<Option<PendingRemote>> {
        let renamed = next.name != existing.name;
        if value.is_none() && !(renamed && existing.encryption_type.is_path_keyed()) {
            return Ok(None);
        }

        let config = self.owning_config(tenant_id, existing).await?;
        let name = backend_name(&next.scope, &next.name);

        match (&existing.payload, value) {
            (SecretPayload::Reference { .. }, Some(SecretValue::Reference(path))) => {
                self.check_reference(tenant_id, &path, &config).await?;
                next.payload = SecretPayload::Reference { path };
                Ok(None)
            }
            (SecretPayload::Reference { .. }, None) => Ok(None),
            (SecretPayload::Inline { record: old }, value) => {
                let value = match value {
                    Some(SecretValue::Inline(value)) => Some(value),
                    None => None,
                    Some(SecretValue::Reference(_)) => return Err(mode_mismatch()),
                };

                if renamed && existing.encryption_type.is_path_keyed() {
                    let plaintext = match value {
                        Some(value) => value,
                        None => self.registry().decrypt(tenant_id, old, &config).await?,
                    };
                    let created =
                        self.registry().encrypt(tenant_id, &name, &plaintext, &config).await?;
                    next.payload = SecretPayload::Inline { record: created.clone() };
                    let superseded = (created != *old).then(|| old.clone());
                    return Ok(Some(PendingRemote {
                        config,
                        created: Some(created),
                        superseded,
                    }));
                }

                if let Some(value) = value {
                    let record =
                        self.registry().update(tenant_id, &name, &value, old, &config).await?;
                    next.payload = SecretPayload::Inline { record };
                }
                Ok(None)
            }
            (SecretPayload::Reference { .. }, Some(SecretValue::Inline(_))) => {
                Err(mode_mismatch())
            }
        }
    }

    /// Update a secret and return the stored record
    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, scope = %scope, secret_id = %id), name = "update_secret")]
    pub async fn update(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        update: SecretUpdate,
    ) -> Result<SecretRecord> {
        let existing = self.load(tenant_id, scope, id).await?;
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

        if let Some(name) = update.name.filter(|n| *n != existing.name) {
            validate_secret_name(&name)?;
            if let Some(other) = self.secrets.find_by_name(tenant_id, scope, &name).await? {
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

        if let Some(restrictions) =
            update.usage_restrictions.filter(|r| *r != existing.usage_restrictions)
        {
            restrictions.validate()?;
            next.usage_restrictions = restrictions;
            changed.push("usage restrictions");
        }

        let value = update.value.filter(|v| !v.is_unchanged_marker());
        if value.is_some() {
            changed.push("value");
        }
        let pending = self.apply_value_change(tenant_id, &existing, &mut next, value).await?;

        next.updated_at = Utc::now();
        let saved = match self.secrets.save(&next).await {
            Ok(saved) => saved,
            Err(e) => {
                if let Some(PendingRemote { config, created: Some(created), .. }) = &pending {
                    self.discard_remote(tenant_id, created, config).await;
                }
                return Err(e);
            }
        };
        if let Some(PendingRemote { config, superseded: Some(old), .. }) = &pending {
            debug!(secret_id = %id, "Removing superseded remote secret");
            self.discard_remote(tenant_id, old, config).await;
        }

        info!(secret_id = %saved.id, version = saved.version, changed = ?changed, "Secret updated");
        let event = AuditEvent::secret(AuditAction::Update, &saved)
            .with_description(describe_changes(&changed));
        emit(self.audit.as_ref(), event).await;

        Ok(saved)
    }

    /// Replace only the usage restrictions
    pub async fn update_usage_restrictions(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        restrictions: UsageRestrictions,
    ) -> Result<SecretRecord> {
        let update =
            SecretUpdate { usage_restrictions: Some(restrictions), ..Default::default() };
        self.update(tenant_id, scope, id, update).await
    }

    /// Delete a secret. Parents block the delete unless `force` is set.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, scope = %scope, secret_id = %id), name = "delete_secret")]
    pub async fn delete(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        force: bool,
    ) -> Result<DeleteOutcome> {
        let Some(existing) = self.secrets.get(tenant_id, scope, id).await? else {
            return Ok(DeleteOutcome::NotFound);
        };

        if !existing.parents.is_empty() {
            if !force {
                return Err(KeywardError::references_exist(
                    RESOURCE,
                    id.as_str(),
                    existing.parents.len() as u64,
                    "entities",
                ));
            }
            warn!(
                secret_id = %id,
                parents = existing.parents.len(),
                "Force deleting secret in use"
            );
        }

        // Referenced values belong to whoever wrote them
        if let SecretPayload::Inline { record } = &existing.payload {
            match self.configs.get(tenant_id, &existing.secret_manager_id, true).await? {
                Some(config) => self.registry().delete(tenant_id, record, &config).await?,
                None => warn!(
                    secret_id = %id,
                    config_id = %existing.secret_manager_id,
                    "Secret manager is gone; skipping remote delete"
                ),
            }
        }

        if !self.secrets.delete(tenant_id, scope, id).await? {
            return Ok(DeleteOutcome::NotFound);
        }

        info!(secret_id = %id, secret_name = %existing.name, "Secret deleted");
        emit(self.audit.as_ref(), AuditEvent::secret(AuditAction::Delete, &existing)).await;

        Ok(DeleteOutcome::Deleted)
    }

    /// Record without any plaintext
    pub async fn get(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
    ) -> Result<Option<SecretRecord>> {
        self.secrets.get(tenant_id, scope, id).await
    }

    /// Record with this name in exactly `scope`, ignoring case
    pub async fn get_by_name(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<SecretRecord>> {
        self.secrets.find_by_name(tenant_id, scope, name).await
    }

    /// Account-level secret by name, only when no usage restriction applies
    pub async fn get_unrestricted_by_name(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Option<SecretRecord>> {
        let found = self.secrets.find_by_name(tenant_id, &Scope::account(), name).await?;
        Ok(found.filter(|r| r.usage_restrictions == UsageRestrictions::default()))
    }

    /// Create each secret in turn and return the ids that were created.
    ///
    /// A failing entry is logged and skipped; it never aborts the batch.
    #[instrument(skip(self, requests), fields(tenant_id = %tenant_id, count = requests.len()), name = "import_secrets")]
    pub async fn import_secrets(
        &self,
        tenant_id: &TenantId,
        requests: Vec<NewSecret>,
    ) -> Vec<SecretId> {
        let mut imported = Vec::with_capacity(requests.len());
        for request in requests {
            let name = request.name.clone();
            match self.create(tenant_id, request).await {
                Ok(saved) => {
                    info!(secret_id = %saved.id, secret_name = %name, "Imported secret");
                    imported.push(saved.id);
                }
                Err(e) => warn!(secret_name = %name, error = %e, "Failed to import secret"),
            }
        }
        imported
    }

    /// Plaintext value, decrypted or resolved through the owning backend
    #[instrument(skip(self), fields(tenant_id = %tenant_id, scope = %scope, secret_id = %id), name = "decrypt_secret")]
    pub async fn get_decrypted_value(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
    ) -> Result<SecretBytes> {
        let record = self.load(tenant_id, scope, id).await?;
        let config = self.owning_config(tenant_id, &record).await?;
        match &record.payload {
            SecretPayload::Inline { record: encrypted } => {
                self.registry().decrypt(tenant_id, encrypted, &config).await
            }
            SecretPayload::Reference { path } => {
                self.registry().resolve_reference(tenant_id, path, &config).await
            }
        }
    }

    /// Filtered page, newest change first with ties broken by id
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), name = "list_secrets")]
    pub async fn list(
        &self,
        tenant_id: &TenantId,
        filter: &SecretFilter,
        page: PageRequest,
    ) -> Result<Page<SecretRecord>> {
        let mut records = self.secrets.list(tenant_id, filter).await?;
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(Page::from_sorted(records, page))
    }

    /// Secret visible from `scope`, searching the scope then its ancestors
    async fn find_visible(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
    ) -> Result<Option<SecretRecord>> {
        for candidate in scope_chain(scope) {
            if let Some(record) = self.secrets.get(tenant_id, &candidate, id).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Decryption instructions for every set encrypted field of `entity`.
    ///
    /// When `usage_context` names the consuming activity, a usage event is
    /// emitted per resolved secret.
    #[instrument(skip(self, entity), fields(tenant_id = %tenant_id, entity_type = entity.entity_type(), entity_id = entity.entity_id()), name = "get_encryption_details")]
    pub async fn get_encryption_details(
        &self,
        tenant_id: &TenantId,
        entity: &dyn EncryptableEntity,
        usage_context: Option<&str>,
    ) -> Result<Vec<EncryptedDataDetail>> {
        let mut details = Vec::new();

        for field in entity.encrypted_fields() {
            let Some(secret_id) = field.secret_id else {
                continue;
            };

            let record =
                self.find_visible(tenant_id, entity.scope(), &secret_id).await?.ok_or_else(|| {
                    KeywardError::invalid_request(format!(
                        "Secret '{}' used by field '{}' does not exist",
                        secret_id, field.field_name
                    ))
                })?;
            if !Self::can_resolve(&record, entity.scope()) {
                return Err(KeywardError::invalid_request(format!(
                    "Secret '{}' may not be used from {}",
                    record.name,
                    entity.scope()
                )));
            }

            let config = self.owning_config(tenant_id, &record).await?;
            if let Some(context) = usage_context {
                let event = AuditEvent::secret(AuditAction::Usage, &record).with_metadata(json!({
                    "entity_type": entity.entity_type(),
                    "entity_id": entity.entity_id(),
                    "field": field.field_name,
                    "context": context,
                }));
                emit(self.audit.as_ref(), event).await;
            }

            details.push(EncryptedDataDetail {
                field_name: field.field_name,
                secret_id: record.id,
                secret_name: record.name,
                encryption_type: record.encryption_type,
                payload: record.payload,
                secret_manager: config,
            });
        }

        Ok(details)
    }

    pub async fn add_parent_reference(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        parent: ParentReference,
    ) -> Result<SecretRecord> {
        let record = self
            .secrets
            .add_parent_reference(tenant_id, scope, id, &parent)
            .await?
            .ok_or_else(|| {
                KeywardError::invalid_request(format!(
                    "Secret '{}' does not exist in {}",
                    id, scope
                ))
            })?;
        debug!(secret_id = %id, parent = %parent, "Secret usage added");
        Ok(record)
    }

    pub async fn remove_parent_reference(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        parent: ParentReference,
    ) -> Result<SecretRecord> {
        let record = self
            .secrets
            .remove_parent_reference(tenant_id, scope, id, &parent)
            .await?
            .ok_or_else(|| {
                KeywardError::invalid_request(format!(
                    "Secret '{}' does not exist in {}",
                    id, scope
                ))
            })?;
        debug!(secret_id = %id, parent = %parent, "Secret usage removed");
        Ok(record)
    }

    /// Entities that currently depend on the secret
    pub async fn get_usage(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
    ) -> Result<Vec<ParentReference>> {
        Ok(self.load(tenant_id, scope, id).await?.parents.into_iter().collect())
    }

    /// Move every inline secret of `from` into `to`; returns how many moved.
    ///
    /// Referenced secrets point into `from`'s store and are left alone.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, from = %from, to = %to), name = "transition_secrets")]
    pub async fn transition_secrets(
        &self,
        tenant_id: &TenantId,
        from: &SecretManagerId,
        to: &SecretManagerId,
    ) -> Result<usize> {
        if from == to {
            return Ok(0);
        }
        let source = self.configs.resolve_for_use(tenant_id, from).await?;
        let target = self.configs.resolve_for_use(tenant_id, to).await?;

        let mut moved = 0;
        for record in self.secrets.list_by_secret_manager(tenant_id, from).await? {
            let SecretPayload::Inline { record: old } = &record.payload else {
                warn!(secret_id = %record.id, "Skipping referenced secret during transition");
                continue;
            };

            let plaintext = self.registry().decrypt(tenant_id, old, &source).await?;
            let name = backend_name(&record.scope, &record.name);
            let created = self.registry().encrypt(tenant_id, &name, &plaintext, &target).await?;

            let mut next = record.clone();
            next.payload = SecretPayload::Inline { record: created.clone() };
            next.encryption_type = target.encryption_type;
            next.secret_manager_id = target.id.clone();
            next.updated_at = Utc::now();

            let saved = match self.secrets.save(&next).await {
                Ok(saved) => saved,
                Err(e) => {
                    self.discard_remote(tenant_id, &created, &target).await;
                    return Err(e);
                }
            };
            if created != *old {
                self.discard_remote(tenant_id, old, &source).await;
            }

            let event = AuditEvent::secret(AuditAction::Migrate, &saved).with_metadata(json!({
                "from": from.as_str(),
                "to": to.as_str(),
            }));
            emit(self.audit.as_ref(), event).await;
            moved += 1;
        }

        info!(moved, "Secrets transitioned to new secret manager");
        Ok(moved)
    }
}

fn mode_mismatch() -> KeywardError {
    KeywardError::validation_field(
        "A secret cannot switch between an inline value and a reference",
        "value",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::LocalBackend;
    use crate::config::{EncryptionConfig, LocalEncryptionConfig};
    use crate::domain::{EncryptedFieldRef, EncryptionType, SECRET_MASK};
    use crate::services::SecretCipher;
    use crate::storage::{InMemoryConfigStore, InMemorySecretStore};

    fn service() -> (SecretCrudService, TenantId) {
        let cipher = Arc::new(SecretCipher::new(&EncryptionConfig::for_testing()).unwrap());
        let local = Arc::new(LocalBackend::new(cipher));
        let registry = Arc::new(BackendRegistry::default().with_backend(local.clone()));
        let secrets = Arc::new(InMemorySecretStore::new());
        let configs = SecretManagerConfigService::new(
            Arc::new(InMemoryConfigStore::new()),
            secrets.clone(),
            registry,
            local,
        )
        .with_local_encryption(LocalEncryptionConfig {
            enabled_for_all: true,
            ..Default::default()
        });
        (SecretCrudService::new(secrets, Arc::new(configs)), TenantId::new("acct").unwrap())
    }

    struct Connector {
        scope: Scope,
        token: Option<SecretId>,
    }

    impl EncryptableEntity for Connector {
        fn entity_type(&self) -> &str {
            "connector"
        }

        fn entity_id(&self) -> &str {
            "github"
        }

        fn scope(&self) -> &Scope {
            &self.scope
        }

        fn encrypted_fields(&self) -> Vec<EncryptedFieldRef> {
            vec![EncryptedFieldRef::new("token", self.token.clone())]
        }
    }

    #[test]
    fn test_backend_name_is_scope_qualified() {
        assert_eq!(backend_name(&Scope::account(), "s1"), "s1");
        assert_eq!(backend_name(&Scope::org("o1"), "s1"), "o1/s1");
        assert_eq!(backend_name(&Scope::project("o1", "p1"), "s1"), "o1/p1/s1");
    }

    #[test]
    fn test_scope_chain() {
        let chain = scope_chain(&Scope::project("o1", "p1"));
        assert_eq!(chain, vec![Scope::project("o1", "p1"), Scope::org("o1"), Scope::account()]);
        assert_eq!(scope_chain(&Scope::account()), vec![Scope::account()]);
    }

    #[tokio::test]
    async fn test_create_uses_local_fallback_and_roundtrips() {
        let (service, tenant) = service();
        let created =
            service.create(&tenant, NewSecret::text(Scope::account(), "s1", "v1")).await.unwrap();

        assert_eq!(created.secret_manager_id, SecretManagerId::local_fallback(&tenant));
        assert_eq!(created.version, 1);
        let value =
            service.get_decrypted_value(&tenant, &Scope::account(), &created.id).await.unwrap();
        assert_eq!(value.expose_secret(), b"v1");
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_bad_input() {
        let (service, tenant) = service();
        service.create(&tenant, NewSecret::text(Scope::account(), "s1", "v1")).await.unwrap();

        let dup = service.create(&tenant, NewSecret::text(Scope::account(), "S1", "v2")).await;
        assert!(matches!(dup, Err(KeywardError::DuplicateField { .. })));

        // Same name in another scope is fine
        service.create(&tenant, NewSecret::text(Scope::org("o1"), "s1", "v2")).await.unwrap();

        let bad_name =
            service.create(&tenant, NewSecret::text(Scope::account(), "a/b", "v")).await;
        assert!(matches!(bad_name, Err(KeywardError::Validation { .. })));

        let empty = service.create(&tenant, NewSecret::text(Scope::account(), "s2", "")).await;
        assert!(matches!(empty, Err(KeywardError::Validation { .. })));

        let mut reference = NewSecret::text(Scope::account(), "s3", "x");
        reference.value = SecretValue::Reference("/a/b#c".into());
        let unsupported = service.create(&tenant, reference).await;
        assert!(matches!(unsupported, Err(KeywardError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_update_value_and_describe_changes() {
        let (service, tenant) = service();
        let scope = Scope::account();
        let created =
            service.create(&tenant, NewSecret::text(scope.clone(), "s1", "v1")).await.unwrap();

        let update = SecretUpdate {
            name: Some("s2".into()),
            value: Some(SecretValue::Inline(SecretBytes::from("v2"))),
            expected_version: Some(created.version),
            ..Default::default()
        };
        let updated = service.update(&tenant, &scope, &created.id, update).await.unwrap();
        assert_eq!(updated.name, "s2");
        assert_eq!(updated.version, 2);

        let value = service.get_decrypted_value(&tenant, &scope, &created.id).await.unwrap();
        assert_eq!(value.expose_secret(), b"v2");

        let stale = SecretUpdate {
            description: Some("late".into()),
            expected_version: Some(1),
            ..Default::default()
        };
        let err = service.update(&tenant, &scope, &created.id, stale).await.unwrap_err();
        assert!(matches!(err, KeywardError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn test_masked_value_keeps_stored_payload() {
        let (service, tenant) = service();
        let scope = Scope::account();
        let created =
            service.create(&tenant, NewSecret::text(scope.clone(), "s1", "v1")).await.unwrap();

        let update = SecretUpdate {
            value: Some(SecretValue::Inline(SecretBytes::from(SECRET_MASK))),
            ..Default::default()
        };
        let updated = service.update(&tenant, &scope, &created.id, update).await.unwrap();
        assert_eq!(updated.payload, created.payload);
    }

    #[tokio::test]
    async fn test_delete_guarded_by_parents() {
        let (service, tenant) = service();
        let scope = Scope::account();
        let created =
            service.create(&tenant, NewSecret::text(scope.clone(), "s1", "v1")).await.unwrap();
        let parent = ParentReference::new("service_variable", "var-1");
        service.add_parent_reference(&tenant, &scope, &created.id, parent.clone()).await.unwrap();
        assert_eq!(service.get_usage(&tenant, &scope, &created.id).await.unwrap(), vec![parent]);

        let err = service.delete(&tenant, &scope, &created.id, false).await.unwrap_err();
        assert!(matches!(err, KeywardError::ReferencesExist { count: 1, .. }));

        let outcome = service.delete(&tenant, &scope, &created.id, true).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        let again = service.delete(&tenant, &scope, &created.id, false).await.unwrap();
        assert_eq!(again, DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let (service, tenant) = service();
        for name in ["a", "b", "c"] {
            service.create(&tenant, NewSecret::text(Scope::account(), name, "v")).await.unwrap();
        }
        let filter = SecretFilter::default();
        let first = service.list(&tenant, &filter, PageRequest::new(0, 2)).await.unwrap();
        let second = service.list(&tenant, &filter, PageRequest::new(1, 2)).await.unwrap();

        assert_eq!(first.total, 3);
        assert_eq!(first.items.len(), 2);
        assert_eq!(second.items.len(), 1);
        assert!(first.items[0].updated_at >= first.items[1].updated_at);
        assert!(first.items[1].updated_at >= second.items[0].updated_at);
    }

    #[tokio::test]
    async fn test_encryption_details_walks_up_scopes() {
        let (service, tenant) = service();
        let created =
            service.create(&tenant, NewSecret::text(Scope::org("o1"), "token", "t")).await.unwrap();

        let connector =
            Connector { scope: Scope::project("o1", "p1"), token: Some(created.id.clone()) };
        let details =
            service.get_encryption_details(&tenant, &connector, Some("build-42")).await.unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].secret_name, "token");
        assert_eq!(details[0].secret_manager.encryption_type, EncryptionType::Local);

        let elsewhere = Connector { scope: Scope::project("o2", "p1"), token: Some(created.id) };
        assert!(service.get_encryption_details(&tenant, &elsewhere, None).await.is_err());

        let unset = Connector { scope: Scope::account(), token: None };
        assert!(service.get_encryption_details(&tenant, &unset, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_usage_restrictions_gate_resolution() {
        let (service, tenant) = service();
        let created =
            service.create(&tenant, NewSecret::text(Scope::account(), "s1", "v")).await.unwrap();
        let restricted = service
            .update_usage_restrictions(
                &tenant,
                &Scope::account(),
                &created.id,
                UsageRestrictions { scoped_to_account: true, allowed_scopes: vec![] },
            )
            .await
            .unwrap();

        assert!(SecretCrudService::can_resolve(&restricted, &Scope::account()));
        assert!(!SecretCrudService::can_resolve(&restricted, &Scope::org("o1")));
    }

    #[tokio::test]
    async fn test_get_by_name() {
        let (service, tenant) = service();
        let scope = Scope::org("o1");
        let created =
            service.create(&tenant, NewSecret::text(scope.clone(), "Db-Pass", "v")).await.unwrap();

        let found = service.get_by_name(&tenant, &scope, "db-pass").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        let elsewhere = service.get_by_name(&tenant, &Scope::account(), "db-pass").await.unwrap();
        assert!(elsewhere.is_none());
        assert!(service.get_unrestricted_by_name(&tenant, "db-pass").await.unwrap().is_none());

        let open =
            service.create(&tenant, NewSecret::text(Scope::account(), "open", "v")).await.unwrap();
        let hit = service.get_unrestricted_by_name(&tenant, "OPEN").await.unwrap().unwrap();
        assert_eq!(hit.id, open.id);

        let restrictions = UsageRestrictions { scoped_to_account: true, allowed_scopes: vec![] };
        service
            .update_usage_restrictions(&tenant, &Scope::account(), &open.id, restrictions)
            .await
            .unwrap();
        assert!(service.get_unrestricted_by_name(&tenant, "open").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_import_skips_failing_entries() {
        let (service, tenant) = service();
        let scope = Scope::account();
        let requests = vec![
            NewSecret::text(scope.clone(), "first", "1"),
            NewSecret::text(scope.clone(), "bad/name", "2"),
            NewSecret::text(scope.clone(), "FIRST", "3"),
            NewSecret::text(scope.clone(), "second", "4"),
        ];

        let imported = service.import_secrets(&tenant, requests).await;
        assert_eq!(imported.len(), 2);

        let second = service.get_by_name(&tenant, &scope, "second").await.unwrap().unwrap();
        assert_eq!(imported[1], second.id);
        let value = service.get_decrypted_value(&tenant, &scope, &second.id).await.unwrap();
        assert_eq!(value.expose_secret(), b"4");
    }
}
