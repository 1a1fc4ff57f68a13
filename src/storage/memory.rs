//! In-process stores
//!
//! The tenant is the outer map key, so a lookup can only ever see rows of the
//! tenant it was asked about.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::instrument;

use super::{SecretManagerConfigStore, SecretRecordStore};
use crate::domain::{
    ParentReference, Scope, SecretFilter, SecretId, SecretManagerConfig, SecretManagerId,
    SecretRecord, TenantId,
};
use crate::errors::{KeywardError, Result};

/// Version the next save should carry, or the compare-and-swap failure
fn next_version(
    resource_type: &str,
    id: &str,
    stored: Option<i64>,
    submitted: i64,
) -> Result<i64> {
    match stored {
        None if submitted == 0 => Ok(1),
        None => Err(KeywardError::invalid_request(format!(
            "{} '{}' does not exist",
            resource_type, id
        ))),
        Some(_) if submitted == 0 => Err(KeywardError::duplicate(resource_type, "id", id)),
        Some(actual) if actual != submitted => {
            Err(KeywardError::version_conflict(resource_type, id, submitted, actual))
        }
        Some(actual) => Ok(actual + 1),
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

type Tenanted<K, V> = RwLock<HashMap<TenantId, HashMap<K, V>>>;

#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configs: Tenanted<SecretManagerId, SecretManagerConfig>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretManagerConfigStore for InMemoryConfigStore {
    #[instrument(skip(self, config), fields(tenant_id = %config.tenant_id, config_id = %config.id), name = "mem_save_config")]
    async fn save(&self, config: &SecretManagerConfig) -> Result<SecretManagerConfig> {
        let mut guard = self.configs.write().await;
        let tenant = guard.entry(config.tenant_id.clone()).or_default();

        let clash = tenant.values().any(|c| {
            !c.deleted && !config.deleted && c.id != config.id && same_name(&c.name, &config.name)
        });
        if clash {
            return Err(KeywardError::duplicate("SecretManagerConfig", "name", &config.name));
        }

        let stored_version = tenant.get(&config.id).map(|c| c.version);
        let version = next_version(
            "SecretManagerConfig",
            config.id.as_str(),
            stored_version,
            config.version,
        )?;

        if config.is_default && !config.deleted {
            let others = tenant
                .values_mut()
                .filter(|c| !c.deleted && c.is_default && c.id != config.id);
            for other in others {
                other.is_default = false;
                other.version += 1;
                other.updated_at = chrono::Utc::now();
            }
        }

        let mut stored = config.without_plaintext();
        stored.version = version;
        tenant.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &SecretManagerId,
    ) -> Result<Option<SecretManagerConfig>> {
        let guard = self.configs.read().await;
        Ok(guard.get(tenant_id).and_then(|t| t.get(id)).cloned())
    }

    async fn find_by_name(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Option<SecretManagerConfig>> {
        let guard = self.configs.read().await;
        Ok(guard
            .get(tenant_id)
            .and_then(|t| t.values().find(|c| !c.deleted && same_name(&c.name, name)))
            .cloned())
    }

    async fn find_default(&self, tenant_id: &TenantId) -> Result<Option<SecretManagerConfig>> {
        let guard = self.configs.read().await;
        Ok(guard
            .get(tenant_id)
            .and_then(|t| {
                t.values().filter(|c| !c.deleted && c.is_default).min_by_key(|c| c.created_at)
            })
            .cloned())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        include_global: bool,
    ) -> Result<Vec<SecretManagerConfig>> {
        let guard = self.configs.read().await;
        let global = TenantId::global();

        let mut tenants = vec![tenant_id];
        if include_global && !tenant_id.is_global() {
            tenants.push(&global);
        }

        let mut configs: Vec<SecretManagerConfig> = tenants
            .into_iter()
            .filter_map(|t| guard.get(t))
            .flat_map(|t| t.values().filter(|c| !c.deleted).cloned())
            .collect();
        configs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(configs)
    }

    async fn soft_delete(&self, tenant_id: &TenantId, id: &SecretManagerId) -> Result<bool> {
        let mut guard = self.configs.write().await;
        match guard.get_mut(tenant_id).and_then(|t| t.get_mut(id)) {
            Some(config) if !config.deleted => {
                config.deleted = true;
                config.is_default = false;
                config.version += 1;
                config.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hard_delete(&self, tenant_id: &TenantId, id: &SecretManagerId) -> Result<bool> {
        let mut guard = self.configs.write().await;
        Ok(guard.get_mut(tenant_id).and_then(|t| t.remove(id)).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: Tenanted<SecretId, SecretRecord>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify_parents<F>(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        change: F,
    ) -> Result<Option<SecretRecord>>
    where
        F: FnOnce(&mut SecretRecord) + Send,
    {
        let mut guard = self.secrets.write().await;
        let record = guard
            .get_mut(tenant_id)
            .and_then(|t| t.get_mut(id))
            .filter(|r| &r.scope == scope);

        Ok(record.map(|r| {
            change(r);
            r.clone()
        }))
    }
}

#[async_trait]
impl SecretRecordStore for InMemorySecretStore {
    #[instrument(skip(self, record), fields(tenant_id = %record.tenant_id, secret_id = %record.id), name = "mem_save_secret")]
    async fn save(&self, record: &SecretRecord) -> Result<SecretRecord> {
        let mut guard = self.secrets.write().await;
        let tenant = guard.entry(record.tenant_id.clone()).or_default();

        let clash = tenant.values().any(|r| {
            r.id != record.id && r.scope == record.scope && same_name(&r.name, &record.name)
        });
        if clash {
            return Err(KeywardError::duplicate("Secret", "name", &record.name));
        }

        let existing = tenant.get(&record.id);
        let version = next_version(
            "Secret",
            record.id.as_str(),
            existing.map(|r| r.version),
            record.version,
        )?;

        // Parents are owned by add/remove_parent_reference
        let mut stored = record.clone();
        if let Some(existing) = existing {
            stored.parents = existing.parents.clone();
        }
        stored.version = version;
        tenant.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
    ) -> Result<Option<SecretRecord>> {
        let guard = self.secrets.read().await;
        Ok(guard.get(tenant_id).and_then(|t| t.get(id)).filter(|r| &r.scope == scope).cloned())
    }

    async fn find_by_name(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<SecretRecord>> {
        let guard = self.secrets.read().await;
        Ok(guard
            .get(tenant_id)
            .and_then(|t| t.values().find(|r| &r.scope == scope && same_name(&r.name, name)))
            .cloned())
    }

    async fn delete(&self, tenant_id: &TenantId, scope: &Scope, id: &SecretId) -> Result<bool> {
        let mut guard = self.secrets.write().await;
        let Some(tenant) = guard.get_mut(tenant_id) else {
            return Ok(false);
        };
        if tenant.get(id).is_some_and(|r| &r.scope == scope) {
            tenant.remove(id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn add_parent_reference(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        parent: &ParentReference,
    ) -> Result<Option<SecretRecord>> {
        let parent = parent.clone();
        self.modify_parents(tenant_id, scope, id, move |r| {
            r.parents.insert(parent);
        })
        .await
    }

    async fn remove_parent_reference(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        parent: &ParentReference,
    ) -> Result<Option<SecretRecord>> {
        self.modify_parents(tenant_id, scope, id, |r| {
            r.parents.remove(parent);
        })
        .await
    }

    async fn count_references_to(
        &self,
        tenant_id: &TenantId,
        config_id: &SecretManagerId,
    ) -> Result<u64> {
        let guard = self.secrets.read().await;
        Ok(guard
            .get(tenant_id)
            .map(|t| t.values().filter(|r| &r.secret_manager_id == config_id).count() as u64)
            .unwrap_or(0))
    }

    async fn count_references_to_any_tenant(&self, config_id: &SecretManagerId) -> Result<u64> {
        let guard = self.secrets.read().await;
        Ok(guard
            .values()
            .flat_map(|t| t.values())
            .filter(|r| &r.secret_manager_id == config_id)
            .count() as u64)
    }

    async fn list(&self, tenant_id: &TenantId, filter: &SecretFilter) -> Result<Vec<SecretRecord>> {
        let guard = self.secrets.read().await;
        Ok(guard
            .get(tenant_id)
            .map(|t| t.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }
}
