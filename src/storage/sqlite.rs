//! sqlx SQLite stores
//!
//! Uniqueness lives in the schema (see `migrations/`): a violated unique
//! index becomes [`KeywardError::DuplicateField`], and an update whose
//! `WHERE version = ?` matched nothing becomes
//! [`KeywardError::VersionConflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::BTreeSet;
use tracing::{error, instrument, Instrument};

use super::{DbPool, SecretManagerConfigStore, SecretRecordStore};
use crate::db_span;
use crate::domain::{
    ParentReference, Scope, SecretFilter, SecretId, SecretManagerConfig, SecretManagerId,
    SecretRecord, TenantId,
};
use crate::errors::{KeywardError, Result};

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| KeywardError::serialization(e, format!("Failed to encode {}", what)))
}

fn from_json<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| KeywardError::serialization(e, format!("Failed to decode stored {}", what)))
}

/// Map a write failure, turning unique-index violations into duplicates
fn write_error(e: sqlx::Error, resource_type: &str, name: &str) -> KeywardError {
    if e.as_database_error().is_some_and(|db_err| db_err.is_unique_violation()) {
        tracing::warn!(resource_type = %resource_type, name = %name, "Unique index rejected write");
        return KeywardError::duplicate(resource_type, "name", name);
    }
    error!(error = %e, resource_type = %resource_type, name = %name, "Failed to write row");
    KeywardError::database(e, format!("Failed to save {} '{}'", resource_type, name))
}

fn db_error(e: sqlx::Error, context: impl Into<String>) -> KeywardError {
    let context = context.into();
    error!(error = %e, context = %context, "Database operation failed");
    KeywardError::database(e, context)
}

/// Database row structure for secret-manager configs
#[derive(Debug, FromRow)]
struct ConfigRow {
    id: SecretManagerId,
    tenant_id: TenantId,
    org_id: String,
    project_id: String,
    name: String,
    description: Option<String>,
    encryption_type: String,
    is_default: bool,
    platform_managed: bool,
    connection: String,
    sealed_credentials: Option<String>,
    deleted: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConfigRow> for SecretManagerConfig {
    type Error = KeywardError;

    fn try_from(row: ConfigRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            scope: Scope::from_keys(row.org_id, row.project_id),
            name: row.name,
            description: row.description,
            encryption_type: row.encryption_type.parse()?,
            is_default: row.is_default,
            platform_managed: row.platform_managed,
            connection: from_json(&row.connection, "connection settings")?,
            credentials: None,
            sealed_credentials: row
                .sealed_credentials
                .as_deref()
                .map(|raw| from_json(raw, "sealed credentials"))
                .transpose()?,
            deleted: row.deleted,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const CONFIG_COLUMNS: &str = "id, tenant_id, org_id, project_id, name, description, \
     encryption_type, is_default, platform_managed, connection, sealed_credentials, deleted, \
     version, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteConfigStore {
    pool: DbPool,
}

impl SqliteConfigStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        tenant_id: &TenantId,
        arg: Option<&str>,
    ) -> Result<Option<SecretManagerConfig>> {
        let sql = format!(
            "SELECT {} FROM secret_managers WHERE tenant_id = ? AND {}",
            CONFIG_COLUMNS, clause
        );
        let mut query = sqlx::query_as::<Sqlite, ConfigRow>(&sql).bind(tenant_id);
        if let Some(arg) = arg {
            query = query.bind(arg);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                db_error(e, format!("Failed to load secret manager for '{}'", tenant_id))
            })?;
        row.map(SecretManagerConfig::try_from).transpose()
    }
}

#[async_trait]
impl SecretManagerConfigStore for SqliteConfigStore {
    #[instrument(skip(self, config), fields(tenant_id = %config.tenant_id, config_id = %config.id), name = "db_save_secret_manager")]
    async fn save(&self, config: &SecretManagerConfig) -> Result<SecretManagerConfig> {
        let connection = to_json(&config.connection, "connection settings")?;
        let sealed = config
            .sealed_credentials
            .as_ref()
            .map(|record| to_json(record, "sealed credentials"))
            .transpose()?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            db_error(e, format!("Failed to begin transaction for '{}'", config.name))
        })?;

        let version = if config.version == 0 {
            sqlx::query(
                "INSERT INTO secret_managers (id, tenant_id, org_id, project_id, name, description, \
                 encryption_type, is_default, platform_managed, connection, sealed_credentials, \
                 deleted, version, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
            )
            .bind(&config.id)
            .bind(&config.tenant_id)
            .bind(config.scope.org_key())
            .bind(config.scope.project_key())
            .bind(&config.name)
            .bind(&config.description)
            .bind(config.encryption_type.as_str())
            .bind(config.is_default)
            .bind(config.platform_managed)
            .bind(&connection)
            .bind(&sealed)
            .bind(config.deleted)
            .bind(config.created_at)
            .bind(config.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, "SecretManagerConfig", &config.name))?;
            1
        } else {
            let result = sqlx::query(
                "UPDATE secret_managers SET name = ?, description = ?, is_default = ?, \
                 platform_managed = ?, connection = ?, sealed_credentials = ?, deleted = ?, \
                 version = version + 1, updated_at = ? \
                 WHERE tenant_id = ? AND id = ? AND version = ?",
            )
            .bind(&config.name)
            .bind(&config.description)
            .bind(config.is_default)
            .bind(config.platform_managed)
            .bind(&connection)
            .bind(&sealed)
            .bind(config.deleted)
            .bind(config.updated_at)
            .bind(&config.tenant_id)
            .bind(&config.id)
            .bind(config.version)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, "SecretManagerConfig", &config.name))?;

            if result.rows_affected() == 0 {
                let actual = sqlx::query_scalar::<Sqlite, i64>(
                    "SELECT version FROM secret_managers WHERE tenant_id = ? AND id = ?",
                )
                .bind(&config.tenant_id)
                .bind(&config.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error(e, "Failed to read secret manager version"))?;
                return Err(match actual {
                    Some(actual) => KeywardError::version_conflict(
                        "SecretManagerConfig",
                        config.id.as_str(),
                        config.version,
                        actual,
                    ),
                    None => KeywardError::invalid_request(format!(
                        "SecretManagerConfig '{}' does not exist",
                        config.id
                    )),
                });
            }
            config.version + 1
        };

        // One default per tenant, switched in the same transaction
        if config.is_default && !config.deleted {
            sqlx::query(
                "UPDATE secret_managers SET is_default = 0, version = version + 1, updated_at = ? \
                 WHERE tenant_id = ? AND id != ? AND is_default = 1 AND deleted = 0",
            )
            .bind(Utc::now())
            .bind(&config.tenant_id)
            .bind(&config.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, "Failed to clear default secret manager"))?;
        }

        tx.commit().await.map_err(|e| {
            db_error(e, format!("Failed to commit secret manager '{}'", config.name))
        })?;

        let mut stored = config.without_plaintext();
        stored.version = version;
        Ok(stored)
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &SecretManagerId,
    ) -> Result<Option<SecretManagerConfig>> {
        self.fetch_one_where("id = ?", tenant_id, Some(id.as_str())).await
    }

    async fn find_by_name(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Option<SecretManagerConfig>> {
        self.fetch_one_where("deleted = 0 AND lower(name) = lower(?)", tenant_id, Some(name))
            .await
    }

    async fn find_default(&self, tenant_id: &TenantId) -> Result<Option<SecretManagerConfig>> {
        self.fetch_one_where(
            "deleted = 0 AND is_default = 1 ORDER BY created_at LIMIT 1",
            tenant_id,
            None,
        )
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), name = "db_list_secret_managers")]
    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        include_global: bool,
    ) -> Result<Vec<SecretManagerConfig>> {
        let sql = format!(
            "SELECT {} FROM secret_managers \
             WHERE deleted = 0 AND (tenant_id = ? OR (? AND tenant_id = ?)) \
             ORDER BY created_at, id",
            CONFIG_COLUMNS
        );
        let rows = sqlx::query_as::<Sqlite, ConfigRow>(&sql)
            .bind(tenant_id)
            .bind(include_global)
            .bind(TenantId::global())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                db_error(e, format!("Failed to list secret managers for '{}'", tenant_id))
            })?;

        rows.into_iter().map(SecretManagerConfig::try_from).collect()
    }

    async fn soft_delete(&self, tenant_id: &TenantId, id: &SecretManagerId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE secret_managers \
             SET deleted = 1, is_default = 0, version = version + 1, updated_at = ? \
             WHERE tenant_id = ? AND id = ? AND deleted = 0",
        )
        .bind(Utc::now())
        .bind(tenant_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to soft-delete secret manager '{}'", id)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn hard_delete(&self, tenant_id: &TenantId, id: &SecretManagerId) -> Result<bool> {
        let span = db_span!("hard_delete_secret_manager", tenant_id = %tenant_id);
        let result = sqlx::query("DELETE FROM secret_managers WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|e| db_error(e, format!("Failed to delete secret manager '{}'", id)))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Database row structure for secrets
#[derive(Debug, FromRow)]
struct SecretRow {
    id: SecretId,
    tenant_id: TenantId,
    org_id: String,
    project_id: String,
    name: String,
    description: Option<String>,
    kind: String,
    encryption_type: String,
    secret_manager_id: SecretManagerId,
    payload: String,
    parents: String,
    usage_restrictions: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SecretRow> for SecretRecord {
    type Error = KeywardError;

    fn try_from(row: SecretRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            scope: Scope::from_keys(row.org_id, row.project_id),
            name: row.name,
            description: row.description,
            kind: row.kind.parse()?,
            encryption_type: row.encryption_type.parse()?,
            secret_manager_id: row.secret_manager_id,
            payload: from_json(&row.payload, "secret payload")?,
            parents: from_json(&row.parents, "secret parents")?,
            usage_restrictions: from_json(&row.usage_restrictions, "usage restrictions")?,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SECRET_COLUMNS: &str = "id, tenant_id, org_id, project_id, name, description, kind, \
     encryption_type, secret_manager_id, payload, parents, usage_restrictions, version, \
     created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteSecretStore {
    pool: DbPool,
}

impl SqliteSecretStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn modify_parents<F>(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        change: F,
    ) -> Result<Option<SecretRecord>>
    where
        F: FnOnce(&mut BTreeSet<ParentReference>) + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| {
                KeywardError::database(e, "Failed to start parent reference transaction")
            })?;

        let sql = format!(
            "SELECT {} FROM secrets \
             WHERE tenant_id = ? AND org_id = ? AND project_id = ? AND id = ?",
            SECRET_COLUMNS
        );
        let row = sqlx::query_as::<Sqlite, SecretRow>(&sql)
            .bind(tenant_id)
            .bind(scope.org_key())
            .bind(scope.project_key())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to load secret '{}'", id)))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record = SecretRecord::try_from(row)?;
        change(&mut record.parents);

        sqlx::query("UPDATE secrets SET parents = ? WHERE tenant_id = ? AND id = ?")
            .bind(to_json(&record.parents, "secret parents")?)
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to update parents of secret '{}'", id)))?;

        tx.commit()
            .await
            .map_err(|e| KeywardError::database(e, "Failed to commit parent reference change"))?;
        Ok(Some(record))
    }
}

#[async_trait]
impl SecretRecordStore for SqliteSecretStore {
    #[instrument(skip(self, record), fields(tenant_id = %record.tenant_id, secret_id = %record.id), name = "db_save_secret")]
    async fn save(&self, record: &SecretRecord) -> Result<SecretRecord> {
        let payload = to_json(&record.payload, "secret payload")?;
        let restrictions = to_json(&record.usage_restrictions, "usage restrictions")?;

        if record.version == 0 {
            sqlx::query(
                "INSERT INTO secrets (id, tenant_id, org_id, project_id, name, description, kind, \
                 encryption_type, secret_manager_id, payload, parents, usage_restrictions, \
                 version, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
            )
            .bind(&record.id)
            .bind(&record.tenant_id)
            .bind(record.scope.org_key())
            .bind(record.scope.project_key())
            .bind(&record.name)
            .bind(&record.description)
            .bind(record.kind.as_str())
            .bind(record.encryption_type.as_str())
            .bind(&record.secret_manager_id)
            .bind(&payload)
            .bind(to_json(&record.parents, "secret parents")?)
            .bind(&restrictions)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, "Secret", &record.name))?;

            let mut stored = record.clone();
            stored.version = 1;
            return Ok(stored);
        }

        let result = sqlx::query(
            "UPDATE secrets SET name = ?, description = ?, kind = ?, encryption_type = ?, \
             secret_manager_id = ?, payload = ?, usage_restrictions = ?, \
             version = version + 1, updated_at = ? \
             WHERE tenant_id = ? AND org_id = ? AND project_id = ? AND id = ? AND version = ?",
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(record.kind.as_str())
        .bind(record.encryption_type.as_str())
        .bind(&record.secret_manager_id)
        .bind(&payload)
        .bind(&restrictions)
        .bind(record.updated_at)
        .bind(&record.tenant_id)
        .bind(record.scope.org_key())
        .bind(record.scope.project_key())
        .bind(&record.id)
        .bind(record.version)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "Secret", &record.name))?;

        if result.rows_affected() == 0 {
            return Err(match self.get(&record.tenant_id, &record.scope, &record.id).await? {
                Some(current) => KeywardError::version_conflict(
                    "Secret",
                    record.id.as_str(),
                    record.version,
                    current.version,
                ),
                None => KeywardError::invalid_request(format!(
                    "Secret '{}' does not exist",
                    record.id
                )),
            });
        }

        self.get(&record.tenant_id, &record.scope, &record.id).await?.ok_or_else(|| {
            KeywardError::internal(format!("Secret '{}' vanished after update", record.id))
        })
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
    ) -> Result<Option<SecretRecord>> {
        let sql = format!(
            "SELECT {} FROM secrets \
             WHERE tenant_id = ? AND org_id = ? AND project_id = ? AND id = ?",
            SECRET_COLUMNS
        );
        let row = sqlx::query_as::<Sqlite, SecretRow>(&sql)
            .bind(tenant_id)
            .bind(scope.org_key())
            .bind(scope.project_key())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to get secret '{}'", id)))?;
        row.map(SecretRecord::try_from).transpose()
    }

    async fn find_by_name(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<SecretRecord>> {
        let sql = format!(
            "SELECT {} FROM secrets \
             WHERE tenant_id = ? AND org_id = ? AND project_id = ? AND lower(name) = lower(?)",
            SECRET_COLUMNS
        );
        let row = sqlx::query_as::<Sqlite, SecretRow>(&sql)
            .bind(tenant_id)
            .bind(scope.org_key())
            .bind(scope.project_key())
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to find secret '{}'", name)))?;
        row.map(SecretRecord::try_from).transpose()
    }

    async fn delete(&self, tenant_id: &TenantId, scope: &Scope, id: &SecretId) -> Result<bool> {
        let span = db_span!("delete_secret", tenant_id = %tenant_id, secret_id = %id);
        let result = sqlx::query(
            "DELETE FROM secrets WHERE tenant_id = ? AND org_id = ? AND project_id = ? AND id = ?",
        )
        .bind(tenant_id)
        .bind(scope.org_key())
        .bind(scope.project_key())
        .bind(id)
        .execute(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| db_error(e, format!("Failed to delete secret '{}'", id)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_parent_reference(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        parent: &ParentReference,
    ) -> Result<Option<SecretRecord>> {
        let parent = parent.clone();
        self.modify_parents(tenant_id, scope, id, move |parents| {
            parents.insert(parent);
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
        self.modify_parents(tenant_id, scope, id, |parents| {
            parents.remove(parent);
        })
        .await
    }

    async fn count_references_to(
        &self,
        tenant_id: &TenantId,
        config_id: &SecretManagerId,
    ) -> Result<u64> {
        let count = sqlx::query_scalar::<Sqlite, i64>(
            "SELECT COUNT(*) FROM secrets WHERE tenant_id = ? AND secret_manager_id = ?",
        )
        .bind(tenant_id)
        .bind(config_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to count secrets using '{}'", config_id)))?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self), fields(config_id = %config_id), name = "db_count_secret_references_any_tenant")]
    async fn count_references_to_any_tenant(&self, config_id: &SecretManagerId) -> Result<u64> {
        let count = sqlx::query_scalar::<Sqlite, i64>(
            "SELECT COUNT(*) FROM secrets WHERE secret_manager_id = ?",
        )
        .bind(config_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to count secrets using '{}'", config_id)))?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), name = "db_list_secrets")]
    async fn list(&self, tenant_id: &TenantId, filter: &SecretFilter) -> Result<Vec<SecretRecord>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM secrets WHERE tenant_id = ", SECRET_COLUMNS));
        query.push_bind(tenant_id.as_str());

        if let Some(scope) = &filter.scope {
            query.push(" AND org_id = ").push_bind(scope.org_key().to_string());
            query.push(" AND project_id = ").push_bind(scope.project_key().to_string());
        }
        if let Some(config_id) = &filter.secret_manager_id {
            query.push(" AND secret_manager_id = ").push_bind(config_id.as_str().to_string());
        }

        let rows = query
            .build_query_as::<SecretRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to list secrets for '{}'", tenant_id)))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = SecretRecord::try_from(row)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}
