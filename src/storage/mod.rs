//! # Storage and Persistence
//!
//! Store contracts for secret-manager configs and secret records, with an
//! in-process implementation ([`memory`]) and a sqlx SQLite one ([`sqlite`]).
//!
//! Every operation takes the [`TenantId`] as the first key component. The
//! stores never see plaintext: configs arrive with credentials already
//! sealed, and secret payloads are opaque [`crate::domain::EncryptedRecord`]s
//! or reference paths.
//!
//! `save` is compare-and-swap on `version`: a record with version `0` is
//! inserted at version `1`, any other version must match the stored one and
//! is bumped by one. Name uniqueness is enforced here as the authoritative
//! guard; services only pre-check to fail fast.

pub mod memory;
pub mod migrations;
pub mod pool;
pub mod sqlite;

use async_trait::async_trait;

use crate::domain::{
    ParentReference, Scope, SecretFilter, SecretId, SecretManagerConfig, SecretManagerId,
    SecretRecord, TenantId,
};
use crate::errors::Result;

pub use memory::{InMemoryConfigStore, InMemorySecretStore};
pub use migrations::{
    get_migration_version, list_applied_migrations, run_migrations, validate_migrations,
    MigrationInfo,
};
pub use pool::{check_connection, create_pool, get_pool_stats, DbPool, PoolStats};
pub use sqlite::{SqliteConfigStore, SqliteSecretStore};

/// Persistence for [`SecretManagerConfig`]
#[async_trait]
pub trait SecretManagerConfigStore: Send + Sync {
    /// Insert or compare-and-swap update; returns the stored config.
    ///
    /// Saving a live default unsets `is_default` on the tenant's other
    /// configs in the same write.
    async fn save(&self, config: &SecretManagerConfig) -> Result<SecretManagerConfig>;

    /// Fetch by id, soft-deleted configs included
    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &SecretManagerId,
    ) -> Result<Option<SecretManagerConfig>>;

    /// Live config with this name, ignoring case
    async fn find_by_name(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Option<SecretManagerConfig>>;

    /// The tenant's live default config, if one is marked
    async fn find_default(&self, tenant_id: &TenantId) -> Result<Option<SecretManagerConfig>>;

    /// Live configs of the tenant, plus the global tenant's when `include_global`
    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        include_global: bool,
    ) -> Result<Vec<SecretManagerConfig>>;

    /// Flag as deleted; false when no live config matched
    async fn soft_delete(&self, tenant_id: &TenantId, id: &SecretManagerId) -> Result<bool>;

    /// Remove the row; false when nothing matched
    async fn hard_delete(&self, tenant_id: &TenantId, id: &SecretManagerId) -> Result<bool>;
}

/// Persistence for [`SecretRecord`]
#[async_trait]
pub trait SecretRecordStore: Send + Sync {
    /// Insert or compare-and-swap update; returns the stored record
    async fn save(&self, record: &SecretRecord) -> Result<SecretRecord>;

    async fn get(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
    ) -> Result<Option<SecretRecord>>;

    /// Record with this name in the scope, ignoring case
    async fn find_by_name(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        name: &str,
    ) -> Result<Option<SecretRecord>>;

    async fn delete(&self, tenant_id: &TenantId, scope: &Scope, id: &SecretId) -> Result<bool>;

    /// Returns the updated record, `None` if the secret does not exist
    async fn add_parent_reference(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        parent: &ParentReference,
    ) -> Result<Option<SecretRecord>>;

    async fn remove_parent_reference(
        &self,
        tenant_id: &TenantId,
        scope: &Scope,
        id: &SecretId,
        parent: &ParentReference,
    ) -> Result<Option<SecretRecord>>;

    /// Number of secrets, in any scope of the tenant, owned by `config_id`
    async fn count_references_to(
        &self,
        tenant_id: &TenantId,
        config_id: &SecretManagerId,
    ) -> Result<u64>;

    /// Number of secrets in every tenant owned by `config_id`.
    ///
    /// Platform-wide configs live in the global tenant but own secrets of
    /// any tenant.
    async fn count_references_to_any_tenant(&self, config_id: &SecretManagerId) -> Result<u64>;

    /// Matching records in no particular order
    async fn list(&self, tenant_id: &TenantId, filter: &SecretFilter) -> Result<Vec<SecretRecord>>;

    async fn list_by_secret_manager(
        &self,
        tenant_id: &TenantId,
        config_id: &SecretManagerId,
    ) -> Result<Vec<SecretRecord>> {
        let filter =
            SecretFilter { secret_manager_id: Some(config_id.clone()), ..Default::default() };
        self.list(tenant_id, &filter).await
    }
}
