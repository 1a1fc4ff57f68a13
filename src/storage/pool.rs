//! # Database Connection Pool Management
//!
//! SQLite pool creation for the sqlx-backed stores.

use crate::config::DatabaseConfig;
use crate::errors::{KeywardError, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{str::FromStr, time::Duration};
use validator::Validate;

/// Type alias for the database connection pool
pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a database connection pool with the specified configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    validate_config(config)?;

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(config.idle_timeout())
        .test_before_acquire(true);

    let mut connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| KeywardError::database(e, "Invalid SQLite connection string"))?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .foreign_keys(true);

    if config.is_in_memory() {
        // Closing the last connection drops an in-memory database
        pool_options = pool_options.max_lifetime(None).idle_timeout(None);
    } else {
        connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = pool_options.connect_with(connect_options).await.map_err(|e| {
        tracing::error!(
            error = %e,
            url = %config.url,
            busy_timeout_ms = SQLITE_BUSY_TIMEOUT.as_millis() as u64,
            "Failed to create SQLite database pool"
        );
        KeywardError::database(e, format!("Failed to connect to database: {}", config.url))
    })?;

    tracing::info!(
        url = %config.url,
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_ms = config.connect_timeout().as_millis() as u64,
        "Database connection pool created"
    );

    if config.auto_migrate {
        tracing::info!("Auto-migration enabled, running database migrations");
        crate::storage::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

fn validate_config(config: &DatabaseConfig) -> Result<()> {
    config.validate()?;

    if config.min_connections > config.max_connections {
        return Err(KeywardError::validation(
            "min_connections cannot be greater than max_connections",
        ));
    }

    if !config.url.starts_with("sqlite:") {
        return Err(KeywardError::validation("database URL must start with 'sqlite:'"));
    }

    Ok(())
}

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| KeywardError::database(e, "Database connectivity check failed"))?;
    Ok(())
}

/// Pool statistics for monitoring
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

impl PoolStats {
    pub fn active(&self) -> u32 {
        self.size.saturating_sub(self.idle as u32)
    }
}

pub fn get_pool_stats(pool: &DbPool) -> PoolStats {
    PoolStats { size: pool.size(), idle: pool.num_idle() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_config_invalid_max_connections() {
        let config = DatabaseConfig { max_connections: 0, ..Default::default() };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_invalid_min_max() {
        let config =
            DatabaseConfig { max_connections: 5, min_connections: 10, ..Default::default() };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_invalid_url_scheme() {
        let config =
            DatabaseConfig { url: "postgresql://localhost/test".to_string(), ..Default::default() };
        assert!(validate_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_pool() {
        let pool = create_pool(&DatabaseConfig::in_memory()).await.unwrap();
        check_connection(&pool).await.unwrap();
        assert_eq!(get_pool_stats(&pool).size, 1);
    }

    #[tokio::test]
    async fn test_file_pool_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("keyward.db").display());
        let config = DatabaseConfig { url, ..Default::default() };

        let pool = create_pool(&config).await.unwrap();
        check_connection(&pool).await.unwrap();
        assert!(dir.path().join("keyward.db").exists());
    }
}
