//! # Database Migration Management
//!
//! Schema migrations are compiled into the library and applied in version
//! order. Each applied migration is recorded with a SHA-256 checksum so a
//! later edit to an already-applied file is detected.

use crate::errors::{KeywardError, Result};
use crate::storage::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{error, info, warn};

/// Embedded migrations as `(file stem, sql)`
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "20260101000001_create_secret_managers",
        include_str!("../../migrations/20260101000001_create_secret_managers.sql"),
    ),
    (
        "20260101000002_create_secrets",
        include_str!("../../migrations/20260101000002_create_secrets.sql"),
    ),
];

/// Migration information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
    pub installed_on: chrono::DateTime<chrono::Utc>,
    pub execution_time: i64,
    pub checksum: Vec<u8>,
}

/// Run all pending database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!("Starting database migration process");

    create_migration_table(pool).await?;
    let applied = applied_checksums(pool).await?;

    let mut migrations_run = 0;
    for (filename, sql) in MIGRATIONS {
        let version = extract_version_from_filename(filename)?;
        let checksum = calculate_checksum(sql);

        if let Some(recorded) = applied.iter().find(|(v, _)| *v == version) {
            if recorded.1 != checksum {
                warn!(
                    version = version,
                    "Applied migration differs from embedded file: {}", filename
                );
            }
            continue;
        }

        info!(version = version, "Running migration: {}", filename);
        let start_time = std::time::Instant::now();

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| KeywardError::database(e, "Failed to start migration transaction"))?;

        sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(|e| {
            error!(error = %e, migration = filename, "Migration failed");
            KeywardError::database(e, format!("Migration failed: {}", filename))
        })?;

        let execution_time = start_time.elapsed().as_millis() as i64;
        sqlx::query(
            "INSERT INTO _keyward_migrations \
             (version, description, checksum, execution_time, installed_on) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(version)
        .bind(*filename)
        .bind(&checksum)
        .bind(execution_time)
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            KeywardError::database(e, format!("Failed to record migration: {}", filename))
        })?;

        tx.commit()
            .await
            .map_err(|e| KeywardError::database(e, "Failed to commit migration transaction"))?;

        migrations_run += 1;
        info!(
            version = version,
            execution_time_ms = execution_time,
            "Migration completed: {}", filename
        );
    }

    if migrations_run > 0 {
        info!(count = migrations_run, "Database migrations completed");
    } else {
        info!("No pending migrations");
    }

    Ok(())
}

async fn create_migration_table(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _keyward_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            checksum BLOB NOT NULL,
            execution_time INTEGER NOT NULL,
            installed_on TEXT NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await
    .map_err(|e| KeywardError::database(e, "Failed to create migration tracking table"))?;

    Ok(())
}

fn is_missing_table(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.message().contains("no such table"))
}

async fn applied_checksums(pool: &DbPool) -> Result<Vec<(i64, Vec<u8>)>> {
    let rows = sqlx::query("SELECT version, checksum FROM _keyward_migrations ORDER BY version")
        .fetch_all(pool)
        .await;

    match rows {
        Ok(rows) => Ok(rows
            .into_iter()
            .map(|row| (row.get::<i64, _>("version"), row.get::<Vec<u8>, _>("checksum")))
            .collect()),
        Err(e) if is_missing_table(&e) => Ok(Vec::new()),
        Err(e) => Err(KeywardError::database(e, "Failed to get applied migrations")),
    }
}

fn extract_version_from_filename(filename: &str) -> Result<i64> {
    let version_str = filename.split('_').next().ok_or_else(|| {
        KeywardError::validation(format!("Invalid migration filename: {}", filename))
    })?;

    version_str.parse::<i64>().map_err(|_| {
        KeywardError::validation(format!("Invalid version in filename: {}", filename))
    })
}

fn calculate_checksum(content: &str) -> Vec<u8> {
    ring::digest::digest(&ring::digest::SHA256, content.as_bytes()).as_ref().to_vec()
}

/// True when every embedded migration is applied and nothing else is
pub async fn validate_migrations(pool: &DbPool) -> Result<bool> {
    let applied: Vec<i64> = applied_checksums(pool).await?.into_iter().map(|(v, _)| v).collect();
    let expected = MIGRATIONS
        .iter()
        .map(|(filename, _)| extract_version_from_filename(filename))
        .collect::<Result<Vec<_>>>()?;

    if let Some(missing) = expected.iter().find(|v| !applied.contains(v)) {
        warn!(version = missing, "Missing migration");
        return Ok(false);
    }
    if let Some(unexpected) = applied.iter().find(|v| !expected.contains(v)) {
        warn!(version = unexpected, "Unexpected migration found");
        return Ok(false);
    }

    Ok(true)
}

/// Highest applied migration version, 0 on a fresh database
pub async fn get_migration_version(pool: &DbPool) -> Result<i64> {
    let applied = applied_checksums(pool).await?;
    Ok(applied.into_iter().map(|(v, _)| v).max().unwrap_or(0))
}

pub async fn list_applied_migrations(pool: &DbPool) -> Result<Vec<MigrationInfo>> {
    let rows = sqlx::query(
        "SELECT version, description, checksum, execution_time, installed_on \
         FROM _keyward_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(rows) => Ok(rows
            .into_iter()
            .map(|row| MigrationInfo {
                version: row.get("version"),
                description: row.get("description"),
                installed_on: row.get("installed_on"),
                execution_time: row.get("execution_time"),
                checksum: row.get("checksum"),
            })
            .collect()),
        Err(e) if is_missing_table(&e) => Ok(Vec::new()),
        Err(e) => Err(KeywardError::database(e, "Failed to list applied migrations")),
    }
}
