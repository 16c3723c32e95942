//! SQLite database adapters for the stage-run engine.

pub mod card_repository;
pub mod connection;
pub mod document_repository;
pub mod migrations;
pub mod recipe_repository;
pub mod stage_run_repository;
pub mod worker_repository;

pub use card_repository::SqliteCardRepository;
pub use connection::{
    create_pool, create_test_pool, database_url, verify_connection, ConnectionError, PoolConfig,
};
pub use document_repository::SqliteDocumentRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use recipe_repository::SqliteRecipeRepository;
pub use stage_run_repository::SqliteStageRunRepository;
pub use worker_repository::SqliteWorkerRepository;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Render a timestamp for storage. The fixed width keeps string comparison
/// in SQL consistent with time order.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an optional UUID string from a SQLite row field.
pub fn parse_optional_uuid(s: Option<String>) -> DomainResult<Option<Uuid>> {
    s.map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse a JSON string from a SQLite row field, falling back to the type's default.
pub fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(s: Option<String>) -> DomainResult<T> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|opt| opt.unwrap_or_default())
}

/// Any database setup failure.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Pool setup
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// Schema migration
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    /// Query
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Open the database at `database_url` and bring its schema up to date.
pub async fn initialize_database(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, config).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_datetime_orders_lexicographically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1500);
        let (a, b) = (format_datetime(earlier), format_datetime(later));
        assert!(a < b);
        assert_eq!(a.len(), b.len());
        assert_eq!(parse_datetime(&a).unwrap().timestamp_micros(), earlier.timestamp_micros());
    }
}
