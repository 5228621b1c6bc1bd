//! Storage for the Talespin turn log.
//!
//! Two interchangeable backends implement both `EventRepository` and
//! `ProjectionRepository`: an in-memory store for tests and database-less
//! runs, and a `PostgreSQL` store whose schema rejects updates and deletes of
//! turn events at the database level.

pub mod memory_event_repository;
pub mod pg_event_repository;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use talespin_core::error::DomainError;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Opens a connection pool.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the database is unreachable.
pub async fn connect(database_url: &str) -> Result<PgPool, DomainError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("database connection failed: {e}")))
}

/// Applies pending migrations.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DomainError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("migration failed: {e}")))
}
