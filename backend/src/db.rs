//! Connection pool, migrations and cross-process entity locks

use std::time::Duration;

use ledger_shared::{EntityKind, EntityRef};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

use crate::config::DatabaseConfig;
use crate::error::AppResult;

/// Create the Postgres connection pool
pub async fn connect(config: &DatabaseConfig) -> AppResult<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await?;
    tracing::info!("Database connection established");
    Ok(pool)
}

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations completed");
    Ok(())
}

/// 64-bit advisory lock key for an entity: kind in the top 16 bits, id below
pub fn advisory_key(entity: EntityRef) -> i64 {
    let kind: i64 = match entity.kind {
        EntityKind::Product => 1,
        EntityKind::BankAccount => 2,
        EntityKind::Sale => 3,
    };
    (kind << 48) | (entity.id & 0x0000_FFFF_FFFF_FFFF)
}

/// Take the transaction-scoped advisory lock for `entity`.
///
/// Released automatically on commit or rollback.
pub async fn lock_entity(conn: &mut PgConnection, entity: EntityRef) -> AppResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(advisory_key(entity))
        .execute(conn)
        .await?;
    Ok(())
}
