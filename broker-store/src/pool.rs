use anyhow::{Context, Result, anyhow};
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub const EMBEDDED_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[cfg(feature = "sqlite")]
pub type SqliteConnectionWrapper =
    diesel_async::sync_connection_wrapper::SyncConnectionWrapper<diesel::sqlite::SqliteConnection>;
#[cfg(feature = "sqlite")]
pub type SqliteManager = AsyncDieselConnectionManager<SqliteConnectionWrapper>;
#[cfg(feature = "sqlite")]
pub type SqlitePool = Pool<SqliteConnectionWrapper>;
#[cfg(feature = "sqlite")]
pub type SqliteConn = Object<SqliteConnectionWrapper>;

#[cfg(all(not(feature = "sqlite"), feature = "postgres"))]
pub type PgManager = AsyncDieselConnectionManager<diesel_async::AsyncPgConnection>;
#[cfg(all(not(feature = "sqlite"), feature = "postgres"))]
pub type PgPool = Pool<diesel_async::AsyncPgConnection>;
#[cfg(all(not(feature = "sqlite"), feature = "postgres"))]
pub type PgConn = Object<diesel_async::AsyncPgConnection>;

/// Builds a SQLite connection pool and runs pending migrations against it.
///
/// `:memory:`/`mode=memory` URLs are treated as shared-cache databases: the
/// pool is built first and migrations run through one of its own connections
/// so every later checkout observes the same in-process database.
#[cfg(feature = "sqlite")]
pub async fn sqlite_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    use diesel_async::AsyncMigrationHarness;
    use diesel_async::SimpleAsyncConnection;

    let manager = SqliteManager::new(database_url);
    let pool = SqlitePool::builder(manager)
        .max_size(max_connections as usize)
        .build()
        .context("failed to build sqlite connection pool")?;

    let mut conn = pool
        .get()
        .await
        .context("failed to acquire connection for migrations")?;
    conn.batch_execute("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
        .await
        .context("failed to configure sqlite connection")?;

    let mut harness = AsyncMigrationHarness::new(conn);
    tokio::task::spawn_blocking(move || -> Result<()> {
        diesel_migrations::MigrationHarness::run_pending_migrations(&mut harness, EMBEDDED_MIGRATIONS)
            .map_err(|err| anyhow!("failed to run diesel migrations: {err}"))?;
        Ok(())
    })
    .await
    .map_err(|err| anyhow!("migration task panicked: {err}"))??;

    Ok(pool)
}

#[cfg(all(not(feature = "sqlite"), feature = "postgres"))]
pub async fn postgres_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    use diesel_async::AsyncMigrationHarness;

    let manager = PgManager::new(database_url);
    let pool = PgPool::builder(manager)
        .max_size(max_connections as usize)
        .build()
        .context("failed to build postgres connection pool")?;

    let conn = pool
        .get()
        .await
        .context("failed to acquire connection for migrations")?;
    let mut harness = AsyncMigrationHarness::new(conn);
    tokio::task::spawn_blocking(move || -> Result<()> {
        diesel_migrations::MigrationHarness::run_pending_migrations(&mut harness, EMBEDDED_MIGRATIONS)
            .map_err(|err| anyhow!("failed to run diesel migrations: {err}"))?;
        Ok(())
    })
    .await
    .map_err(|err| anyhow!("migration task panicked: {err}"))??;

    Ok(pool)
}
