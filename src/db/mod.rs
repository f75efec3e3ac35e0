mod error;
pub mod filter;
#[cfg(feature = "database-mysql")]
pub mod mysql;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(
    test,
    any(
        feature = "database-sqlite",
        feature = "database-postgres",
        feature = "database-mysql"
    )
))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::{DatabaseConfig, RuleTablesConfig};

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(sqlx::PgPool),
    #[cfg(feature = "database-mysql")]
    Mysql(sqlx::MySqlPool),
    #[cfg(not(any(
        feature = "database-sqlite",
        feature = "database-postgres",
        feature = "database-mysql"
    )))]
    _None(std::convert::Infallible),
}

/// Database pool supporting SQLite, PostgreSQL and MySQL.
///
/// The rule repository is created once at construction time.
pub struct DbPool {
    inner: PoolStorage,
    archive_rules: Arc<dyn ArchiveRuleRepo>,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool, tables: &RuleTablesConfig) -> Self {
        DbPool {
            archive_rules: Arc::new(sqlite::SqliteArchiveRuleRepo::new(pool.clone(), tables)),
            inner: PoolStorage::Sqlite(pool),
        }
    }

    /// Create a DbPool from an existing PostgreSQL pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(pool: sqlx::PgPool, tables: &RuleTablesConfig) -> Self {
        DbPool {
            archive_rules: Arc::new(postgres::PostgresArchiveRuleRepo::new(pool.clone(), tables)),
            inner: PoolStorage::Postgres(pool),
        }
    }

    /// Create a DbPool from an existing MySQL pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-mysql")]
    pub fn from_mysql(pool: sqlx::MySqlPool, tables: &RuleTablesConfig) -> Self {
        DbPool {
            archive_rules: Arc::new(mysql::MysqlArchiveRuleRepo::new(pool.clone(), tables)),
            inner: PoolStorage::Mysql(pool),
        }
    }

    pub async fn from_config(config: &DatabaseConfig, tables: &RuleTablesConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                Ok(Self::from_sqlite(pool, tables))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .min_connections(cfg.min_connections)
                    .max_connections(cfg.max_connections)
                    .acquire_timeout(std::time::Duration::from_secs(cfg.connect_timeout_secs))
                    .connect(&cfg.url)
                    .await?;

                Ok(Self::from_postgres(pool, tables))
            }
            #[cfg(feature = "database-mysql")]
            DatabaseConfig::Mysql(cfg) => {
                let pool = sqlx::mysql::MySqlPoolOptions::new()
                    .min_connections(cfg.min_connections)
                    .max_connections(cfg.max_connections)
                    .acquire_timeout(std::time::Duration::from_secs(cfg.connect_timeout_secs))
                    .connect(&cfg.url)
                    .await?;

                Ok(Self::from_mysql(pool, tables))
            }
        }
    }

    /// Repository over the archive rule tables.
    pub fn archive_rules(&self) -> Arc<dyn ArchiveRuleRepo> {
        Arc::clone(&self.archive_rules)
    }

    /// Create the rule tables under their default names.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pool) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations_sqlx/postgres").run(pool).await?;
                tracing::info!("PostgreSQL migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-mysql")]
            PoolStorage::Mysql(pool) => {
                tracing::info!("Running MySQL migrations");
                sqlx::migrate!("./migrations_sqlx/mysql").run(pool).await?;
                tracing::info!("MySQL migrations completed successfully");
                Ok(())
            }
            #[cfg(not(any(
                feature = "database-sqlite",
                feature = "database-postgres",
                feature = "database-mysql"
            )))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Close all pooled connections, waiting for checked-out ones to return.
    pub async fn close(&self) {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pool) => pool.close().await,
            #[cfg(feature = "database-mysql")]
            PoolStorage::Mysql(pool) => pool.close().await,
            #[cfg(not(any(
                feature = "database-sqlite",
                feature = "database-postgres",
                feature = "database-mysql"
            )))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}
