use thiserror::Error;

use super::filter::FilterError;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not configured")]
    NotConfigured,

    #[error("Invalid rule: {0}")]
    Filter(#[from] FilterError),

    #[cfg(any(
        feature = "database-sqlite",
        feature = "database-postgres",
        feature = "database-mysql"
    ))]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(any(
        feature = "database-sqlite",
        feature = "database-postgres",
        feature = "database-mysql"
    ))]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Returns true when the error means the database itself is unreachable,
    /// as opposed to a problem with one query or one rule.
    pub fn is_connectivity(&self) -> bool {
        match self {
            #[cfg(any(
                feature = "database-sqlite",
                feature = "database-postgres",
                feature = "database-mysql"
            ))]
            DbError::Sqlx(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Protocol(_)
            ),
            DbError::NotConfigured => true,
            _ => false,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
