//! Crate error type.
//!
//! Failures from sqlx are passed through unchanged; only the conditions this
//! crate detects on its own get dedicated variants.

use sqlx::migrate::MigrateError;

/// Errors returned by [`MySql`](crate::db::MySql) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("environment variable {0} not set")]
    MissingEnvironment(&'static str),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] MigrateError),

    /// An applied migration has to be reverted but has no down script.
    #[error("migration {0} has no down migration and cannot be reverted")]
    Irreversible(i64),

    #[error("migration version {0} is out of range")]
    VersionOutOfRange(u64),
}

impl Error {
    /// Check if this error came from an unset connection-string variable.
    pub fn is_missing_environment(&self) -> bool {
        matches!(self, Self::MissingEnvironment(_))
    }

    /// Check if the pool was already closed when the operation ran.
    pub fn is_pool_closed(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::PoolClosed))
    }
}
