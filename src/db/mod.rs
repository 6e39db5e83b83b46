//! Database connection pool and migration utilities.

mod migrate;

use std::env;
use std::fmt;

use sqlx::MySqlPool;

use crate::config::{Options, ENVIRONMENT_VARIABLE};
use crate::errors::Error;

/// Create a MySQL connection pool configured from `options`.
pub async fn create_pool(dsn: &str, options: &Options) -> Result<MySqlPool, sqlx::Error> {
    options.pool_options().connect(dsn).await
}

/// A MySQL connection pool plus the settings needed to migrate its schema.
///
/// The pool is safe to share between tasks. [`MySql::close`] consumes the
/// handle; clones of the pool taken from [`MySql::db`] fail with
/// `sqlx::Error::PoolClosed` afterwards.
pub struct MySql {
    pool: MySqlPool,
    dsn: String,
    options: Options,
}

impl MySql {
    /// Connect using `dsn` and configure the pool from `options`.
    ///
    /// Fails if the initial connection cannot be established.
    pub async fn connect(dsn: &str, options: Options) -> Result<Self, Error> {
        let pool = create_pool(dsn, &options).await?;
        tracing::info!(
            max_open_connections = pool.options().get_max_connections(),
            max_idle_connections = pool.options().get_min_connections(),
            migration_path = %options.migration_path.display(),
            "Database pool ready"
        );
        Ok(Self {
            pool,
            dsn: dsn.to_string(),
            options,
        })
    }

    /// Build the pool without connecting; connections open on first use.
    pub fn connect_lazy(dsn: &str, options: Options) -> Result<Self, Error> {
        let pool = options.pool_options().connect_lazy(dsn)?;
        Ok(Self {
            pool,
            dsn: dsn.to_string(),
            options,
        })
    }

    /// Connect using the DSN stored in `DATABASE_URL`.
    pub async fn from_environment(options: Options) -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok(), options).await
    }

    async fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        options: Options,
    ) -> Result<Self, Error> {
        let dsn = lookup(ENVIRONMENT_VARIABLE)
            .filter(|dsn| !dsn.is_empty())
            .ok_or(Error::MissingEnvironment(ENVIRONMENT_VARIABLE))?;
        Self::connect(&dsn, options).await
    }

    /// Move the schema up or down to `version`.
    ///
    /// Migrations are read from the configured migration path and run over a
    /// dedicated connection, not one from the pool. Being at `version`
    /// already is not an error. Version 0 reverts every migration.
    pub async fn migrate(&self, version: u64) -> Result<(), Error> {
        migrate::run(&self.dsn, &self.options.migration_path, version).await
    }

    /// Round-trip a trivial query through the pool.
    pub async fn ping(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::debug!("Database pool closed");
    }

    /// The underlying pool, for ad-hoc queries.
    pub fn db(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl fmt::Debug for MySql {
    // The DSN carries credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySql")
            .field("pool", &self.pool)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
