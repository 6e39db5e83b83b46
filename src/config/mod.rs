use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::mysql::MySqlPoolOptions;

pub const DEFAULT_MIGRATION_PATH: &str = "migrations";
pub const DEFAULT_MAX_OPEN_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_IDLE_CONNECTIONS: u32 = 0;
pub const DEFAULT_MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(600);

/// Variable holding the connection string for [`MySql::from_environment`](crate::db::MySql::from_environment).
pub const ENVIRONMENT_VARIABLE: &str = "DATABASE_URL";

/// Pool and migration settings.
///
/// Start from [`Options::default`] and override fields with the builder
/// setters, or with [`Options::with`] for arbitrary option functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub migration_path: PathBuf,
    /// Upper bound on open connections. Zero falls back to the pool default.
    pub max_open_connections: u32,
    /// Connections kept warm in the pool, clamped to the open limit.
    pub max_idle_connections: u32,
    /// Age after which a connection is recycled. Zero means never.
    pub max_connection_lifetime: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            migration_path: PathBuf::from(DEFAULT_MIGRATION_PATH),
            max_open_connections: DEFAULT_MAX_OPEN_CONNECTIONS,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            max_connection_lifetime: DEFAULT_MAX_CONNECTION_LIFETIME,
        }
    }
}

impl Options {
    pub fn migration_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migration_path = path.into();
        self
    }

    pub fn max_open_connections(mut self, n: u32) -> Self {
        self.max_open_connections = n;
        self
    }

    pub fn max_idle_connections(mut self, n: u32) -> Self {
        self.max_idle_connections = n;
        self
    }

    pub fn max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_connection_lifetime = lifetime;
        self
    }

    /// Apply an option function.
    pub fn with(mut self, f: impl FnOnce(&mut Options)) -> Self {
        f(&mut self);
        self
    }

    /// Defaults overlaid with the `DATABASE_*` tuning variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            migration_path: lookup("DATABASE_MIGRATION_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.migration_path),
            max_open_connections: parse_or(
                &lookup,
                "DATABASE_MAX_OPEN_CONNECTIONS",
                defaults.max_open_connections,
            ),
            max_idle_connections: parse_or(
                &lookup,
                "DATABASE_MAX_IDLE_CONNECTIONS",
                defaults.max_idle_connections,
            ),
            max_connection_lifetime: Duration::from_secs(parse_or(
                &lookup,
                "DATABASE_MAX_CONNECTION_LIFETIME_SECS",
                defaults.max_connection_lifetime.as_secs(),
            )),
        }
    }

    /// Translate into sqlx pool options.
    pub(crate) fn pool_options(&self) -> MySqlPoolOptions {
        let mut pool = MySqlPoolOptions::new();
        if self.max_open_connections > 0 {
            pool = pool.max_connections(self.max_open_connections);
        }
        let max_connections = pool.get_max_connections();
        let max_lifetime = if self.max_connection_lifetime.is_zero() {
            None
        } else {
            Some(self.max_connection_lifetime)
        };

        pool.min_connections(self.max_idle_connections.min(max_connections))
            .max_lifetime(max_lifetime)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, default = %default, "Invalid setting, using default");
            default
        }
    }
}
