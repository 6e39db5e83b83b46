//! MySQL connection pool with schema migrations to a target version.
//!
//! Pooling comes from `sqlx::MySqlPool` and migrations from `sqlx::migrate`;
//! this crate wires the pool limits and the migration directory together
//! behind [`MySql`].

pub mod config;
pub mod db;
pub mod errors;

pub use config::Options;
pub use db::MySql;
pub use errors::Error;
