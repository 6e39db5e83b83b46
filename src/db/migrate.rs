//! Moving a schema up or down to a target version.
//!
//! Discovery, locking and statement execution belong to `sqlx::migrate`; this
//! module only decides which migrations to apply or revert so the schema lands
//! exactly on the requested version.

use std::path::Path;

use sqlx::migrate::{AppliedMigration, Migrate, MigrateError, Migration, MigrationType, Migrator};
use sqlx::mysql::MySqlConnection;
use sqlx::Connection;

use crate::errors::Error;

/// Steps needed to reach a target version.
#[derive(Debug)]
pub(crate) enum Plan<'a> {
    /// Already at the target.
    NoChange,
    /// Up migrations, ascending.
    Apply(Vec<&'a Migration>),
    /// Down migrations, descending.
    Revert(Vec<&'a Migration>),
}

fn is_up(migration: &Migration) -> bool {
    !matches!(migration.migration_type, MigrationType::ReversibleDown)
}

fn is_down(migration: &Migration) -> bool {
    matches!(migration.migration_type, MigrationType::ReversibleDown)
}

/// Target 0 means "revert everything"; any other target must name an up migration.
pub(crate) fn check_target(migrations: &[Migration], target: i64) -> Result<(), Error> {
    if target == 0 || migrations.iter().any(|m| m.version == target && is_up(m)) {
        Ok(())
    } else {
        Err(MigrateError::VersionNotPresent(target).into())
    }
}

/// Work out which migrations move the schema from its applied state to `target`.
pub(crate) fn plan<'a>(
    migrations: &'a [Migration],
    applied: &[AppliedMigration],
    target: i64,
) -> Result<Plan<'a>, Error> {
    check_target(migrations, target)?;

    for done in applied {
        let source = migrations
            .iter()
            .find(|m| m.version == done.version && is_up(m))
            .ok_or(MigrateError::VersionMissing(done.version))?;
        if source.checksum != done.checksum {
            return Err(MigrateError::VersionMismatch(done.version).into());
        }
    }

    let current = applied.iter().map(|m| m.version).max().unwrap_or(0);
    let is_applied = |version: i64| applied.iter().any(|m| m.version == version);

    if current == target {
        return Ok(Plan::NoChange);
    }

    if target > current {
        let mut steps: Vec<&Migration> = migrations
            .iter()
            .filter(|m| is_up(m) && m.version <= target && !is_applied(m.version))
            .collect();
        steps.sort_by_key(|m| m.version);
        return Ok(Plan::Apply(steps));
    }

    let mut versions: Vec<i64> = applied
        .iter()
        .map(|m| m.version)
        .filter(|&v| v > target)
        .collect();
    versions.sort_unstable_by(|a, b| b.cmp(a));

    let steps = versions
        .into_iter()
        .map(|version| {
            migrations
                .iter()
                .find(|m| m.version == version && is_down(m))
                .ok_or(Error::Irreversible(version))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Plan::Revert(steps))
}

/// Resolve migrations under `path` and move the database behind `dsn` to `version`.
///
/// Uses its own connection rather than one from the pool. Landing on the
/// current version is a no-op.
pub(crate) async fn run(dsn: &str, path: &Path, version: u64) -> Result<(), Error> {
    let target = i64::try_from(version).map_err(|_| Error::VersionOutOfRange(version))?;

    let migrator = Migrator::new(path).await?;
    let migrations: Vec<Migration> = migrator.iter().cloned().collect();
    check_target(&migrations, target)?;

    let mut conn = MySqlConnection::connect(dsn).await?;
    let result = migrate_locked(&mut conn, &migrations, target).await;
    let closed = conn.close().await;

    result?;
    closed?;
    Ok(())
}

async fn migrate_locked(
    conn: &mut MySqlConnection,
    migrations: &[Migration],
    target: i64,
) -> Result<(), Error> {
    conn.lock().await?;
    let result = migrate_to(conn, migrations, target).await;
    let unlocked = conn.unlock().await;

    result?;
    unlocked?;
    Ok(())
}

async fn migrate_to(
    conn: &mut MySqlConnection,
    migrations: &[Migration],
    target: i64,
) -> Result<(), Error> {
    conn.ensure_migrations_table().await?;

    if let Some(version) = conn.dirty_version().await? {
        return Err(MigrateError::Dirty(version).into());
    }

    let applied = conn.list_applied_migrations().await?;
    tracing::debug!(applied = applied.len(), target, "Planning migration");

    match plan(migrations, &applied, target)? {
        Plan::NoChange => {
            tracing::info!(version = target, "Schema already at target version, no change");
        }
        Plan::Apply(steps) => {
            for migration in steps {
                let elapsed = conn.apply(migration).await?;
                tracing::info!(
                    version = migration.version,
                    description = %migration.description,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Applied migration"
                );
            }
        }
        Plan::Revert(steps) => {
            for migration in steps {
                let elapsed = conn.revert(migration).await?;
                tracing::info!(
                    version = migration.version,
                    description = %migration.description,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Reverted migration"
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn migration(version: i64, kind: MigrationType) -> Migration {
        let sql = match kind {
            MigrationType::ReversibleDown => format!("DROP TABLE t{version};"),
            _ => format!("CREATE TABLE t{version} (id INT);"),
        };
        Migration::new(
            version,
            Cow::Owned(format!("table {version}")),
            kind,
            Cow::Owned(sql),
            false,
        )
    }

    fn reversible(versions: &[i64]) -> Vec<Migration> {
        versions
            .iter()
            .flat_map(|&v| {
                [
                    migration(v, MigrationType::ReversibleUp),
                    migration(v, MigrationType::ReversibleDown),
                ]
            })
            .collect()
    }

    fn applied(migrations: &[Migration], versions: &[i64]) -> Vec<AppliedMigration> {
        versions
            .iter()
            .map(|&v| {
                let source = migrations
                    .iter()
                    .find(|m| m.version == v && is_up(m))
                    .expect("test migration exists");
                AppliedMigration {
                    version: v,
                    checksum: source.checksum.clone(),
                }
            })
            .collect()
    }

    fn versions(steps: &[&Migration]) -> Vec<i64> {
        steps.iter().map(|m| m.version).collect()
    }

    #[test]
    fn already_at_target_is_no_change() {
        let migrations = reversible(&[1, 2, 3]);
        let done = applied(&migrations, &[1, 2, 3]);
        let plan = plan(&migrations, &done, 3).expect("plan");
        assert!(matches!(plan, Plan::NoChange));
    }

    #[test]
    fn empty_database_to_zero_is_no_change() {
        let migrations = reversible(&[1]);
        let plan = plan(&migrations, &[], 0).expect("plan");
        assert!(matches!(plan, Plan::NoChange));
    }

    #[test]
    fn up_stops_at_target() {
        let migrations = reversible(&[1, 2, 3, 4]);
        let done = applied(&migrations, &[1]);
        match plan(&migrations, &done, 3).expect("plan") {
            Plan::Apply(steps) => {
                assert_eq!(versions(&steps), vec![2, 3]);
                assert!(steps.iter().all(|m| is_up(m)));
            }
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn simple_migrations_apply() {
        let migrations = vec![
            migration(2, MigrationType::Simple),
            migration(1, MigrationType::Simple),
        ];
        match plan(&migrations, &[], 2).expect("plan") {
            Plan::Apply(steps) => assert_eq!(versions(&steps), vec![1, 2]),
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn down_reverts_newest_first() {
        let migrations = reversible(&[1, 2, 3]);
        let done = applied(&migrations, &[1, 2, 3]);
        match plan(&migrations, &done, 1).expect("plan") {
            Plan::Revert(steps) => {
                assert_eq!(versions(&steps), vec![3, 2]);
                assert!(steps.iter().all(|m| is_down(m)));
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn zero_reverts_everything() {
        let migrations = reversible(&[1, 2]);
        let done = applied(&migrations, &[1, 2]);
        match plan(&migrations, &done, 0).expect("plan") {
            Plan::Revert(steps) => assert_eq!(versions(&steps), vec![2, 1]),
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn unknown_target_rejected() {
        let migrations = reversible(&[1, 2]);
        let err = plan(&migrations, &[], 7).expect_err("target 7 does not exist");
        assert!(matches!(
            err,
            Error::Migrate(MigrateError::VersionNotPresent(7))
        ));
    }

    #[test]
    fn revert_without_down_script_fails() {
        let migrations = vec![
            migration(1, MigrationType::Simple),
            migration(2, MigrationType::Simple),
        ];
        let done = applied(&migrations, &[1, 2]);
        let err = plan(&migrations, &done, 1).expect_err("simple migrations are one-way");
        assert!(matches!(err, Error::Irreversible(2)));
    }

    #[test]
    fn applied_version_missing_from_source() {
        let migrations = reversible(&[1, 2]);
        let done = vec![AppliedMigration {
            version: 9,
            checksum: Cow::Owned(vec![0; 48]),
        }];
        let err = plan(&migrations, &done, 2).expect_err("9 is not on disk");
        assert!(matches!(err, Error::Migrate(MigrateError::VersionMissing(9))));
    }

    #[test]
    fn changed_migration_detected() {
        let migrations = reversible(&[1, 2]);
        let done = vec![AppliedMigration {
            version: 1,
            checksum: Cow::Owned(vec![0; 48]),
        }];
        let err = plan(&migrations, &done, 2).expect_err("checksum differs");
        assert!(matches!(
            err,
            Error::Migrate(MigrateError::VersionMismatch(1))
        ));
    }

    #[tokio::test]
    async fn version_out_of_range() {
        let err = run("mysql://localhost/none", Path::new("migrations"), u64::MAX)
            .await
            .expect_err("u64::MAX does not fit");
        assert!(matches!(err, Error::VersionOutOfRange(u64::MAX)));
    }

    #[tokio::test]
    async fn missing_directory_fails_before_connecting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        let err = run("mysql://localhost:1/none", &missing, 1)
            .await
            .expect_err("directory does not exist");
        assert!(matches!(err, Error::Migrate(MigrateError::Source(_))));
    }
}
