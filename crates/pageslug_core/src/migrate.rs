use std::collections::BTreeSet;
use std::fs;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::runtime::ResolvedPaths;
use crate::sqlite::{open_connection, unix_timestamp};

/// One embedded schema step, applied at most once per database.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    sql: &'static str,
}

impl Migration {
    pub fn label(&self) -> String {
        format!("v{:03}_{}", self.version, self.name)
    }
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline",
        sql: include_str!("migrations/v001_baseline.sql"),
    },
    Migration {
        version: 2,
        name: "upgrade_wizards",
        sql: include_str!("migrations/v002_upgrade_wizards.sql"),
    },
    Migration {
        version: 3,
        name: "indexes",
        sql: include_str!("migrations/v003_indexes.sql"),
    },
];

const LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);";

#[derive(Debug, Clone)]
pub struct MigrateReport {
    pub applied: Vec<Migration>,
    pub current_version: u32,
}

/// Create the database at `paths.db_path` if needed and bring its schema up to date.
pub fn run_migrations(paths: &ResolvedPaths) -> Result<MigrateReport> {
    if let Some(parent) = paths.db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let connection = open_connection(&paths.db_path)?;
    migrate_connection(&connection)
}

/// Apply every embedded migration the ledger does not list yet, in version order.
pub fn migrate_connection(connection: &Connection) -> Result<MigrateReport> {
    let pending = pending_migrations(connection)?;
    for migration in &pending {
        apply(connection, migration)
            .with_context(|| format!("migration {} failed", migration.label()))?;
        log::info!("applied migration {}", migration.label());
    }

    Ok(MigrateReport {
        applied: pending,
        current_version: current_version(connection)?,
    })
}

/// Migrations not yet recorded in the database at `paths.db_path`.
pub fn pending_migration_count(paths: &ResolvedPaths) -> Result<usize> {
    if !paths.db_path.exists() {
        return Ok(MIGRATIONS.len());
    }
    let connection = open_connection(&paths.db_path)?;
    Ok(pending_migrations(&connection)?.len())
}

/// Highest recorded migration version; 0 for an unmigrated database.
pub fn current_version(connection: &Connection) -> Result<u32> {
    Ok(applied_versions(connection)?.last().copied().unwrap_or_default())
}

fn pending_migrations(connection: &Connection) -> Result<Vec<Migration>> {
    let applied = applied_versions(connection)?;
    Ok(MIGRATIONS
        .iter()
        .filter(|migration| !applied.contains(&migration.version))
        .copied()
        .collect())
}

fn applied_versions(connection: &Connection) -> Result<BTreeSet<u32>> {
    connection
        .execute_batch(LEDGER_SQL)
        .context("failed to create schema_migrations")?;
    let mut statement = connection
        .prepare("SELECT version FROM schema_migrations")
        .context("failed to read schema_migrations")?;
    let versions = statement
        .query_map([], |row| row.get::<_, i64>(0))
        .context("failed to read schema_migrations")?;

    let mut out = BTreeSet::new();
    for version in versions {
        let version = version.context("failed to decode schema_migrations row")?;
        out.insert(u32::try_from(version).context("migration version out of range")?);
    }
    Ok(out)
}

/// Runs the migration and its ledger entry in one transaction; dropping
/// the transaction on error rolls both back.
fn apply(connection: &Connection, migration: &Migration) -> Result<()> {
    let transaction = connection
        .unchecked_transaction()
        .context("failed to begin migration transaction")?;
    transaction
        .execute_batch(migration.sql)
        .context("schema statements failed")?;
    let applied_at = i64::try_from(unix_timestamp()?).context("timestamp out of range")?;
    transaction
        .execute(
            "INSERT INTO schema_migrations (version, name, applied_at_unix) VALUES (?1, ?2, ?3)",
            params![i64::from(migration.version), migration.name, applied_at],
        )
        .context("failed to record migration")?;
    transaction.commit().context("failed to commit migration")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::runtime::ValueSource;

    fn test_paths() -> (tempfile::TempDir, ResolvedPaths) {
        let temp = tempdir().expect("tempdir");
        let project_root = temp.path().join("project");
        let paths = ResolvedPaths {
            db_path: project_root.join(".pageslug/data/pageslug.db"),
            state_dir: project_root.join(".pageslug"),
            data_dir: project_root.join(".pageslug/data"),
            config_path: project_root.join(".pageslug/config.toml"),
            project_root,
            root_source: ValueSource::Flag,
            data_source: ValueSource::Default,
            config_source: ValueSource::Default,
            db_source: ValueSource::Default,
        };
        (temp, paths)
    }

    #[test]
    fn fresh_database_gets_every_migration() {
        let (_temp, paths) = test_paths();
        assert_eq!(
            pending_migration_count(&paths).expect("pending"),
            MIGRATIONS.len()
        );

        let report = run_migrations(&paths).expect("run_migrations");
        let labels: Vec<String> = report.applied.iter().map(Migration::label).collect();
        assert_eq!(
            labels,
            vec!["v001_baseline", "v002_upgrade_wizards", "v003_indexes"]
        );
        assert_eq!(report.current_version, 3);
        assert_eq!(pending_migration_count(&paths).expect("pending"), 0);
    }

    #[test]
    fn second_run_applies_nothing() {
        let (_temp, paths) = test_paths();
        run_migrations(&paths).expect("first run");
        let second = run_migrations(&paths).expect("second run");
        assert!(second.applied.is_empty());
        assert_eq!(second.current_version, 3);
    }

    #[test]
    fn missing_version_is_filled_in() {
        let (_temp, paths) = test_paths();
        run_migrations(&paths).expect("run_migrations");
        let connection = open_connection(&paths.db_path).expect("open");
        connection
            .execute_batch(
                "DROP TABLE upgrade_wizards; DELETE FROM schema_migrations WHERE version = 2;",
            )
            .expect("forget v002");

        let report = migrate_connection(&connection).expect("migrate");
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].version, 2);
        assert_eq!(report.current_version, 3);
    }

    #[test]
    fn failed_migration_is_rolled_back_whole() {
        let connection = Connection::open_in_memory().expect("open");
        connection
            .execute_batch(
                "CREATE TABLE pages (id INTEGER PRIMARY KEY, parent_id INTEGER, language_id INTEGER);",
            )
            .expect("legacy pages table");

        let error = migrate_connection(&connection).expect_err("must fail");
        assert!(error.to_string().contains("v003_indexes"));
        assert_eq!(current_version(&connection).expect("version"), 2);
        let partial: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_pages_parent'",
                [],
                |row| row.get(0),
            )
            .expect("count indexes");
        assert_eq!(partial, 0);
    }

    #[test]
    fn migrated_schema_has_page_and_wizard_tables() {
        let (_temp, paths) = test_paths();
        run_migrations(&paths).expect("run_migrations");
        let connection = open_connection(&paths.db_path).expect("open");
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('pages', 'upgrade_wizards')",
                [],
                |row| row.get(0),
            )
            .expect("count tables");
        assert_eq!(tables, 2);
    }
}
