//! Migration orchestration.
//!
//! Ties discovery, the ledger and the reconciler together to apply pending
//! units and revert applied ones.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::discovery::discover;
use crate::error::{LedgerError, Result};
use crate::generator::NamingConvention;
use crate::ledger::Ledger;
use crate::reconcile;
use crate::unit::{FileUnit, MigrationUnit, UnitRegistry};

/// Discovered, executed and pending units at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Units found on disk, oldest first.
    pub discovered: Vec<String>,
    /// Units recorded by at least one datasource.
    pub executed: BTreeSet<String>,
    /// Discovered units not executed anywhere, oldest first.
    pub pending: Vec<String>,
}

/// One unit recorded in (or removed from) one datasource's ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    /// Datasource name.
    pub datasource: String,
    /// Unit name.
    pub migration: String,
}

/// Outcome of a migrate or revert run.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Steps that completed.
    pub completed: Vec<MigrationStep>,
    /// Failures that did not abort the run.
    pub failures: Vec<LedgerError>,
}

impl MigrationReport {
    /// Returns whether the run completed without failures.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turns collected failures into an error.
    pub fn into_result(self) -> Result<Vec<MigrationStep>> {
        if self.failures.is_empty() {
            Ok(self.completed)
        } else {
            Err(LedgerError::Multiple(self.failures))
        }
    }
}

/// Applies and reverts migration units against the ledger.
#[derive(Debug)]
pub struct Migrator {
    ledger: Ledger,
    units: UnitRegistry,
    convention: NamingConvention,
    migration_dir: PathBuf,
}

impl Migrator {
    /// Creates a migrator reading unit files from `migration_dir`.
    pub fn new(ledger: Ledger, migration_dir: impl Into<PathBuf>) -> Self {
        Self {
            ledger,
            units: UnitRegistry::new(),
            convention: NamingConvention::default(),
            migration_dir: migration_dir.into(),
        }
    }

    /// Creates a migrator from a configuration.
    #[must_use]
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(Ledger::from_config(config), config.migration_dir.clone())
            .naming(config.naming.clone())
    }

    /// Sets the compiled units, preferred over unit files.
    #[must_use]
    pub fn units(mut self, units: UnitRegistry) -> Self {
        self.units = units;
        self
    }

    /// Sets the naming convention.
    #[must_use]
    pub fn naming(mut self, convention: NamingConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Returns the naming convention.
    #[must_use]
    pub fn convention(&self) -> &NamingConvention {
        &self.convention
    }

    /// Returns the migration directory.
    #[must_use]
    pub fn migration_dir(&self) -> &Path {
        &self.migration_dir
    }

    /// Returns the units found on disk, oldest first.
    pub fn discovered(&self) -> Result<Vec<String>> {
        let mut names = discover(&self.migration_dir, &self.convention)?;
        reconcile::sort_chronologically(&mut names, &self.convention);
        Ok(names)
    }

    /// Returns the current reconciliation state.
    pub async fn status(&self) -> Result<MigrationStatus> {
        let discovered = self.discovered()?;
        let executed = self.ledger.list_executed_across_all().await?;
        let pending = reconcile::pending(&discovered, &executed);
        Ok(MigrationStatus {
            discovered,
            executed,
            pending,
        })
    }

    /// Returns the units not yet executed, oldest first.
    pub async fn pending(&self) -> Result<Vec<String>> {
        Ok(self.status().await?.pending)
    }

    /// Returns whether any unit is waiting to be applied.
    pub async fn has_pending_migrations(&self) -> Result<bool> {
        let discovered = self.discovered()?;
        let executed = self.ledger.list_executed_across_all().await?;
        Ok(reconcile::has_pending(&discovered, &executed))
    }

    /// Returns the most recent unit recorded by any datasource.
    pub async fn latest_applied(&self) -> Result<Option<String>> {
        let latest = self.ledger.latest_per_datasource().await?;
        Ok(
            reconcile::latest(latest.values().flatten().map(String::as_str), &self.convention)
                .map(str::to_string),
        )
    }

    /// Resolves a unit by name: compiled units first, then the unit file.
    pub fn load_unit(&self, name: &str) -> Result<Box<dyn MigrationUnit>> {
        if let Some(unit) = self.units.create(name) {
            return Ok(unit);
        }

        let path = self
            .migration_dir
            .join(format!("{}.{}", name, self.convention.extension));
        if !path.is_file() {
            return Err(LedgerError::UnitNotFound(name.to_string()));
        }
        Ok(Box::new(FileUnit::load(name, &path)?))
    }

    /// Applies every pending unit, oldest first.
    ///
    /// A unit already recorded by a datasource is reported in
    /// [`MigrationReport::failures`] and the run continues; every other
    /// failure aborts the run.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        let pending = self.pending().await?;
        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(report);
        }

        let connections = self.ledger.connections();
        let mut batches: HashMap<String, Option<i64>> = HashMap::new();

        for name in &pending {
            let unit = self.load_unit(name)?;
            let payloads = unit.up_sql()?;
            if payloads.is_empty() {
                warn!(migration = %name, "Unit has no SQL for any datasource, nothing recorded");
                continue;
            }
            for datasource in payloads.keys() {
                connections.resolve(datasource)?;
            }

            info!(migration = %name, "Applying migration");
            unit.pre_up(connections).await?;

            for (datasource, sql) in &payloads {
                let batch = match batches.get(datasource) {
                    Some(batch) => *batch,
                    None => {
                        let batch = self.ledger.next_batch(datasource).await?;
                        batches.insert(datasource.clone(), batch);
                        batch
                    }
                };

                self.execute(datasource, sql).await?;
                match self.ledger.record_applied(datasource, name, batch).await {
                    Ok(()) => report.completed.push(MigrationStep {
                        datasource: datasource.clone(),
                        migration: name.clone(),
                    }),
                    Err(e @ LedgerError::DuplicateMigration { .. }) => {
                        warn!(datasource = %datasource, migration = %name, "Already recorded");
                        report.failures.push(e);
                    }
                    Err(e) => return Err(e),
                }
            }

            unit.post_up(connections).await?;
            info!(migration = %name, "Migration applied successfully");
        }

        Ok(report)
    }

    /// Reverts one unit: runs its down SQL, then removes it from every
    /// datasource's ledger.
    ///
    /// A unit no datasource recorded is skipped.
    pub async fn revert(&self, name: &str) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        let executed = self.ledger.list_executed_across_all().await?;
        if !executed.contains(name) {
            warn!(migration = %name, "Migration not applied, skipping rollback");
            return Ok(report);
        }

        let unit = self.load_unit(name)?;
        let payloads = unit.down_sql()?;
        let connections = self.ledger.connections();
        for datasource in payloads.keys() {
            connections.resolve(datasource)?;
        }

        info!(migration = %name, "Rolling back migration");
        unit.pre_down(connections).await?;

        for (datasource, sql) in &payloads {
            self.execute(datasource, sql).await?;
        }

        // A datasource can hold the unit without any down SQL for it.
        for datasource in connections.names() {
            if self.ledger.record_reverted(datasource, name).await? > 0 {
                report.completed.push(MigrationStep {
                    datasource: datasource.to_string(),
                    migration: name.to_string(),
                });
            }
        }

        unit.post_down(connections).await?;
        info!(migration = %name, "Migration rolled back successfully");
        Ok(report)
    }

    /// Reverts the most recent applied unit that still has a file.
    ///
    /// Returns `None` when nothing can be reverted.
    pub async fn revert_latest(&self) -> Result<Option<MigrationReport>> {
        let discovered = self.discovered()?;
        let executed = self.ledger.list_executed_across_all().await?;
        match reconcile::next_to_revert(&discovered, &executed, &self.convention) {
            Some(name) => Ok(Some(self.revert(name).await?)),
            None => {
                info!("No migration to revert");
                Ok(None)
            }
        }
    }

    /// Runs the statements of one payload in a transaction.
    async fn execute(&self, datasource: &str, sql: &str) -> Result<()> {
        let statements = split_statements(sql);
        if statements.is_empty() {
            return Ok(());
        }

        let pool = self.ledger.connections().connection_for(datasource).await?;
        let mut tx = pool.begin().await?;
        for statement in &statements {
            debug!(datasource = %datasource, sql = %statement, "Executing SQL");
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Splits SQL text into statements on top-level semicolons.
///
/// Semicolons inside quotes or comments do not split; comment-only and
/// empty statements are dropped.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                has_code = true;
                current.push(c);
                while let Some(inner) = chars.next() {
                    current.push(inner);
                    if inner == c {
                        // Doubled quote is an escaped quote.
                        if chars.peek() == Some(&c) {
                            current.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                current.push(' ');
            }
            ';' => {
                if has_code {
                    statements.push(current.trim().to_string());
                }
                current.clear();
                has_code = false;
            }
            _ => {
                if !c.is_whitespace() {
                    has_code = true;
                }
                current.push(c);
            }
        }
    }

    if has_code {
        statements.push(current.trim().to_string());
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::DatasourceConfig;
    use crate::generator::write_unit;
    use crate::ledger::LedgerSchema;
    use crate::registry::ConnectionRegistry;
    use crate::unit::{payloads_from_json, SqlPayloads};

    fn memory_ledger(names: &[&str], schema: LedgerSchema) -> Ledger {
        let configs = names
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    DatasourceConfig::new("sqlite::memory:", "sqlite"),
                )
            })
            .collect();
        Ledger::new(ConnectionRegistry::new(configs), "propel_migration", schema)
    }

    fn payloads(entries: &[(&str, &str)]) -> SqlPayloads {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    async fn table_exists(migrator: &Migrator, datasource: &str, table: &str) -> bool {
        let pool = migrator
            .ledger()
            .connections()
            .connection_for(datasource)
            .await
            .unwrap();
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&pool)
                .await
                .unwrap();
        row.is_some()
    }

    fn write_books_units(dir: &Path) {
        let convention = NamingConvention::default();
        write_unit(
            dir,
            &convention,
            &payloads(&[("bookstore", "CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT);")]),
            &payloads(&[("bookstore", "DROP TABLE book;")]),
            1000,
            "",
        )
        .unwrap();
        write_unit(
            dir,
            &convention,
            &payloads(&[(
                "bookstore",
                "CREATE TABLE author (id INTEGER PRIMARY KEY);\n\
                 ALTER TABLE book ADD COLUMN author_id INTEGER;",
            )]),
            &payloads(&[("bookstore", "DROP TABLE author;")]),
            20000,
            "",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_migrate_applies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_books_units(dir.path());
        let migrator = Migrator::new(
            memory_ledger(&["bookstore"], LedgerSchema::Sequential),
            dir.path(),
        );

        assert!(migrator.has_pending_migrations().await.unwrap());
        assert_eq!(
            migrator.pending().await.unwrap(),
            vec!["PropelMigration_1000", "PropelMigration_20000"]
        );

        let report = migrator.migrate().await.unwrap();
        assert!(report.is_clean());
        let applied: Vec<_> = report
            .completed
            .iter()
            .map(|s| s.migration.as_str())
            .collect();
        assert_eq!(applied, vec!["PropelMigration_1000", "PropelMigration_20000"]);

        assert!(table_exists(&migrator, "bookstore", "book").await);
        assert!(table_exists(&migrator, "bookstore", "author").await);
        assert!(!migrator.has_pending_migrations().await.unwrap());
        assert_eq!(
            migrator.latest_applied().await.unwrap().as_deref(),
            Some("PropelMigration_20000")
        );

        // Nothing left to do.
        let report = migrator.migrate().await.unwrap();
        assert!(report.completed.is_empty());
    }

    #[tokio::test]
    async fn test_batched_run_shares_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_books_units(dir.path());
        let migrator = Migrator::new(
            memory_ledger(&["bookstore"], LedgerSchema::Batched),
            dir.path(),
        );

        migrator.migrate().await.unwrap();
        let entries = migrator.ledger().entries("bookstore").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.batch == Some(1)));
    }

    #[tokio::test]
    async fn test_revert_latest() {
        let dir = tempfile::tempdir().unwrap();
        write_books_units(dir.path());
        let migrator = Migrator::new(
            memory_ledger(&["bookstore"], LedgerSchema::Sequential),
            dir.path(),
        );
        migrator.migrate().await.unwrap();

        let report = migrator.revert_latest().await.unwrap().unwrap();
        assert_eq!(
            report.completed,
            vec![MigrationStep {
                datasource: "bookstore".to_string(),
                migration: "PropelMigration_20000".to_string(),
            }]
        );
        assert!(!table_exists(&migrator, "bookstore", "author").await);
        assert!(table_exists(&migrator, "bookstore", "book").await);
        assert_eq!(
            migrator.pending().await.unwrap(),
            vec!["PropelMigration_20000"]
        );

        // Reverting an unapplied unit does nothing.
        let report = migrator.revert("PropelMigration_20000").await.unwrap();
        assert!(report.completed.is_empty());
    }

    #[tokio::test]
    async fn test_revert_clears_datasources_without_down_sql() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(
            dir.path(),
            &NamingConvention::default(),
            &payloads(&[
                ("a", "CREATE TABLE t (id INTEGER)"),
                ("b", "CREATE TABLE u (id INTEGER)"),
            ]),
            &payloads(&[("a", "DROP TABLE t")]),
            5,
            "",
        )
        .unwrap();
        let migrator = Migrator::new(
            memory_ledger(&["a", "b"], LedgerSchema::Sequential),
            dir.path(),
        );
        migrator.migrate().await.unwrap();

        let report = migrator.revert("PropelMigration_5").await.unwrap();
        let datasources: Vec<_> = report
            .completed
            .iter()
            .map(|s| s.datasource.as_str())
            .collect();
        assert_eq!(datasources, vec!["a", "b"]);

        let status = migrator.status().await.unwrap();
        assert!(status.executed.is_empty());
        assert_eq!(status.pending, vec!["PropelMigration_5"]);
        assert!(migrator.revert_latest().await.unwrap().is_none());
        assert!(!table_exists(&migrator, "a", "t").await);
    }

    #[tokio::test]
    async fn test_unknown_datasource_in_payload() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(
            dir.path(),
            &NamingConvention::default(),
            &payloads(&[("warehouse", "CREATE TABLE crate (id INTEGER)")]),
            &SqlPayloads::new(),
            1000,
            "",
        )
        .unwrap();
        let migrator = Migrator::new(
            memory_ledger(&["bookstore"], LedgerSchema::Sequential),
            dir.path(),
        );

        assert!(matches!(
            migrator.migrate().await,
            Err(LedgerError::UnknownDatasource(name)) if name == "warehouse"
        ));
        assert!(migrator.ledger().list_executed("bookstore").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_unit_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("PropelMigration_1000.rs"), "fn main() {}").unwrap();
        let migrator = Migrator::new(
            memory_ledger(&["bookstore"], LedgerSchema::Sequential),
            dir.path(),
        );

        assert!(matches!(
            migrator.migrate().await,
            Err(LedgerError::ParseError { .. })
        ));
    }

    static HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

    /// Simulates another process recording the unit in `a` while this run
    /// executes it.
    struct RacingUnit;

    #[async_trait]
    impl MigrationUnit for RacingUnit {
        fn name(&self) -> &str {
            "PropelMigration_5000"
        }

        fn up_sql(&self) -> Result<SqlPayloads> {
            payloads_from_json(r#"{"a": "", "b": ""}"#)
        }

        fn down_sql(&self) -> Result<SqlPayloads> {
            payloads_from_json("{}")
        }

        async fn pre_up(&self, connections: &ConnectionRegistry) -> Result<()> {
            HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
            let pool = connections.connection_for("a").await?;
            sqlx::query("INSERT INTO propel_migration (migration) VALUES ('PropelMigration_5000')")
                .execute(&pool)
                .await?;
            Ok(())
        }

        async fn post_up(&self, _connections: &ConnectionRegistry) -> Result<()> {
            HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_duplicate_does_not_abort_other_datasources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("PropelMigration_5000.rs"), "").unwrap();

        let migrator = Migrator::new(memory_ledger(&["a", "b"], LedgerSchema::Sequential), dir.path())
            .units(UnitRegistry::new().unit("PropelMigration_5000", || {
                Box::new(RacingUnit) as Box<dyn MigrationUnit>
            }));

        let report = migrator.migrate().await.unwrap();
        assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 2);
        assert_eq!(
            report.completed,
            vec![MigrationStep {
                datasource: "b".to_string(),
                migration: "PropelMigration_5000".to_string(),
            }]
        );
        assert!(matches!(
            report.failures.as_slice(),
            [LedgerError::DuplicateMigration { datasource, .. }] if datasource == "a"
        ));
        assert!(matches!(
            report.into_result(),
            Err(LedgerError::Multiple(errors)) if errors.len() == 1
        ));
    }

    #[test]
    fn test_load_unit_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let migrator = Migrator::new(memory_ledger(&[], LedgerSchema::Sequential), dir.path());
        assert!(matches!(
            migrator.load_unit("PropelMigration_1"),
            Err(LedgerError::UnitNotFound(_))
        ));
    }

    #[test]
    fn test_split_statements() {
        let sql = "CREATE TABLE a (x TEXT DEFAULT 'a;b');\n\
                   -- trailing; comment\n\
                   INSERT INTO a VALUES ('it''s; fine');\n\
                   /* block; comment */ DROP TABLE \"odd;name\";\n\
                   ;  \n";
        assert_eq!(
            split_statements(sql),
            vec![
                "CREATE TABLE a (x TEXT DEFAULT 'a;b')",
                "INSERT INTO a VALUES ('it''s; fine')",
                "DROP TABLE \"odd;name\"",
            ]
        );
        assert!(split_statements("-- only a comment").is_empty());
        assert_eq!(split_statements("SELECT 1"), vec!["SELECT 1"]);
    }
}
