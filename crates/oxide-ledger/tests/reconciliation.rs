//! End-to-end reconciliation scenarios against in-memory SQLite.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use oxide_ledger::generator::read_unit_file;
use oxide_ledger::prelude::*;

fn memory_ledger(names: &[&str]) -> Ledger {
    let configs: BTreeMap<String, DatasourceConfig> = names
        .iter()
        .map(|name| {
            (
                (*name).to_string(),
                DatasourceConfig::new("sqlite::memory:", "sqlite"),
            )
        })
        .collect();
    Ledger::new(
        ConnectionRegistry::new(configs),
        "propel_migration",
        LedgerSchema::Sequential,
    )
}

fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), "").unwrap();
}

fn set(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

#[tokio::test]
async fn test_one_pending_unit() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "PropelMigration_1000.php");
    touch(dir.path(), "PropelMigration_2000.php");
    touch(dir.path(), "notes.txt");

    let migrator = Migrator::new(memory_ledger(&["bookstore"]), dir.path())
        .naming(NamingConvention::new("PropelMigration_", "php"));
    migrator
        .ledger()
        .record_applied("bookstore", "PropelMigration_1000", None)
        .await
        .unwrap();

    assert_eq!(migrator.pending().await.unwrap(), vec!["PropelMigration_2000"]);
    assert!(migrator.has_pending_migrations().await.unwrap());
}

#[tokio::test]
async fn test_nothing_discovered_nothing_pending() {
    let dir = tempfile::tempdir().unwrap();
    let migrator = Migrator::new(memory_ledger(&["bookstore"]), dir.path());

    assert!(migrator.pending().await.unwrap().is_empty());
    assert!(!migrator.has_pending_migrations().await.unwrap());
}

#[test]
fn test_generated_unit_embeds_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let mut up = SqlPayloads::new();
    up.insert("db1".to_string(), "CREATE TABLE t(...)".to_string());
    let mut down = SqlPayloads::new();
    down.insert("db1".to_string(), "DROP TABLE t".to_string());

    let convention = NamingConvention::default();
    let body = generate_unit_body(&convention, &up, &down, 1_700_000_000, "alice").unwrap();
    assert!(body.contains("1700000000"));
    assert!(body.contains("alice"));

    let path = write_unit(dir.path(), &convention, &up, &down, 1_700_000_000, "alice").unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), body);
    let (read_up, read_down) = read_unit_file(&path).unwrap();
    assert_eq!(read_up, up);
    assert_eq!(read_down, down);
}

#[tokio::test]
async fn test_listing_heals_absent_table() {
    let ledger = memory_ledger(&["bookstore"]);
    assert!(!ledger.table_exists("bookstore").await.unwrap());

    assert!(ledger.list_executed("bookstore").await.unwrap().is_empty());
    assert!(ledger.table_exists("bookstore").await.unwrap());
}

#[tokio::test]
async fn test_union_across_datasources() {
    let ledger = memory_ledger(&["ds1", "ds2"]);
    for (datasource, name) in [("ds1", "A"), ("ds1", "B"), ("ds2", "B"), ("ds2", "C")] {
        ledger.record_applied(datasource, name, None).await.unwrap();
    }

    assert_eq!(
        ledger.list_executed_across_all().await.unwrap(),
        set(&["A", "B", "C"])
    );
}

#[tokio::test]
async fn test_apply_then_listing_is_stable() {
    let ledger = memory_ledger(&["bookstore"]);
    ledger
        .record_applied("bookstore", "PropelMigration_1", None)
        .await
        .unwrap();

    for _ in 0..3 {
        assert_eq!(
            ledger.list_executed("bookstore").await.unwrap(),
            set(&["PropelMigration_1"])
        );
    }
}

#[tokio::test]
async fn test_duplicate_and_absent_revert_leave_rows_unchanged() {
    let ledger = memory_ledger(&["bookstore"]);
    ledger
        .record_applied("bookstore", "PropelMigration_1", None)
        .await
        .unwrap();

    let err = ledger
        .record_applied("bookstore", "PropelMigration_1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateMigration { .. }));

    assert_eq!(
        ledger
            .record_reverted("bookstore", "PropelMigration_404")
            .await
            .unwrap(),
        0
    );
    let entries = ledger.entries("bookstore").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].migration, "PropelMigration_1");
}

#[tokio::test]
async fn test_generate_apply_revert_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let convention = NamingConvention::default();
    let mut up = SqlPayloads::new();
    up.insert(
        "bookstore".to_string(),
        "CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT NOT NULL);".to_string(),
    );
    let mut down = SqlPayloads::new();
    down.insert("bookstore".to_string(), "DROP TABLE book;".to_string());
    write_unit(dir.path(), &convention, &up, &down, 1_700_000_000, "").unwrap();

    let migrator = Migrator::new(memory_ledger(&["bookstore"]), dir.path());
    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.into_result().unwrap().len(), 1);
    assert_eq!(
        migrator.ledger().latest_executed("bookstore").await.unwrap().as_deref(),
        Some("PropelMigration_1700000000")
    );

    migrator.revert_latest().await.unwrap().unwrap();
    assert!(migrator.ledger().list_executed("bookstore").await.unwrap().is_empty());
    assert_eq!(
        migrator.pending().await.unwrap(),
        vec!["PropelMigration_1700000000"]
    );
    assert!(migrator.revert_latest().await.unwrap().is_none());
}
