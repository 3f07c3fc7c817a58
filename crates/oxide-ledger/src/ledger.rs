//! Migration ledger.
//!
//! Every datasource carries its own tracking table recording which migration
//! units ran against it. The table is created on demand: reads that hit a
//! missing table create it and report an empty ledger instead of failing.
//! Uniqueness of the migration name is enforced by the table itself, never
//! pre-checked, so concurrent writers cannot both record the same unit.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use sqlx::AnyPool;
use tracing::{debug, info};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::platform::Platform;
use crate::registry::ConnectionRegistry;
use crate::schema::{ColumnSchema, SqlType, TableSchema};

/// Layout of the tracking table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerSchema {
    /// `migration` primary key plus a `batch` number per run.
    Batched,
    /// Auto-increment `id` primary key plus a unique `migration`.
    #[default]
    Sequential,
}

/// One row of a tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Surrogate id (sequential layout only).
    pub id: Option<i64>,
    /// Migration unit name.
    pub migration: String,
    /// Batch number (batched layout only).
    pub batch: Option<i64>,
}

/// Outcome of a read against a table that may not exist yet.
enum Read<T> {
    Rows(T),
    TableAbsent,
}

/// Splits "table absent" from every other failure.
fn classify<T>(
    platform: &dyn Platform,
    result: std::result::Result<T, sqlx::Error>,
) -> Result<Read<T>> {
    match result {
        Ok(rows) => Ok(Read::Rows(rows)),
        Err(e) if platform.is_table_absent(&e) => Ok(Read::TableAbsent),
        Err(e) => Err(e.into()),
    }
}

/// A resolved datasource: its connection and platform.
struct Target<'a> {
    name: &'a str,
    pool: AnyPool,
    platform: Box<dyn Platform>,
}

/// Tracking tables of every registered datasource.
#[derive(Debug)]
pub struct Ledger {
    connections: ConnectionRegistry,
    table: String,
    schema: LedgerSchema,
}

impl Ledger {
    /// Creates a ledger over `connections`.
    pub fn new(connections: ConnectionRegistry, table: impl Into<String>, schema: LedgerSchema) -> Self {
        Self {
            connections,
            table: table.into(),
            schema,
        }
    }

    /// Creates a ledger from a configuration file's contents.
    #[must_use]
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(
            ConnectionRegistry::new(config.datasources.clone()),
            config.migration_table.clone(),
            config.schema,
        )
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Returns the connection registry for reconfiguration.
    pub fn connections_mut(&mut self) -> &mut ConnectionRegistry {
        &mut self.connections
    }

    /// Returns the tracking table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the tracking table layout.
    #[must_use]
    pub fn schema(&self) -> LedgerSchema {
        self.schema
    }

    /// Returns the abstract definition of the tracking table.
    #[must_use]
    pub fn table_definition(&self) -> TableSchema {
        let table = TableSchema::new(&self.table);
        match self.schema {
            LedgerSchema::Batched => table
                .column(
                    ColumnSchema::new("migration", SqlType::Varchar(255))
                        .primary_key()
                        .not_null(),
                )
                .column(ColumnSchema::new("batch", SqlType::BigInt).not_null()),
            LedgerSchema::Sequential => table
                .column(
                    ColumnSchema::new("id", SqlType::BigInt)
                        .primary_key()
                        .auto_increment(),
                )
                .column(
                    ColumnSchema::new("migration", SqlType::Varchar(255))
                        .not_null()
                        .unique(),
                ),
        }
    }

    /// Creates the tracking table of a datasource unless it exists.
    pub async fn ensure_table_exists(&self, datasource: &str) -> Result<()> {
        let target = self.target(datasource).await?;
        if !self.probe(&target).await? {
            self.create_table(&target).await?;
        }
        Ok(())
    }

    /// Returns whether the tracking table of a datasource exists.
    pub async fn table_exists(&self, datasource: &str) -> Result<bool> {
        let target = self.target(datasource).await?;
        self.probe(&target).await
    }

    /// Returns the migration names recorded for a datasource.
    pub async fn list_executed(&self, datasource: &str) -> Result<BTreeSet<String>> {
        let target = self.target(datasource).await?;
        let sql = format!(
            "SELECT {} FROM {}",
            target.platform.quote_identifier("migration"),
            target.platform.quote_identifier(&self.table)
        );

        let rows = sqlx::query_as::<_, (String,)>(&sql)
            .fetch_all(&target.pool)
            .await;
        match classify(target.platform.as_ref(), rows)? {
            Read::Rows(rows) => Ok(rows.into_iter().map(|(name,)| name).collect()),
            Read::TableAbsent => {
                self.create_table(&target).await?;
                Ok(BTreeSet::new())
            }
        }
    }

    /// Returns the union of the migration names recorded by all datasources.
    pub async fn list_executed_across_all(&self) -> Result<BTreeSet<String>> {
        if self.connections.is_empty() {
            return Err(LedgerError::ConfigurationMissing);
        }

        let mut executed = BTreeSet::new();
        for datasource in self.connections.names() {
            executed.extend(self.list_executed(datasource).await?);
        }
        Ok(executed)
    }

    /// Returns every row of a datasource's ledger, oldest first.
    pub async fn entries(&self, datasource: &str) -> Result<Vec<LedgerEntry>> {
        let target = self.target(datasource).await?;
        let q = |ident: &str| target.platform.quote_identifier(ident);

        let result = match self.schema {
            LedgerSchema::Sequential => {
                let sql = format!(
                    "SELECT {id}, {migration} FROM {table} ORDER BY {id}",
                    id = q("id"),
                    migration = q("migration"),
                    table = q(&self.table)
                );
                sqlx::query_as::<_, (i64, String)>(&sql)
                    .fetch_all(&target.pool)
                    .await
                    .map(|rows| {
                        rows.into_iter()
                            .map(|(id, migration)| LedgerEntry {
                                id: Some(id),
                                migration,
                                batch: None,
                            })
                            .collect::<Vec<_>>()
                    })
            }
            LedgerSchema::Batched => {
                let sql = format!(
                    "SELECT {migration}, {batch} FROM {table} \
                     ORDER BY {batch}, LENGTH({migration}), {migration}",
                    migration = q("migration"),
                    batch = q("batch"),
                    table = q(&self.table)
                );
                sqlx::query_as::<_, (String, i64)>(&sql)
                    .fetch_all(&target.pool)
                    .await
                    .map(|rows| {
                        rows.into_iter()
                            .map(|(migration, batch)| LedgerEntry {
                                id: None,
                                migration,
                                batch: Some(batch),
                            })
                            .collect::<Vec<_>>()
                    })
            }
        };

        match classify(target.platform.as_ref(), result)? {
            Read::Rows(entries) => Ok(entries),
            Read::TableAbsent => {
                self.create_table(&target).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Returns the most recently recorded migration of a datasource.
    ///
    /// The sequential layout orders by surrogate id. The batched layout has
    /// no id and orders by batch, then by name length and name, which is
    /// timestamp order for names sharing a prefix.
    pub async fn latest_executed(&self, datasource: &str) -> Result<Option<String>> {
        let target = self.target(datasource).await?;
        let q = |ident: &str| target.platform.quote_identifier(ident);

        let order = match self.schema {
            LedgerSchema::Sequential => format!("{} DESC", q("id")),
            LedgerSchema::Batched => format!(
                "{batch} DESC, LENGTH({migration}) DESC, {migration} DESC",
                batch = q("batch"),
                migration = q("migration")
            ),
        };
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT 1",
            q("migration"),
            q(&self.table),
            order
        );

        let row = sqlx::query_as::<_, (String,)>(&sql)
            .fetch_optional(&target.pool)
            .await;
        match classify(target.platform.as_ref(), row)? {
            Read::Rows(row) => Ok(row.map(|(name,)| name)),
            Read::TableAbsent => {
                self.create_table(&target).await?;
                Ok(None)
            }
        }
    }

    /// Returns the latest recorded migration of every datasource.
    pub async fn latest_per_datasource(&self) -> Result<BTreeMap<String, Option<String>>> {
        if self.connections.is_empty() {
            return Err(LedgerError::ConfigurationMissing);
        }

        let mut latest = BTreeMap::new();
        for datasource in self.connections.names() {
            latest.insert(datasource.to_string(), self.latest_executed(datasource).await?);
        }
        Ok(latest)
    }

    /// Returns the batch number the next run should use.
    ///
    /// Always `None` for the sequential layout, which records no batches.
    pub async fn next_batch(&self, datasource: &str) -> Result<Option<i64>> {
        if self.schema == LedgerSchema::Sequential {
            return Ok(None);
        }

        let target = self.target(datasource).await?;
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            target.platform.quote_identifier("batch"),
            target.platform.quote_identifier(&self.table)
        );
        let row = sqlx::query_as::<_, (Option<i64>,)>(&sql)
            .fetch_one(&target.pool)
            .await;
        match classify(target.platform.as_ref(), row)? {
            Read::Rows((max,)) => Ok(Some(max.unwrap_or(0) + 1)),
            Read::TableAbsent => {
                self.create_table(&target).await?;
                Ok(Some(1))
            }
        }
    }

    /// Records a migration as applied to a datasource.
    ///
    /// In the batched layout a missing `batch` defaults to
    /// [`next_batch`](Self::next_batch); the sequential layout ignores it.
    /// Recording a name twice fails with [`LedgerError::DuplicateMigration`].
    pub async fn record_applied(
        &self,
        datasource: &str,
        migration: &str,
        batch: Option<i64>,
    ) -> Result<()> {
        let batch = match (self.schema, batch) {
            (LedgerSchema::Batched, Some(batch)) => Some(batch),
            (LedgerSchema::Batched, None) => self.next_batch(datasource).await?,
            (LedgerSchema::Sequential, batch) => {
                if batch.is_some() {
                    debug!(datasource = %datasource, "Sequential ledger ignores batch numbers");
                }
                None
            }
        };

        let target = self.target(datasource).await?;
        match self.insert(&target, migration, batch).await {
            Ok(()) => {}
            Err(e) if target.platform.is_table_absent(&e) => {
                self.create_table(&target).await?;
                self.insert(&target, migration, batch)
                    .await
                    .map_err(|e| insert_error(e, datasource, migration))?;
            }
            Err(e) => return Err(insert_error(e, datasource, migration)),
        }

        info!(datasource = %datasource, migration = %migration, "Recorded migration");
        Ok(())
    }

    /// Removes a migration from a datasource's ledger.
    ///
    /// Returns the number of removed rows; removing an unknown name is a
    /// no-op.
    pub async fn record_reverted(&self, datasource: &str, migration: &str) -> Result<u64> {
        let target = self.target(datasource).await?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            target.platform.quote_identifier(&self.table),
            target.platform.quote_identifier("migration"),
            target.platform.placeholder(1)
        );

        let result = sqlx::query(&sql)
            .bind(migration)
            .execute(&target.pool)
            .await
            .map(|done| done.rows_affected());
        let removed = match classify(target.platform.as_ref(), result)? {
            Read::Rows(removed) => removed,
            Read::TableAbsent => {
                self.create_table(&target).await?;
                0
            }
        };

        if removed == 0 {
            debug!(datasource = %datasource, migration = %migration, "Nothing to remove");
        } else {
            info!(datasource = %datasource, migration = %migration, "Removed migration");
        }
        Ok(removed)
    }

    async fn target<'a>(&self, datasource: &'a str) -> Result<Target<'a>> {
        let platform = self.connections.platform_for(datasource)?;
        let pool = self.connections.connection_for(datasource).await?;
        Ok(Target {
            name: datasource,
            pool,
            platform,
        })
    }

    /// Trial read against the tracking table.
    async fn probe(&self, target: &Target<'_>) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            target.platform.quote_identifier(&self.table)
        );
        let result = sqlx::query_as::<_, (i64,)>(&sql)
            .fetch_one(&target.pool)
            .await;
        Ok(matches!(
            classify(target.platform.as_ref(), result)?,
            Read::Rows(_)
        ))
    }

    async fn create_table(&self, target: &Target<'_>) -> Result<()> {
        let statements = target
            .platform
            .render_create_table(&self.table_definition());
        for sql in statements {
            debug!(datasource = %target.name, sql = %sql, "Executing SQL");
            sqlx::query(&sql)
                .execute(&target.pool)
                .await
                .map_err(|source| LedgerError::LedgerInit {
                    datasource: target.name.to_string(),
                    source,
                })?;
        }

        info!(
            datasource = %target.name,
            table = %self.table,
            platform = target.platform.name(),
            "Created ledger table"
        );
        Ok(())
    }

    async fn insert(
        &self,
        target: &Target<'_>,
        migration: &str,
        batch: Option<i64>,
    ) -> std::result::Result<(), sqlx::Error> {
        let p = &target.platform;
        match batch {
            Some(batch) => {
                let sql = format!(
                    "INSERT INTO {} ({}, {}) VALUES ({}, {})",
                    p.quote_identifier(&self.table),
                    p.quote_identifier("migration"),
                    p.quote_identifier("batch"),
                    p.placeholder(1),
                    p.placeholder(2)
                );
                sqlx::query(&sql)
                    .bind(migration)
                    .bind(batch)
                    .execute(&target.pool)
                    .await?;
            }
            None => {
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    p.quote_identifier(&self.table),
                    p.quote_identifier("migration"),
                    p.placeholder(1)
                );
                sqlx::query(&sql)
                    .bind(migration)
                    .execute(&target.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

fn insert_error(error: sqlx::Error, datasource: &str, migration: &str) -> LedgerError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => LedgerError::DuplicateMigration {
            datasource: datasource.to_string(),
            migration: migration.to_string(),
        },
        _ => LedgerError::Database(error),
    }
}
