//! Database platform adapters.
//!
//! A platform knows how to render DDL for an abstract [`TableSchema`], how to
//! quote identifiers and bind parameters for its engine, and how to recognize
//! the engine's "table does not exist" error.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlPlatform;
pub use postgres::PostgresPlatform;
pub use sqlite::SqlitePlatform;

use crate::schema::{ColumnSchema, SqlType, TableSchema};

/// Trait for engine-specific SQL generation and error classification.
pub trait Platform: Send + Sync {
    /// Returns the platform name.
    fn name(&self) -> &'static str;

    /// Returns the column type descriptor for the given type.
    ///
    /// `auto_increment` lets engines that encode auto-increment in the type
    /// (PostgreSQL `BIGSERIAL`) pick the right name.
    fn type_name(&self, sql_type: SqlType, auto_increment: bool) -> String;

    /// Returns the keyword appended to an auto-increment primary key, if the
    /// engine uses one.
    fn auto_increment_keyword(&self) -> Option<&'static str>;

    /// Returns whether the error reports a missing table.
    fn is_table_absent(&self, error: &sqlx::Error) -> bool;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Returns the bind placeholder for the 1-based parameter `index`.
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Generates column definition SQL.
    fn column_definition(&self, column: &ColumnSchema) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(column.sql_type, column.auto_increment),
        ];

        if column.primary_key {
            parts.push("PRIMARY KEY".to_string());
            if column.auto_increment {
                if let Some(keyword) = self.auto_increment_keyword() {
                    parts.push(keyword.to_string());
                }
            }
        }

        if !column.nullable && !column.primary_key {
            parts.push("NOT NULL".to_string());
        }

        if column.unique && !column.primary_key {
            parts.push("UNIQUE".to_string());
        }

        parts.join(" ")
    }

    /// Renders the statements creating `table`.
    fn render_create_table(&self, table: &TableSchema) -> Vec<String> {
        let col_defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();

        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            self.quote_identifier(&table.name),
            col_defs.join(",\n  ")
        )]
    }
}

/// Constructor of a platform adapter.
pub type PlatformFactory = fn() -> Box<dyn Platform>;

/// Engine identifiers (lowercase) and the adapters serving them.
const PLATFORMS: &[(&str, PlatformFactory)] = &[
    ("sqlite", SqlitePlatform::boxed),
    ("sqlite3", SqlitePlatform::boxed),
    ("pgsql", PostgresPlatform::boxed),
    ("postgres", PostgresPlatform::boxed),
    ("postgresql", PostgresPlatform::boxed),
    ("mysql", MySqlPlatform::boxed),
    ("mariadb", MySqlPlatform::boxed),
];

/// Instantiates the adapter for an engine identifier.
///
/// The identifier is matched case-insensitively, ignoring surrounding
/// whitespace. Returns `None` for engines without an adapter.
#[must_use]
pub fn platform_for_engine(engine: &str) -> Option<Box<dyn Platform>> {
    let normalized = engine.trim().to_ascii_lowercase();
    PLATFORMS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, factory)| factory())
}

/// Returns the database error code, if the error carries one.
pub(crate) fn database_code(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}
