//! SQLite platform.
//!
//! SQLite stores every integer as a 64-bit `INTEGER`, and only a column
//! declared exactly `INTEGER PRIMARY KEY` may carry `AUTOINCREMENT`.

use crate::schema::SqlType;

use super::Platform;

/// SQLite platform adapter.
#[derive(Debug, Clone, Default)]
pub struct SqlitePlatform;

impl SqlitePlatform {
    /// Creates a new SQLite platform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn boxed() -> Box<dyn Platform> {
        Box::new(Self::new())
    }
}

impl Platform for SqlitePlatform {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, sql_type: SqlType, _auto_increment: bool) -> String {
        match sql_type {
            SqlType::Integer | SqlType::BigInt => "INTEGER".to_string(),
            SqlType::Varchar(_) | SqlType::Text => "TEXT".to_string(),
        }
    }

    fn auto_increment_keyword(&self) -> Option<&'static str> {
        Some("AUTOINCREMENT")
    }

    fn is_table_absent(&self, error: &sqlx::Error) -> bool {
        match error {
            sqlx::Error::Database(db) => db.message().starts_with("no such table"),
            _ => false,
        }
    }
}
