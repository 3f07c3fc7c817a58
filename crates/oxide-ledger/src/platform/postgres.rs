//! PostgreSQL platform.

use crate::schema::SqlType;

use super::{database_code, Platform};

/// SQLSTATE `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL platform adapter.
#[derive(Debug, Clone, Default)]
pub struct PostgresPlatform;

impl PostgresPlatform {
    /// Creates a new PostgreSQL platform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn boxed() -> Box<dyn Platform> {
        Box::new(Self::new())
    }
}

impl Platform for PostgresPlatform {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn type_name(&self, sql_type: SqlType, auto_increment: bool) -> String {
        match (sql_type, auto_increment) {
            (SqlType::Integer, true) => "SERIAL".to_string(),
            (SqlType::BigInt, true) => "BIGSERIAL".to_string(),
            (SqlType::Integer, false) => "INTEGER".to_string(),
            (SqlType::BigInt, false) => "BIGINT".to_string(),
            (SqlType::Varchar(len), _) => format!("VARCHAR({})", len),
            (SqlType::Text, _) => "TEXT".to_string(),
        }
    }

    fn auto_increment_keyword(&self) -> Option<&'static str> {
        None
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn is_table_absent(&self, error: &sqlx::Error) -> bool {
        database_code(error).is_some_and(|code| code == UNDEFINED_TABLE)
    }
}
