//! MySQL / MariaDB platform.

use crate::schema::SqlType;

use super::{database_code, Platform};

/// SQLSTATE for "base table or view not found".
const TABLE_NOT_FOUND: &str = "42S02";

/// MySQL platform adapter.
#[derive(Debug, Clone, Default)]
pub struct MySqlPlatform;

impl MySqlPlatform {
    /// Creates a new MySQL platform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn boxed() -> Box<dyn Platform> {
        Box::new(Self::new())
    }
}

impl Platform for MySqlPlatform {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn type_name(&self, sql_type: SqlType, _auto_increment: bool) -> String {
        match sql_type {
            SqlType::Integer => "INT".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Varchar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
        }
    }

    fn auto_increment_keyword(&self) -> Option<&'static str> {
        Some("AUTO_INCREMENT")
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn is_table_absent(&self, error: &sqlx::Error) -> bool {
        database_code(error).is_some_and(|code| code == TABLE_NOT_FOUND)
    }
}
