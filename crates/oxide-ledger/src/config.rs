//! Ledger configuration.
//!
//! Configuration is read from a TOML file:
//!
//! ```toml
//! migration_table = "propel_migration"
//! migration_dir = "migrations"
//! schema = "sequential"
//!
//! [naming]
//! prefix = "PropelMigration_"
//! extension = "rs"
//!
//! [datasources.bookstore]
//! dsn = "sqlite:data/{datasource}.db"
//! platform = "sqlite"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;
use crate::generator::NamingConvention;
use crate::ledger::LedgerSchema;

/// Default name of the tracking table.
pub const DEFAULT_MIGRATION_TABLE: &str = "propel_migration";

/// Default directory holding migration unit files.
pub const DEFAULT_MIGRATION_DIR: &str = "migrations";

/// Token in a DSN template replaced by the datasource name.
pub const DSN_PLACEHOLDER: &str = "{datasource}";

/// Connection parameters of one named datasource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasourceConfig {
    /// Connection string template; may contain [`DSN_PLACEHOLDER`].
    pub dsn: String,
    /// Engine identifier (e.g. `sqlite`, `pgsql`, `mysql`).
    pub platform: String,
}

impl DatasourceConfig {
    /// Creates a datasource configuration.
    #[must_use]
    pub fn new(dsn: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            platform: platform.into(),
        }
    }

    /// Returns the DSN with the placeholder replaced by `name`.
    #[must_use]
    pub fn dsn_for(&self, name: &str) -> String {
        self.dsn.replace(DSN_PLACEHOLDER, name)
    }
}

/// Top-level ledger configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Name of the tracking table in every datasource.
    #[serde(default = "default_migration_table")]
    pub migration_table: String,
    /// Directory scanned for migration unit files.
    #[serde(default = "default_migration_dir")]
    pub migration_dir: PathBuf,
    /// Layout of the tracking table.
    #[serde(default)]
    pub schema: LedgerSchema,
    /// Naming convention of migration units.
    #[serde(default)]
    pub naming: NamingConvention,
    /// Datasources keyed by name.
    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceConfig>,
}

fn default_migration_table() -> String {
    DEFAULT_MIGRATION_TABLE.to_string()
}

fn default_migration_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MIGRATION_DIR)
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            migration_table: default_migration_table(),
            migration_dir: default_migration_dir(),
            schema: LedgerSchema::default(),
            naming: NamingConvention::default(),
            datasources: BTreeMap::new(),
        }
    }
}

impl LedgerConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
