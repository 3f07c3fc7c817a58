//! Migration units.
//!
//! A unit carries per-datasource SQL for both directions plus four lifecycle
//! hooks. Compiled units are registered by name in a [`UnitRegistry`]; units
//! only present as generated files are loaded as [`FileUnit`]s.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::generator::read_unit_file;
use crate::registry::ConnectionRegistry;

/// SQL text keyed by datasource name.
pub type SqlPayloads = BTreeMap<String, String>;

/// Deserializes the JSON payload constant of a generated unit.
pub fn payloads_from_json(json: &str) -> Result<SqlPayloads> {
    Ok(serde_json::from_str(json)?)
}

/// A schema-change package identified by a timestamp-derived name.
#[async_trait]
pub trait MigrationUnit: Send + Sync {
    /// Unit name (e.g. `PropelMigration_1700000000`).
    fn name(&self) -> &str;

    /// SQL applied when migrating up, keyed by datasource.
    fn up_sql(&self) -> Result<SqlPayloads>;

    /// SQL applied when migrating down, keyed by datasource.
    fn down_sql(&self) -> Result<SqlPayloads>;

    /// Runs once before any up SQL of the unit.
    async fn pre_up(&self, _connections: &ConnectionRegistry) -> Result<()> {
        Ok(())
    }

    /// Runs once after every datasource has run and recorded the up SQL.
    async fn post_up(&self, _connections: &ConnectionRegistry) -> Result<()> {
        Ok(())
    }

    /// Runs once before any down SQL of the unit.
    async fn pre_down(&self, _connections: &ConnectionRegistry) -> Result<()> {
        Ok(())
    }

    /// Runs once after every datasource has run the down SQL.
    async fn post_down(&self, _connections: &ConnectionRegistry) -> Result<()> {
        Ok(())
    }
}

/// Constructor of a compiled unit.
pub type UnitFactory = fn() -> Box<dyn MigrationUnit>;

/// Compiled units keyed by name.
#[derive(Debug, Default, Clone)]
pub struct UnitRegistry {
    factories: HashMap<String, UnitFactory>,
}

impl UnitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unit factory under `name`, replacing any previous one.
    #[must_use]
    pub fn unit(mut self, name: impl Into<String>, factory: UnitFactory) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Instantiates the unit registered under `name`.
    #[must_use]
    pub fn create(&self, name: &str) -> Option<Box<dyn MigrationUnit>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Returns whether a unit is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns the number of registered units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns whether no unit is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// A unit read from its generated file; hooks are no-ops.
#[derive(Debug, Clone)]
pub struct FileUnit {
    name: String,
    path: PathBuf,
    up: SqlPayloads,
    down: SqlPayloads,
}

impl FileUnit {
    /// Loads the unit `name` from `path`.
    pub fn load(name: impl Into<String>, path: &Path) -> Result<Self> {
        let (up, down) = read_unit_file(path)?;
        Ok(Self {
            name: name.into(),
            path: path.to_path_buf(),
            up,
            down,
        })
    }

    /// Returns the file the unit was read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MigrationUnit for FileUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn up_sql(&self) -> Result<SqlPayloads> {
        Ok(self.up.clone())
    }

    fn down_sql(&self) -> Result<SqlPayloads> {
        Ok(self.down.clone())
    }
}
