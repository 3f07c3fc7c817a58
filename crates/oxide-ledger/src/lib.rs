//! Migration ledger and reconciliation engine.
//!
//! `oxide-ledger` tracks which schema-change units have been applied to each
//! configured datasource, where:
//! - Every datasource carries its own tracking table, created lazily on first
//!   use
//! - Units are discovered from a directory by naming convention
//! - Pending units are the discovered ones no datasource has recorded
//! - New units are generated as Rust modules carrying per-datasource SQL
//!
//! # Architecture
//!
//! - **Registry** - Named datasource configurations and cached connections
//! - **Platform** - Engine-specific DDL rendering and error classification
//! - **Ledger** - Reads and writes the tracking table
//! - **Discovery** - Finds unit files on disk
//! - **Reconcile** - Diffs discovered units against executed ones
//! - **Generator** - Renders and writes new unit files
//! - **Migrator** - Applies pending units and reverts applied ones
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_ledger::prelude::*;
//!
//! let config = LedgerConfig::load("ledger.toml")?;
//! let migrator = Migrator::from_config(&config);
//!
//! for name in migrator.pending().await? {
//!     println!("pending: {name}");
//! }
//! let report = migrator.migrate().await?;
//! report.into_result()?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # List pending units
//! oxide-ledger status
//!
//! # Apply pending units
//! oxide-ledger migrate
//!
//! # Revert the latest applied unit
//! oxide-ledger down
//!
//! # Generate an empty unit
//! oxide-ledger generate
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod migrator;
pub mod platform;
pub mod reconcile;
pub mod registry;
pub mod schema;
pub mod unit;

/// Prelude for convenient imports.
///
/// Generated unit files only import this module and `async_trait`.
pub mod prelude {
    pub use crate::config::{DatasourceConfig, LedgerConfig};
    pub use crate::discovery::{discover, discover_files, DiscoveredUnit};
    pub use crate::error::{LedgerError, Result};
    pub use crate::generator::{generate_unit_body, write_unit, NamingConvention};
    pub use crate::ledger::{Ledger, LedgerEntry, LedgerSchema};
    pub use crate::migrator::{MigrationReport, MigrationStatus, MigrationStep, Migrator};
    pub use crate::platform::{platform_for_engine, Platform};
    pub use crate::registry::ConnectionRegistry;
    pub use crate::schema::{ColumnSchema, SqlType, TableSchema};
    pub use crate::unit::{payloads_from_json, FileUnit, MigrationUnit, SqlPayloads, UnitRegistry};
}
