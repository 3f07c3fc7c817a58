//! Error types for the migration ledger.

use std::path::PathBuf;

/// Errors that can occur during ledger and migration operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A ledger-wide operation was requested with no datasource registered.
    #[error("No datasource is configured")]
    ConfigurationMissing,

    /// A datasource name is absent from the registry.
    #[error("Unknown datasource: {0}")]
    UnknownDatasource(String),

    /// A datasource declares an engine no platform adapter handles.
    #[error("Unknown platform '{platform}' for datasource '{datasource}'")]
    UnknownPlatform {
        /// The datasource declaring the engine.
        datasource: String,
        /// The declared engine identifier.
        platform: String,
    },

    /// The ledger table could not be created.
    #[error("Failed to create ledger table for datasource '{datasource}': {source}")]
    LedgerInit {
        /// The datasource whose table creation failed.
        datasource: String,
        /// The underlying storage error.
        #[source]
        source: sqlx::Error,
    },

    /// The ledger already holds an entry for this migration.
    #[error("Migration '{migration}' is already recorded for datasource '{datasource}'")]
    DuplicateMigration {
        /// The datasource whose ledger rejected the insert.
        datasource: String,
        /// The migration name.
        migration: String,
    },

    /// A migration unit could be found neither in the registry nor on disk.
    #[error("Migration unit not found: {0}")]
    UnitNotFound(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading/writing migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a migration unit file.
    #[error("Failed to parse migration file '{path}': {message}")]
    ParseError {
        /// Path to the migration file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Migration file already exists.
    #[error("Migration file already exists: {0}")]
    MigrationExists(PathBuf),

    /// Invalid unit file name pattern.
    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Invalid configuration file.
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Multiple errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<LedgerError>),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
