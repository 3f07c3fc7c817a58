//! Migration unit naming and source generation.
//!
//! A unit is named `prefix + decimal timestamp` and lives in a file named
//! `prefix + timestamp + "." + extension`. The generated file is a Rust
//! module: a unit struct implementing [`MigrationUnit`](crate::unit::MigrationUnit)
//! with four empty lifecycle hooks and two accessors returning the
//! per-datasource SQL, embedded as JSON in raw string constants so the
//! payloads can also be read back without compiling the file.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::error::{LedgerError, Result};
use crate::unit::SqlPayloads;

/// Default unit name prefix.
pub const DEFAULT_PREFIX: &str = "PropelMigration_";

/// Default unit file extension.
pub const DEFAULT_EXTENSION: &str = "rs";

/// Constant holding the up payload in generated units.
const UP_CONST: &str = "UP_SQL";

/// Constant holding the down payload in generated units.
const DOWN_CONST: &str = "DOWN_SQL";

/// How unit names and file names derive from timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingConvention {
    /// Prefix of every unit name.
    pub prefix: String,
    /// File extension of unit files, without the dot.
    pub extension: String,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_EXTENSION)
    }
}

impl NamingConvention {
    /// Creates a naming convention.
    #[must_use]
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    /// Returns the unit name for a timestamp.
    #[must_use]
    pub fn class_name_for(&self, timestamp: u64) -> String {
        format!("{}{}", self.prefix, timestamp)
    }

    /// Returns the unit file name for a timestamp.
    #[must_use]
    pub fn file_name_for(&self, timestamp: u64) -> String {
        format!("{}.{}", self.class_name_for(timestamp), self.extension)
    }

    /// Recovers the timestamp embedded in a unit name.
    #[must_use]
    pub fn timestamp_of(&self, name: &str) -> Option<u64> {
        let digits = name.strip_prefix(&self.prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Returns the pattern matching unit file names.
    ///
    /// The first capture group holds the timestamp digits.
    pub fn file_pattern(&self) -> Result<Regex> {
        let pattern = format!(
            r"^{}([0-9]+)\.{}$",
            regex::escape(&self.prefix),
            regex::escape(&self.extension)
        );
        Ok(Regex::new(&pattern)?)
    }
}

/// Renders the source of a new migration unit.
///
/// `author` may be empty. The output only depends on the arguments.
pub fn generate_unit_body(
    convention: &NamingConvention,
    up: &SqlPayloads,
    down: &SqlPayloads,
    timestamp: u64,
    author: &str,
) -> Result<String> {
    let name = convention.class_name_for(timestamp);
    let type_name = type_ident(&name);

    let when = i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map_or_else(
            || format!("timestamp {}", timestamp),
            |dt| format!("{} (timestamp {})", dt.format("%Y-%m-%d %H:%M:%S UTC"), timestamp),
        );
    let by = if author.is_empty() {
        String::new()
    } else {
        format!(" by {}", author)
    };

    Ok(format!(
        "//! Migration unit {name}.\n\
         //!\n\
         //! Generated at {when}{by}.\n\
         \n\
         use async_trait::async_trait;\n\
         use oxide_ledger::prelude::*;\n\
         \n\
         const {UP_CONST}: &str = {up_literal};\n\
         \n\
         const {DOWN_CONST}: &str = {down_literal};\n\
         \n\
         #[allow(non_camel_case_types)]\n\
         pub struct {type_name};\n\
         \n\
         #[async_trait]\n\
         impl MigrationUnit for {type_name} {{\n\
         \x20   fn name(&self) -> &str {{\n\
         \x20       {name:?}\n\
         \x20   }}\n\
         \n\
         {pre_up}\
         \n\
         {post_up}\
         \n\
         {pre_down}\
         \n\
         {post_down}\
         \n\
         \x20   fn up_sql(&self) -> Result<SqlPayloads> {{\n\
         \x20       payloads_from_json({UP_CONST})\n\
         \x20   }}\n\
         \n\
         \x20   fn down_sql(&self) -> Result<SqlPayloads> {{\n\
         \x20       payloads_from_json({DOWN_CONST})\n\
         \x20   }}\n\
         }}\n",
        up_literal = raw_literal(&serde_json::to_string_pretty(up)?),
        down_literal = raw_literal(&serde_json::to_string_pretty(down)?),
        pre_up = hook_stub("pre_up", "add the pre-migration code here"),
        post_up = hook_stub("post_up", "add the post-migration code here"),
        pre_down = hook_stub("pre_down", "add the pre-rollback code here"),
        post_down = hook_stub("post_down", "add the post-rollback code here"),
    ))
}

/// Writes a new unit file into `dir` and returns its path.
///
/// Never overwrites: an existing file yields [`LedgerError::MigrationExists`].
pub fn write_unit(
    dir: &Path,
    convention: &NamingConvention,
    up: &SqlPayloads,
    down: &SqlPayloads,
    timestamp: u64,
    author: &str,
) -> Result<PathBuf> {
    let body = generate_unit_body(convention, up, down, timestamp, author)?;

    std::fs::create_dir_all(dir)?;
    let path = dir.join(convention.file_name_for(timestamp));
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => LedgerError::MigrationExists(path.clone()),
            _ => LedgerError::Io(e),
        })?;
    file.write_all(body.as_bytes())?;

    info!(path = %path.display(), "Created migration unit");
    Ok(path)
}

/// Reads the up and down payloads of a generated unit file.
pub fn read_unit_file(path: &Path) -> Result<(SqlPayloads, SqlPayloads)> {
    let source = std::fs::read_to_string(path)?;
    parse_unit_payloads(&source).map_err(|message| LedgerError::ParseError {
        path: path.to_path_buf(),
        message,
    })
}

/// Extracts the payload constants from generated unit source.
pub(crate) fn parse_unit_payloads(
    source: &str,
) -> std::result::Result<(SqlPayloads, SqlPayloads), String> {
    let file = syn::parse_file(source).map_err(|e| e.to_string())?;

    let mut up = None;
    let mut down = None;
    for item in &file.items {
        let syn::Item::Const(constant) = item else {
            continue;
        };
        let slot = if constant.ident == UP_CONST {
            &mut up
        } else if constant.ident == DOWN_CONST {
            &mut down
        } else {
            continue;
        };

        let syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(literal),
            ..
        }) = constant.expr.as_ref()
        else {
            return Err(format!("{} is not a string literal", constant.ident));
        };
        let payloads: SqlPayloads =
            serde_json::from_str(&literal.value()).map_err(|e| format!("{}: {}", constant.ident, e))?;
        *slot = Some(payloads);
    }

    match (up, down) {
        (Some(up), Some(down)) => Ok((up, down)),
        (None, _) => Err(format!("missing {} constant", UP_CONST)),
        (_, None) => Err(format!("missing {} constant", DOWN_CONST)),
    }
}

/// Turns a unit name into a Rust type identifier.
fn type_ident(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if !ident.starts_with(|c: char| c.is_ascii_alphabetic()) {
        ident.insert(0, 'M');
    }
    ident
}

/// Wraps text in a raw string literal whose delimiter never occurs in it.
fn raw_literal(text: &str) -> String {
    let mut longest = 0;
    let mut run = None;
    for c in text.chars() {
        run = match (run, c) {
            (_, '"') => Some(0),
            (Some(n), '#') => Some(n + 1),
            _ => None,
        };
        if let Some(n) = run {
            longest = longest.max(n);
        }
    }
    let hashes = "#".repeat(longest + 1);
    format!("r{hashes}\"{text}\"{hashes}")
}

fn hook_stub(hook: &str, hint: &str) -> String {
    format!(
        "    async fn {hook}(&self, _connections: &ConnectionRegistry) -> Result<()> {{\n\
         \x20       // {hint}\n\
         \x20       Ok(())\n\
         \x20   }}\n"
    )
}
