//! Migration discovery.
//!
//! Scans a directory for unit files following the naming convention.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::generator::NamingConvention;

/// A unit file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUnit {
    /// Unit name (prefix + timestamp digits).
    pub name: String,
    /// Path of the unit file.
    pub path: PathBuf,
}

/// Returns the names of the unit files directly inside `dir`.
///
/// A missing directory yields no names. The order is the file system's
/// enumeration order.
pub fn discover(dir: &Path, convention: &NamingConvention) -> Result<Vec<String>> {
    Ok(discover_files(dir, convention)?
        .into_iter()
        .map(|unit| unit.name)
        .collect())
}

/// Like [`discover`], keeping the path of each unit file.
pub fn discover_files(dir: &Path, convention: &NamingConvention) -> Result<Vec<DiscoveredUnit>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Migration directory not found");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let pattern = convention.file_pattern()?;
    let mut units = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(captures) = pattern.captures(file_name) else {
            continue;
        };

        units.push(DiscoveredUnit {
            name: format!("{}{}", convention.prefix, &captures[1]),
            path: entry.path(),
        });
    }

    debug!(dir = %dir.display(), count = units.len(), "Discovered migration units");
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn test_discover_matches_convention() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "PropelMigration_1000.php");
        touch(dir.path(), "PropelMigration_2000.php");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "PropelMigration_3000.php.bak");
        touch(dir.path(), "PropelMigration_abc.php");
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested"), "PropelMigration_4000.php");

        let convention = NamingConvention::new("PropelMigration_", "php");
        let mut names = discover(dir.path(), &convention).unwrap();
        names.sort();
        assert_eq!(names, vec!["PropelMigration_1000", "PropelMigration_2000"]);
    }

    #[test]
    fn test_discovered_names_carry_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "PropelMigration_12.rs");
        touch(dir.path(), "PropelMigration_\u{0661}\u{0662}.rs");

        let convention = NamingConvention::default();
        let names = discover(dir.path(), &convention).unwrap();
        assert_eq!(names, vec!["PropelMigration_12"]);
        assert!(names.iter().all(|name| convention.timestamp_of(name).is_some()));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let names = discover(&dir.path().join("absent"), &NamingConvention::default()).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_discover_files_keeps_paths() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "PropelMigration_0042.rs");

        let units = discover_files(dir.path(), &NamingConvention::default()).unwrap();
        assert_eq!(
            units,
            vec![DiscoveredUnit {
                name: "PropelMigration_0042".to_string(),
                path: dir.path().join("PropelMigration_0042.rs"),
            }]
        );
    }
}
