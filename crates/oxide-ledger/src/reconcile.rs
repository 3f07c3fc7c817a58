//! Reconciliation of discovered units against the ledger.
//!
//! Pure functions over already fetched names. Names recorded in the ledger
//! without a matching file are tolerated everywhere and never reported.

use std::collections::BTreeSet;

use crate::generator::NamingConvention;

/// Returns the discovered names not yet executed, in discovery order.
#[must_use]
pub fn pending(discovered: &[String], executed: &BTreeSet<String>) -> Vec<String> {
    discovered
        .iter()
        .filter(|name| !executed.contains(*name))
        .cloned()
        .collect()
}

/// Returns whether any discovered name is not yet executed.
#[must_use]
pub fn has_pending(discovered: &[String], executed: &BTreeSet<String>) -> bool {
    discovered.iter().any(|name| !executed.contains(name))
}

/// Sorts names by their embedded timestamp.
///
/// Names the convention cannot parse sort last, by name.
pub fn sort_chronologically(names: &mut [String], convention: &NamingConvention) {
    names.sort_by_cached_key(|name| {
        (
            convention.timestamp_of(name).map_or((1, 0), |ts| (0, ts)),
            name.clone(),
        )
    });
}

/// Returns the name with the greatest embedded timestamp.
#[must_use]
pub fn latest<'a, I>(names: I, convention: &NamingConvention) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .filter_map(|name| convention.timestamp_of(name).map(|ts| (ts, name)))
        .max()
        .map(|(_, name)| name)
}

/// Returns the most recent executed unit that still has a file, i.e. the
/// unit a single step down would revert.
#[must_use]
pub fn next_to_revert<'a>(
    discovered: &'a [String],
    executed: &BTreeSet<String>,
    convention: &NamingConvention,
) -> Option<&'a str> {
    latest(
        discovered
            .iter()
            .filter(|name| executed.contains(*name))
            .map(String::as_str),
        convention,
    )
}
