//! Structural validation of the declared changelog
//!
//! Runs before any database contact. Every problem is collected, positions
//! are 1-based in declaration order.

use crate::migration::{Changeset, MigrationError};
use std::collections::HashMap;

/// Collect every structural problem of the declared changesets
#[must_use]
pub fn validate_declared(changesets: &[Changeset]) -> Vec<String> {
    let mut errors = Vec::new();

    for (index, changeset) in changesets.iter().enumerate() {
        let position = index + 1;
        if changeset.id().trim().is_empty() {
            errors.push(blank_field(position, "id"));
        }
        if changeset.author().trim().is_empty() {
            errors.push(blank_field(position, "author"));
        }
        if changeset.queries().iter().all(|q| q.trim().is_empty()) {
            errors.push(blank_field(position, "query"));
        }
    }

    if let Some(error) = duplicated_ids(changesets) {
        errors.push(error);
    }

    errors
}

/// Validate and raise on the first non-empty report
///
/// # Errors
///
/// Returns `MigrationError::Validation` with all collected problems.
pub fn ensure_declared_valid(changesets: &[Changeset]) -> Result<(), MigrationError> {
    MigrationError::from_validation(validate_declared(changesets))
}

fn blank_field(position: usize, field: &str) -> String {
    format!("Changeset {position} - '{field}' should not be missing/blank")
}

fn duplicated_ids(changesets: &[Changeset]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for changeset in changesets {
        *counts.entry(changeset.id()).or_default() += 1;
    }

    // Report in first-declaration order
    let mut duplicated: Vec<&str> = Vec::new();
    for changeset in changesets {
        let id = changeset.id();
        if counts[id] > 1 && !duplicated.contains(&id) {
            duplicated.push(id);
        }
    }

    if duplicated.is_empty() {
        None
    } else {
        Some(format!(
            "Changeset IDs should be unique, duplicated IDs: {}",
            duplicated.join(", ")
        ))
    }
}
