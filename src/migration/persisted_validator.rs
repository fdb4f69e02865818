//! Consistency checks between the declared changelog and persisted history

use crate::migration::{Changeset, MigrationError};

/// Cross-check declared changesets against what was already applied
///
/// Two independent checks, both always run:
/// - checksum consistency for every declared changeset not marked `run_on_change`
/// - persisted history must be a positional prefix (by id) of the declared changelog
#[must_use]
pub fn validate_persisted(declared: &[Changeset], persisted: &[Changeset]) -> Vec<String> {
    let mut errors = checksum_errors(declared, persisted);
    errors.extend(order_errors(declared, persisted));
    errors
}

/// Validate and raise when inconsistencies were found
///
/// # Errors
///
/// Returns `MigrationError::Validation` with all collected problems.
pub fn ensure_persisted_consistent(
    declared: &[Changeset],
    persisted: &[Changeset],
) -> Result<(), MigrationError> {
    MigrationError::from_validation(validate_persisted(declared, persisted))
}

fn checksum_errors(declared: &[Changeset], persisted: &[Changeset]) -> Vec<String> {
    declared
        .iter()
        .filter(|changeset| !changeset.run_on_change())
        .filter_map(|changeset| {
            let applied = persisted.iter().find(|p| p.same_identity(changeset))?;
            if applied.checksum() == changeset.checksum() {
                return None;
            }
            Some(format!(
                "Changeset with ID <{}> and author <{}> has conflicted checksums.\n\
                 \t\t - Declared: <{}>\n\
                 \t\t - Persisted: <{}>",
                changeset.id(),
                changeset.author(),
                changeset.checksum(),
                applied.checksum()
            ))
        })
        .collect()
}

fn order_errors(declared: &[Changeset], persisted: &[Changeset]) -> Vec<String> {
    if persisted.len() > declared.len() {
        let missing = persisted.len() - declared.len();
        return vec![format!(
            "At least {missing} declared changeset(s) missing: {} persisted but only {} declared",
            persisted.len(),
            declared.len()
        )];
    }

    declared
        .iter()
        .zip(persisted)
        .enumerate()
        .filter(|(_, (expected, found))| expected.id() != found.id())
        .map(|(index, (expected, found))| {
            format!(
                "Declared changeset number {} should have\n\
                 \t\t - ID: <{}>\n\
                 \t\t - Found: <{}>",
                index + 1,
                expected.id(),
                found.id()
            )
        })
        .collect()
}
