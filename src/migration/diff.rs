//! Changelog diff: which declared changesets must run now

use crate::migration::{Changeset, ExecutionContexts};

/// Compute the changesets to execute, preserving declaration order
///
/// A declared changeset is selected when it matches `contexts` and at least
/// one of the following holds:
/// - it has never been applied (no persisted changeset with the same id and author)
/// - it is `run_on_change` and its checksum differs from the persisted one
/// - it is `run_always`
#[must_use]
pub fn diff<'a>(
    contexts: &ExecutionContexts,
    declared: &'a [Changeset],
    persisted: &[Changeset],
) -> Vec<&'a Changeset> {
    declared
        .iter()
        .filter(|changeset| contexts.matches(changeset.contexts()))
        .filter(|changeset| {
            let applied = persisted.iter().find(|p| p.same_identity(changeset));
            match applied {
                None => true,
                Some(applied) => {
                    changeset.run_always()
                        || (changeset.run_on_change() && applied.checksum() != changeset.checksum())
                }
            }
        })
        .collect()
}
