//! Execution-context filter

use std::collections::BTreeSet;
use std::fmt;

/// Configured execution contexts
///
/// The default (empty) set matches every changeset. Otherwise a changeset
/// matches when it declares no context at all, or when at least one of its
/// contexts is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContexts {
    contexts: BTreeSet<String>,
}

impl ExecutionContexts {
    /// Build from labels; blank labels are ignored and surrounding whitespace trimmed
    pub fn new<I, S>(contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            contexts: contexts
                .into_iter()
                .map(|c| c.as_ref().trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    /// The default, match-everything filter
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list, e.g. `"staging, eu"`
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Whether a changeset declaring `declared` contexts should run
    #[must_use]
    pub fn matches(&self, declared: &[String]) -> bool {
        if self.is_default() || declared.is_empty() {
            return true;
        }
        declared.iter().any(|c| self.contexts.contains(c.trim()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.contexts.iter().map(String::as_str)
    }
}

impl fmt::Display for ExecutionContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            return f.write_str("none");
        }
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(","))
    }
}
