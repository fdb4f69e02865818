//! TOML changelog loader
//!
//! A changelog file lists changesets and may import other changelog files.
//! Imports are resolved relative to the importing file and loaded depth-first,
//! before the file's own changesets. A file reached twice is only loaded once;
//! an import cycle is an error.
//!
//! ```toml
//! import = ["sentences.toml"]
//!
//! [[changeset]]
//! id = "hello-world"
//! author = "fbiville"
//! query = "CREATE (n:Sentence {text:'Hello monde!'})"
//!
//! [[changeset]]
//! id = "hello-world-fixed"
//! author = "fbiville"
//! queries = ["MATCH (n:Sentence {text:'Hello monde!'}) SET n.text='Hello world!'"]
//! contexts = ["dev"]
//! run-on-change = true
//!
//! [changeset.precondition]
//! if-not-met = "CONTINUE"
//! and = [
//!     { query = "MATCH (n:Sentence) RETURN COUNT(n) > 0 AS result" },
//!     { query = "RETURN true AS result" },
//! ]
//! ```

use graphguard::migration::{
    ChangelogSource, Changeset, MigrationError, Precondition, PreconditionErrorPolicy, PreconditionQuery,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Changelog loading errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Import cycle: {0}")]
    Cycle(String),

    #[error("{path}, changeset {position}: {reason}")]
    InvalidEntry {
        path: PathBuf,
        position: usize,
        reason: String,
    },
}

impl From<LoadError> for MigrationError {
    fn from(err: LoadError) -> Self {
        MigrationError::Changelog(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangelogFile {
    #[serde(default)]
    import: Vec<String>,
    #[serde(default, rename = "changeset")]
    changesets: Vec<ChangesetEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ChangesetEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    contexts: Vec<String>,
    #[serde(default)]
    run_always: bool,
    #[serde(default)]
    run_on_change: bool,
    #[serde(default)]
    precondition: Option<PreconditionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PreconditionEntry {
    if_not_met: String,
    #[serde(flatten)]
    node: QueryNode,
}

/// One node of a precondition tree: exactly one of the three keys
#[derive(Debug, Deserialize)]
struct QueryNode {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    and: Option<Vec<QueryNode>>,
    #[serde(default)]
    or: Option<Vec<QueryNode>>,
}

impl QueryNode {
    fn to_query(&self) -> Result<PreconditionQuery, String> {
        match (&self.query, &self.and, &self.or) {
            (Some(query), None, None) => Ok(PreconditionQuery::simple(query.clone())),
            (None, Some(children), None) => {
                let (left, right) = Self::pair("and", children)?;
                Ok(PreconditionQuery::and(left, right))
            }
            (None, None, Some(children)) => {
                let (left, right) = Self::pair("or", children)?;
                Ok(PreconditionQuery::or(left, right))
            }
            _ => Err("a precondition node needs exactly one of 'query', 'and' or 'or'".to_string()),
        }
    }

    fn pair(kind: &str, children: &[QueryNode]) -> Result<(PreconditionQuery, PreconditionQuery), String> {
        match children {
            [left, right] => Ok((left.to_query()?, right.to_query()?)),
            _ => Err(format!(
                "'{kind}' needs exactly 2 sub-queries, found {}",
                children.len()
            )),
        }
    }
}

impl ChangesetEntry {
    fn into_changeset(self) -> Result<Changeset, String> {
        let precondition = self
            .precondition
            .map(|p| {
                let policy: PreconditionErrorPolicy = p.if_not_met.parse().map_err(|e: MigrationError| e.to_string())?;
                Ok::<_, String>(Precondition::new(policy, p.node.to_query()?))
            })
            .transpose()?;

        let mut builder = Changeset::builder(self.id, self.author)
            .queries(self.query.into_iter().chain(self.queries))
            .contexts(self.contexts)
            .run_always(self.run_always)
            .run_on_change(self.run_on_change);
        if let Some(precondition) = precondition {
            builder = builder.precondition(precondition);
        }
        builder.build().map_err(|e| e.to_string())
    }
}

/// Loads changelogs from TOML files
#[derive(Debug, Clone, Default)]
pub struct TomlChangelogSource {
    base_dir: PathBuf,
}

impl TomlChangelogSource {
    /// Resolve master changelog paths against `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Load a changelog file and everything it imports
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if a file is unreadable or malformed, an entry is
    /// invalid, or imports form a cycle.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Changeset>, LoadError> {
        let mut changesets = Vec::new();
        let mut stack = Vec::new();
        let mut loaded = HashSet::new();
        Self::load_recursive(path, &mut stack, &mut loaded, &mut changesets)?;
        Ok(changesets)
    }

    fn load_recursive(
        path: &Path,
        stack: &mut Vec<PathBuf>,
        loaded: &mut HashSet<PathBuf>,
        changesets: &mut Vec<Changeset>,
    ) -> Result<(), LoadError> {
        let canonical = fs::canonicalize(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if stack.contains(&canonical) {
            let cycle: Vec<String> = stack
                .iter()
                .skip_while(|p| **p != canonical)
                .chain(std::iter::once(&canonical))
                .map(|p| p.display().to_string())
                .collect();
            return Err(LoadError::Cycle(cycle.join(" -> ")));
        }
        if !loaded.insert(canonical.clone()) {
            log::debug!("{} already loaded, skipping", path.display());
            return Ok(());
        }

        let content = fs::read_to_string(&canonical).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ChangelogFile = toml::from_str(&content).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        stack.push(canonical.clone());
        let parent = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
        for import in &file.import {
            Self::load_recursive(&parent.join(import), stack, loaded, changesets)?;
        }
        stack.pop();

        let own = file.changesets.len();
        for (index, entry) in file.changesets.into_iter().enumerate() {
            let changeset = entry.into_changeset().map_err(|reason| LoadError::InvalidEntry {
                path: path.to_path_buf(),
                position: index + 1,
                reason,
            })?;
            changesets.push(changeset);
        }
        log::debug!("Loaded {own} changeset(s) from {}", path.display());
        Ok(())
    }
}

impl ChangelogSource for TomlChangelogSource {
    fn load(&self, changelog: &str) -> Result<Vec<Changeset>, MigrationError> {
        Ok(self.load_file(&self.base_dir.join(changelog))?)
    }
}
