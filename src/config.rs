//! Migration configuration
//!
//! [`MigrationConfig`] is loaded from `config/graphguard.toml` (optional) and
//! `GRAPHGUARD__*` environment variables via [`MigrationConfig::load()`].
//!
//! ```toml
//! [database]
//! uri = "http://localhost:7474"
//! name = "neo4j"
//! username = "neo4j"
//! password = "secret"
//!
//! [migration]
//! changelog = "migrations/changelog.toml"
//! execution_contexts = ["staging"]
//! mode = "dry-run"
//! dry_run_output = "target/graphguard"
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "config/graphguard.toml";
const ENV_PREFIX: &str = "GRAPHGUARD";

/// Connection parameters for the target graph database
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_uri")]
    pub uri: String,
    /// Logical database name (`/db/{name}/tx`)
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_db_uri(),
            name: default_db_name(),
            username: None,
            password: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// How the computed changesets are applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    #[default]
    Run,
    DryRun,
}

/// Execution-mode switch: run against the database, or print to a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    Run,
    DryRun { output_directory: PathBuf },
}

/// Changelog identity and run policy
#[derive(Debug, Clone, Deserialize)]
pub struct ChangelogConfig {
    /// Master changelog identity, handed to the changelog source as-is
    #[serde(default = "default_changelog")]
    pub changelog: String,
    #[serde(default)]
    pub execution_contexts: Vec<String>,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_dry_run_output")]
    pub dry_run_output: PathBuf,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            changelog: default_changelog(),
            execution_contexts: Vec::new(),
            mode: RunMode::default(),
            dry_run_output: default_dry_run_output(),
        }
    }
}

/// Complete configuration for one migration run
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub migration: ChangelogConfig,
}

fn default_db_uri() -> String {
    "http://localhost:7474".to_string()
}

fn default_db_name() -> String {
    "neo4j".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_changelog() -> String {
    "migrations/changelog.toml".to_string()
}

fn default_dry_run_output() -> PathBuf {
    PathBuf::from(".")
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("migration.execution_contexts")
}

impl MigrationConfig {
    /// Load the configuration from `config/graphguard.toml`, falling back to env vars.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if neither source yields a valid configuration.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(environment());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // Unreadable file: warn and retry with the environment alone
                if Path::new(DEFAULT_CONFIG_FILE).exists() {
                    log::warn!("Failed to load {DEFAULT_CONFIG_FILE}, falling back to env: {err}");
                }
                Config::builder()
                    .add_source(environment())
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        settings.try_deserialize::<MigrationConfig>()
    }

    /// Load the configuration from an explicit file, with env vars layered on top.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or malformed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(environment())
            .build()?
            .try_deserialize::<MigrationConfig>()
    }

    /// Resolve the configured execution mode
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        match self.migration.mode {
            RunMode::Run => ExecutionMode::Run,
            RunMode::DryRun => ExecutionMode::DryRun {
                output_directory: self.migration.dry_run_output.clone(),
            },
        }
    }
}
