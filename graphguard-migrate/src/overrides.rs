//! Command-line overrides layered on top of the loaded configuration

use graphguard::migration::ExecutionContexts;
use graphguard::MigrationConfig;

/// Values given on the command line; `None` keeps the configured value
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub uri: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub changelog: Option<String>,
    /// Comma-separated execution contexts
    pub contexts: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut MigrationConfig) {
        if let Some(uri) = &self.uri {
            config.database.uri = uri.clone();
        }
        if let Some(database) = &self.database {
            config.database.name = database.clone();
        }
        if let Some(username) = &self.username {
            config.database.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.database.password = Some(password.clone());
        }
        if let Some(changelog) = &self.changelog {
            config.migration.changelog = changelog.clone();
        }
        if let Some(contexts) = &self.contexts {
            config.migration.execution_contexts = ExecutionContexts::parse(contexts)
                .iter()
                .map(str::to_string)
                .collect();
        }
    }
}
