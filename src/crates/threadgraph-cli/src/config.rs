//! CLI configuration
//!
//! Loaded in layers, later ones winning:
//! 1. Default values
//! 2. User-level config: ~/.threadgraph/config.toml
//! 3. Project-level config: ./.threadgraph/config.toml
//! 4. Command-line flags (which clap also fills from `THREADGRAPH_*` variables)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use threadgraph_core::EngineConfig;
use tokio::fs;
use tracing::{debug, info};

pub const CONFIG_DIR: &str = ".threadgraph";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadgraphConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Checkpoint database (relative to ~/.threadgraph or absolute).
    /// `${VAR}` is replaced by the variable's value.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "threadgraph.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database: Option<PathBuf>,
    pub max_steps: Option<usize>,
    pub log_level: Option<String>,
}

impl ThreadgraphConfig {
    /// Replace every section with `other`'s. Serde already filled in
    /// defaults for anything `other` left out.
    pub fn merge(&mut self, other: ThreadgraphConfig) {
        self.database = other.database;
        self.engine = other.engine;
        self.logging = other.logging;
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(path) = overrides.database {
            self.database.path = path.to_string_lossy().into_owned();
        }
        if let Some(max_steps) = overrides.max_steps {
            self.engine.max_steps = max_steps;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    pub fn resolve_env_vars(&mut self) {
        self.database.path = expand_env_var(&self.database.path);
    }

    /// Database location; relative paths live under `~/.threadgraph`, or the
    /// working directory when there is no home directory.
    pub fn database_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.database.path);
        if path.is_absolute() {
            return path;
        }
        match dirs::home_dir() {
            Some(home) => home.join(CONFIG_DIR).join(path),
            None => path,
        }
    }
}

fn expand_env_var(value: &str) -> String {
    match value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(name) => std::env::var(name).unwrap_or_else(|_| value.to_string()),
        None => value.to_string(),
    }
}

/// Finds and layers the config files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_config_path: dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE)),
            project_config_path: std::env::current_dir()
                .ok()
                .map(|cwd| cwd.join(CONFIG_DIR).join(CONFIG_FILE)),
        }
    }

    /// Loader reading exactly the given files, for tests and `--config`.
    pub fn with_paths(user: Option<PathBuf>, project: Option<PathBuf>) -> Self {
        Self {
            user_config_path: user,
            project_config_path: project,
        }
    }

    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    pub fn project_config_path(&self) -> Option<&Path> {
        self.project_config_path.as_deref()
    }

    /// Defaults, then the user file, then the project file. Missing files
    /// are skipped; unreadable or malformed ones are errors.
    pub async fn load(&self) -> Result<ThreadgraphConfig, ConfigError> {
        let mut config = ThreadgraphConfig::default();

        for path in [&self.user_config_path, &self.project_config_path]
            .into_iter()
            .flatten()
        {
            match Self::load_from_path(path).await {
                Ok(layer) => {
                    debug!(path = %path.display(), "Loaded config layer");
                    config.merge(layer);
                }
                Err(ConfigError::NotFound(_)) => {
                    debug!(path = %path.display(), "Config file absent");
                }
                Err(e) => return Err(e),
            }
        }

        config.resolve_env_vars();
        info!(database = %config.database.path, max_steps = config.engine.max_steps, "Configuration loaded");
        Ok(config)
    }

    pub async fn load_from_path(path: &Path) -> Result<ThreadgraphConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
