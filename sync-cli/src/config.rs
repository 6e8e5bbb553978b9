//! Configuration loading for revmirror.
//!
//! Configuration is loaded from a TOML file (default: `revmirror.toml` in the
//! user's config directory). Every field has a default; only
//! `source.api_url` is required, and only by `sync`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_client::{SyncOptions, DEFAULT_IDS_PER_QUERY};
use sync_store::DEFAULT_CHECKPOINT_KEY;

/// Root configuration for revmirror.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote source configuration.
    pub source: SourceConfig,
    /// Replica storage configuration.
    pub storage: StorageConfig,
    /// Run configuration.
    pub sync: SyncConfig,
}

/// Remote source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// URL of the wiki's `api.php`.
    pub api_url: Option<String>,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds (default: 60).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Titles or page IDs per lookup request (default: 50).
    #[serde(default = "default_max_ids_per_query")]
    pub max_ids_per_query: usize,
}

/// Replica storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite replica (default: `replica.db` in the data directory).
    pub database: Option<PathBuf>,
}

/// Run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Fetch and store revision text (default: false).
    #[serde(default)]
    pub with_content: bool,
    /// Checkpoint row key (default: `revisions`).
    #[serde(default = "default_checkpoint_key")]
    pub checkpoint_key: String,
    /// Abort a run after this many seconds (default: no limit).
    pub run_timeout_secs: Option<u64>,
}

// Default value functions
fn default_user_agent() -> String {
    format!("revmirror/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_ids_per_query() -> usize {
    DEFAULT_IDS_PER_QUERY
}

fn default_checkpoint_key() -> String {
    DEFAULT_CHECKPOINT_KEY.to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_ids_per_query: default_max_ids_per_query(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            with_content: false,
            checkpoint_key: default_checkpoint_key(),
            run_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the user's config file if there is one, defaults otherwise.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.source.max_ids_per_query == 0 {
            return Err(ConfigError::Invalid {
                field: "source.max_ids_per_query",
                reason: "must be at least 1".into(),
            });
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "source.timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.sync.checkpoint_key.is_empty() {
            return Err(ConfigError::Invalid {
                field: "sync.checkpoint_key",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// The source endpoint, required for `sync`.
    pub fn api_url(&self) -> Result<&str, ConfigError> {
        self.source
            .api_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingApiUrl)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    /// Coordinator options; `with_content` from the command line wins when set.
    pub fn sync_options(&self, with_content: bool) -> SyncOptions {
        SyncOptions {
            with_content: with_content || self.sync.with_content,
            checkpoint_key: self.sync.checkpoint_key.clone(),
            ids_per_query: self.source.max_ids_per_query,
            run_timeout: self.sync.run_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "revmirror", "revmirror")
        .map(|dirs| dirs.config_dir().join("revmirror.toml"))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A field has an unusable value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// `sync` needs to know where the wiki is.
    #[error("source.api_url is not configured")]
    MissingApiUrl,
}
