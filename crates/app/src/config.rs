use config::{File, FileFormat, Source};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "bankfeed.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Upstream secret_id and secret_key are required (or GO_CARDLESS_SECRET_ID / GO_CARDLESS_SECRET_KEY)")]
    MissingCredentials,
    #[error("sync.max_concurrent_sessions must be at least 1")]
    ZeroConcurrency,
    #[error("upstream.timeout_secs must be at least 1")]
    ZeroTimeout,
    #[error("No database path configured and no platform data directory available")]
    NoDataDir,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub secret_id: String,
    pub secret_key: String,
    pub country: String,
    pub redirect_uri: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: bankfeed_sync::DEFAULT_BASE_URL.to_string(),
            secret_id: String::new(),
            secret_key: String::new(),
            country: "GB".to_string(),
            redirect_uri: "http://localhost:3000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Needed only by commands that talk to the aggregator.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.secret_id.trim().is_empty() || self.secret_key.trim().is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub dry_run: bool,
    pub max_concurrent_sessions: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_concurrent_sessions: 4,
        }
    }
}

impl Config {
    /// Layers defaults, the TOML file (`path`, else `./bankfeed.toml` when
    /// present) and the environment, then validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::new(&path.to_string_lossy(), FileFormat::Toml).required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };
        let config = Self::layered(file, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::layered(File::from_str(content, FileFormat::Toml), |_| None)
    }

    fn layered<S, F>(file: S, env: F) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
        F: Fn(&str) -> Option<String>,
    {
        let settings = config::Config::builder()
            .add_source(file)
            .set_override_option("upstream.secret_id", env("GO_CARDLESS_SECRET_ID"))?
            .set_override_option("upstream.secret_key", env("GO_CARDLESS_SECRET_KEY"))?
            .set_override_option(
                "storage.database_path",
                env("BANKFEED_DATABASE_PATH").filter(|p| !p.is_empty()),
            )?
            .set_override_option(
                "sync.dry_run",
                env("DRY_RUN")
                    .map(|v| v.trim().to_ascii_lowercase())
                    .filter(|v| !v.is_empty()),
            )?
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.max_concurrent_sessions == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Configured path, else `ledger.db` in the platform data directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.storage.database_path {
            return Ok(path.clone());
        }
        let dirs = directories::ProjectDirs::from("com", "bankfeed", "Bankfeed")
            .ok_or(ConfigError::NoDataDir)?;
        Ok(dirs.data_dir().join("ledger.db"))
    }
}
