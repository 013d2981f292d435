//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Only the API base URL has an env override (`GYM_API_BASE_URL`); everything
//! else comes from the TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gym_api::DispatcherConfig;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub occupancy: OccupancyConfig,
}

/// Backend connection settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Extra header sent with every request
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// Where tokens and the cached profile live between runs
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct OccupancyConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_timeout() -> u64 {
    gym_api::DEFAULT_TIMEOUT.as_secs()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".gym")
}

fn default_poll_interval() -> u64 {
    gym_session::DEFAULT_POLL_INTERVAL.as_secs()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("GYM_API_BASE_URL") {
            config.api.base_url = url;
        }

        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.occupancy.poll_interval_secs == 0 {
            return Err(common::Error::Config(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("gym.toml")
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let mut dispatcher = DispatcherConfig::new(self.api.base_url.clone());
        dispatcher.timeout = Duration::from_secs(self.api.timeout_secs);
        dispatcher.default_headers = self
            .headers
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect();
        dispatcher
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.occupancy.poll_interval_secs)
    }
}
