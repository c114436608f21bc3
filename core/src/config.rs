//! Configuration management for launch defaults.
//!
//! Stores configuration in JSON format at `~/.mongorun/config.json`.
//! Command-line flags override whatever is stored here.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::{StartOptions, DEFAULT_PORT, DEFAULT_STARTUP_TIMEOUT};
use crate::error::{Error, Result};

/// Configuration data stored in JSON format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Root of a MongoDB installation. Unset means `mongod` is on `PATH`.
    #[serde(default)]
    pub installation: Option<PathBuf>,

    /// Data directory handed to mongod.
    #[serde(default = "default_database_root")]
    pub database_root: PathBuf,

    /// Host probed for occupancy and readiness.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub auth: bool,

    #[serde(default)]
    pub skip: bool,

    /// Readiness wait in seconds.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn default_database_root() -> PathBuf {
    PathBuf::from("target").join("mongodb")
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_startup_timeout_secs() -> u64 {
    DEFAULT_STARTUP_TIMEOUT.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            installation: None,
            database_root: default_database_root(),
            host: default_host(),
            port: default_port(),
            verbose: false,
            auth: false,
            skip: false,
            startup_timeout_secs: default_startup_timeout_secs(),
        }
    }
}

impl Config {
    /// Launch options described by this configuration.
    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            installation: self.installation.clone(),
            database_root: self.database_root.clone(),
            host: self.host.clone(),
            port: self.port,
            verbose: self.verbose,
            auth: self.auth,
            skip: self.skip,
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
        }
    }
}

/// Configuration store for launch defaults.
///
/// Handles reading and writing configuration to `~/.mongorun/config.json`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    /// Path to the configuration file.
    config_path: PathBuf,
}

impl ConfigStore {
    /// Create a new config store with the default path.
    ///
    /// Default path: `~/.mongorun/config.json`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

        let config_path = home.join(".mongorun").join("config.json");

        Ok(Self { config_path })
    }

    /// Create a config store with a custom path.
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Path of the configuration file.
    pub fn path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default()
    }

    /// Load configuration from disk.
    ///
    /// Returns default config if the file doesn't exist. Read failures
    /// surface as [`Error::Io`], malformed JSON as [`Error::Json`].
    pub async fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            debug!(path = %self.config_path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&self.config_path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist. The file is
    /// replaced atomically.
    pub async fn save(&self, config: &Config) -> Result<()> {
        let path = self.config_path.display();

        let config_dir = self.config_dir();
        if !config_dir.as_os_str().is_empty() {
            fs::create_dir_all(&config_dir).await.map_err(|e| {
                Error::Config(format!("Cannot create {}: {}", config_dir.display(), e))
            })?;
        }

        let content = serde_json::to_string_pretty(config)?;

        let temp_path = self.config_path.with_extension("json.tmp");
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::Config(format!("Cannot write {}: {}", temp_path.display(), e)));
        }

        fs::rename(&temp_path, &self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Cannot replace {}: {}", path, e)))?;

        debug!(path = %path, "Saved config");
        Ok(())
    }
}
