pub mod config;
pub mod probe;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use mongorun_core::{Config, ConfigStore};

/// Store at `path`, or the default location when none was given.
pub fn config_store(path: Option<PathBuf>) -> Result<ConfigStore> {
    match path {
        Some(path) => Ok(ConfigStore::with_path(path)),
        None => Ok(ConfigStore::new()?),
    }
}

/// Load the configuration, naming the file on failure.
pub async fn load_config(store: &ConfigStore) -> Result<Config> {
    store
        .load()
        .await
        .with_context(|| format!("Failed to load {}", store.path().display()))
}
