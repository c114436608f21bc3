//! Config command - show or initialise the configuration file.

use anyhow::{bail, Result};
use mongorun_core::{Config, ConfigStore};

pub async fn show(store: &ConfigStore, json: bool) -> Result<()> {
    let config = super::load_config(store).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Configuration ({})", store.path().display());
    println!("{}", "-".repeat(40));
    match &config.installation {
        Some(path) => println!("Installation:     {}", path.display()),
        None => println!("Installation:     (mongod on PATH)"),
    }
    println!("Database root:    {}", config.database_root.display());
    println!("Address:          {}:{}", config.host, config.port);
    println!("Verbose:          {}", config.verbose);
    println!("Auth:             {}", config.auth);
    println!("Skip:             {}", config.skip);
    println!("Startup timeout:  {}s", config.startup_timeout_secs);
    Ok(())
}

pub async fn init(store: &ConfigStore, force: bool) -> Result<()> {
    if store.path().exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            store.path().display()
        );
    }

    store.save(&Config::default()).await?;
    println!("Wrote {}", store.path().display());
    Ok(())
}
