//! mongorun CLI - Run a task against a throwaway MongoDB server
//!
//! Starts mongod, runs the given command, then stops mongod again.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::run::StartArgs;

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "mongorun=info,mongod=info";

#[derive(Parser)]
#[command(name = "mongorun")]
#[command(author, version, about = "Run a task against a throwaway MongoDB server")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ~/.mongorun/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start mongod, run a task, stop mongod
    Run {
        #[command(flatten)]
        start: StartArgs,

        /// Task to run while mongod is up
        #[arg(last = true, required = true)]
        task: Vec<String>,
    },

    /// Check whether a MongoDB server answers on a port
    Probe {
        /// Host to probe
        #[arg(long)]
        host: Option<String>,

        /// Port to probe
        #[arg(short, long)]
        port: Option<u16>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = commands::config_store(cli.config)?;

    let code = match cli.command {
        Commands::Run { start, task } => commands::run::run(&store, start, task).await?,
        Commands::Probe { host, port, json } => {
            commands::probe::run(&store, host, port, json).await?;
            0
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Show { json } => commands::config::show(&store, json).await?,
                ConfigAction::Init { force } => commands::config::init(&store, force).await?,
            }
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
