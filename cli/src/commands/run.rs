//! Run command - start mongod, run a task against it, stop mongod.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use mongorun_core::{Config, ConfigStore, Launcher, Reaper, RunContext, ShutdownHookDestroyer};
use tokio::process::Command;
use tracing::{info, warn};

/// Exit code used when interrupted by a signal.
const INTERRUPTED: i32 = 130;

/// How long the shutdown hook waits for destroyed processes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Flags overriding the configuration file for one start.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Root of a MongoDB installation (mongod is taken from its bin/)
    #[arg(long)]
    pub installation: Option<PathBuf>,

    /// Data directory for mongod
    #[arg(long)]
    pub database_root: Option<PathBuf>,

    /// Port mongod listens on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host probed for readiness
    #[arg(long)]
    pub host: Option<String>,

    /// Show mongod's routine output
    #[arg(short, long)]
    pub verbose: bool,

    /// Start mongod with authentication enabled
    #[arg(long)]
    pub auth: bool,

    /// Skip starting mongod
    #[arg(long)]
    pub skip: bool,

    /// Seconds to wait for mongod to accept connections
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl StartArgs {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(self, config: &mut Config) {
        if let Some(installation) = self.installation {
            config.installation = Some(installation);
        }
        if let Some(database_root) = self.database_root {
            config.database_root = database_root;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(timeout) = self.timeout {
            config.startup_timeout_secs = timeout;
        }
        config.verbose |= self.verbose;
        config.auth |= self.auth;
        config.skip |= self.skip;
    }
}

pub async fn run(store: &ConfigStore, args: StartArgs, task: Vec<String>) -> Result<i32> {
    let mut config = super::load_config(store).await?;
    args.apply(&mut config);
    let options = config.start_options();
    let port = options.port;

    let destroyer = Arc::new(ShutdownHookDestroyer::new());
    let _guard = destroyer.guard(SHUTDOWN_GRACE);
    let context = Arc::new(RunContext::new());
    info!(run = %context.id(), port = port, "Starting run");

    let launcher = Launcher::new(destroyer.clone());
    let start = tokio::task::spawn_blocking({
        let context = Arc::clone(&context);
        move || launcher.start(&context, &options)
    });

    tokio::select! {
        started = start => started.context("start task panicked")??,
        _ = shutdown_signal() => return Ok(interrupt(&destroyer)),
    }

    let (program, args) = task.split_first().context("no task given")?;
    info!(task = %task.join(" "), "Running task");
    let outcome = match Command::new(program).args(args).kill_on_drop(true).spawn() {
        Ok(mut child) => tokio::select! {
            status = child.wait() => status
                .map(|status| {
                    info!(status = %status, "Task finished");
                    status.code().unwrap_or(1)
                })
                .context("Failed to wait for task"),
            _ = shutdown_signal() => return Ok(interrupt(&destroyer)),
        },
        Err(e) => Err(e).with_context(|| format!("Failed to run {}", program)),
    };

    let stopped = tokio::task::spawn_blocking({
        let context = Arc::clone(&context);
        move || Reaper::new().stop(&context, port)
    })
    .await
    .context("stop task panicked")?;
    info!(stopped = stopped, "Run finished");

    outcome
}

fn interrupt(destroyer: &ShutdownHookDestroyer) -> i32 {
    warn!("Interrupted, destroying launched processes");
    let survivors = destroyer.destroy_all_and_wait(SHUTDOWN_GRACE);
    if survivors > 0 {
        warn!(survivors = survivors, "Some processes did not exit");
    }
    INTERRUPTED
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                return ctrl_c().await;
            }
        };
        tokio::select! {
            _ = ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        let args = StartArgs {
            port: Some(27100),
            database_root: Some(PathBuf::from("/tmp/db")),
            auth: true,
            timeout: Some(5),
            ..StartArgs::default()
        };
        args.apply(&mut config);

        assert_eq!(config.port, 27100);
        assert_eq!(config.database_root, PathBuf::from("/tmp/db"));
        assert!(config.auth);
        assert_eq!(config.startup_timeout_secs, 5);
        assert_eq!(config.host, "localhost");
        assert!(!config.verbose);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let mut config = Config {
            verbose: true,
            port: 28000,
            ..Config::default()
        };
        StartArgs::default().apply(&mut config);
        assert!(config.verbose);
        assert_eq!(config.port, 28000);
    }
}
