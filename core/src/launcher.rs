//! Start phase: launch mongod and block until it accepts connections.
//!
//! # Sequence
//! 1. Pre-flight probe; an answering server aborts with `AlreadyRunning`.
//! 2. Resolve the executable and prepare the database root.
//! 3. Spawn, register the process and publish its registry in the
//!    [`RunContext`] before waiting, so the shutdown hook and a later stop
//!    can always reach it.
//! 4. Poll the port until the server answers, the child exits, or the
//!    startup timeout elapses.
//!
//! A process that is still running when the timeout elapses stays
//! registered; the stop phase reaps it like any other.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::adapters::prober::{
    PREFLIGHT_CONNECT_TIMEOUT, PREFLIGHT_READ_TIMEOUT, READINESS_CONNECT_TIMEOUT,
    READINESS_READ_TIMEOUT,
};
use crate::adapters::{TracingSink, WireProber};
use crate::domain::{CommandLine, DatabaseListing, ProbeOutcome, StartOptions, MONGOD_EXECUTABLE};
use crate::error::{Error, Result};
use crate::ports::{OutputSink, PortProber, ShutdownDestroyer};
use crate::process::ProcessHandle;
use crate::registry::{ProcessRegistry, RunContext};

/// Pause between readiness probes that found nothing listening.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How often the readiness wait reports that it is still waiting.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Launches mongod processes and waits for them to become ready.
pub struct Launcher<P = WireProber> {
    prober: P,
    destroyer: Arc<dyn ShutdownDestroyer>,
    sink: Arc<dyn OutputSink>,
    poll_interval: Duration,
}

impl Launcher<WireProber> {
    /// Launcher probing over the wire protocol and logging output via tracing.
    pub fn new(destroyer: Arc<dyn ShutdownDestroyer>) -> Self {
        Self::with_prober(WireProber::new(), destroyer)
    }
}

impl<P: PortProber> Launcher<P> {
    /// Launcher with a custom prober.
    pub fn with_prober(prober: P, destroyer: Arc<dyn ShutdownDestroyer>) -> Self {
        Self {
            prober,
            destroyer,
            sink: Arc::new(TracingSink),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Send child output to `sink` instead of tracing.
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Override the pause between readiness probes.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start mongod as described by `options` and wait until it is ready.
    ///
    /// On success the process is running and tracked in `context` under
    /// `options.registry_key()`.
    pub fn start(&self, context: &RunContext, options: &StartOptions) -> Result<()> {
        if options.skip {
            info!("Skipping mongod: skip is set");
            return Ok(());
        }

        match &options.installation {
            None => info!("Using mongod from PATH"),
            Some(dir) => info!("Using mongod installed in {}", dir.display()),
        }
        info!("Using database root of {}", options.database_root.display());

        self.preflight(options)?;

        let program = resolve_executable(options.installation.as_deref())?;
        let database_path = prepare_database_root(&options.database_root)?;
        let command_line = CommandLine::new(program, options.arguments(&database_path));

        info!(command = %command_line, "Executing command line");
        let mut command = command_line.to_command();
        command.current_dir(&database_path);

        let process = ProcessHandle::spawn(command, Arc::clone(&self.sink)).map_err(|e| {
            Error::LaunchFailure {
                program: command_line.program.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let registry = context.publish(
            &options.registry_key(),
            ProcessRegistry::new(Arc::clone(&self.destroyer)),
        );
        registry.add(&process);

        info!(
            pid = process.pid(),
            port = options.port,
            run = %context.id(),
            "Waiting for MongoDB to start..."
        );
        self.await_readiness(&process, &command_line, options)
    }

    fn preflight(&self, options: &StartOptions) -> Result<()> {
        debug!(host = %options.host, port = options.port, "Checking that the port is free");
        match self.prober.probe(
            &options.host,
            options.port,
            PREFLIGHT_CONNECT_TIMEOUT,
            PREFLIGHT_READ_TIMEOUT,
        ) {
            ProbeOutcome::Unready => Ok(()),
            ProbeOutcome::ConnectError(reason) => {
                debug!(reason = %reason, "Pre-flight probe inconclusive, assuming nothing is running");
                Ok(())
            }
            ProbeOutcome::Occupied(listing) => Err(Error::AlreadyRunning {
                port: options.port,
                databases: listing.names().to_vec(),
            }),
        }
    }

    fn await_readiness(
        &self,
        process: &ProcessHandle,
        command_line: &CommandLine,
        options: &StartOptions,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = started + options.startup_timeout;
        let mut next_progress = started + PROGRESS_INTERVAL;

        loop {
            if let Some(outcome) = process.try_status() {
                return Err(Error::ProcessExitedEarly {
                    command: command_line.to_string(),
                    outcome: outcome.to_string(),
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.prober.probe(
                &options.host,
                options.port,
                READINESS_CONNECT_TIMEOUT.min(remaining),
                READINESS_READ_TIMEOUT.min(remaining),
            ) {
                ProbeOutcome::Unready => {
                    let now = Instant::now();
                    if now >= next_progress {
                        debug!(
                            elapsed_secs = (now - started).as_secs(),
                            "Still waiting for MongoDB to start"
                        );
                        next_progress += PROGRESS_INTERVAL;
                    }
                    thread::sleep(
                        self.poll_interval
                            .min(deadline.saturating_duration_since(Instant::now())),
                    );
                }
                ProbeOutcome::Occupied(DatabaseListing::Databases(names)) => {
                    info!(pid = process.pid(), "MongoDB started.");
                    info!("Databases: {:?}", names);
                    return Ok(());
                }
                ProbeOutcome::Occupied(DatabaseListing::Unavailable(reason)) => {
                    info!(pid = process.pid(), "MongoDB started.");
                    info!("Unable to list databases due to {}", reason);
                    return Ok(());
                }
                ProbeOutcome::ConnectError(reason) => {
                    info!(pid = process.pid(), "MongoDB started.");
                    warn!("Unable to list databases due to {}", reason);
                    return Ok(());
                }
            }
        }

        if let Some(outcome) = process.try_status() {
            return Err(Error::ProcessExitedEarly {
                command: command_line.to_string(),
                outcome: outcome.to_string(),
            });
        }

        warn!(
            pid = process.pid(),
            port = options.port,
            "MongoDB did not become ready, leaving the process registered for stop"
        );
        Err(Error::ReadinessTimeout {
            port: options.port,
            timeout: options.startup_timeout,
        })
    }
}

/// `<installation>/bin/mongod` if an installation directory is given,
/// otherwise the bare name for a `PATH` lookup.
fn resolve_executable(installation: Option<&Path>) -> Result<PathBuf> {
    match installation {
        Some(dir) if dir.is_dir() => {
            let exe = dir.join("bin").join(MONGOD_EXECUTABLE);
            if exe.is_file() {
                Ok(exe)
            } else {
                Err(Error::LaunchFailure {
                    program: exe.display().to_string(),
                    reason: format!(
                        "could not find mongo executables in specified installation {}",
                        dir.display()
                    ),
                })
            }
        }
        Some(dir) => {
            warn!(
                "Installation {} is not a directory, using mongod from PATH",
                dir.display()
            );
            Ok(PathBuf::from(MONGOD_EXECUTABLE))
        }
        None => Ok(PathBuf::from(MONGOD_EXECUTABLE)),
    }
}

/// Ensure `root` is a directory and return its absolute path.
fn prepare_database_root(root: &Path) -> Result<PathBuf> {
    let invalid = |reason: String| Error::InvalidDatabaseRoot {
        path: root.to_path_buf(),
        reason,
    };

    if root.exists() && !root.is_dir() {
        return Err(invalid("is a file and not a directory".to_string()));
    }
    if !root.is_dir() {
        debug!("Creating database root directory: {}", root.display());
        std::fs::create_dir_all(root)
            .map_err(|e| invalid(format!("could not create directory: {}", e)))?;
    }

    if root.is_absolute() {
        Ok(root.to_path_buf())
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| invalid(format!("could not resolve working directory: {}", e)))?;
        Ok(cwd.join(root))
    }
}
