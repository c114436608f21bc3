//! Error types for the mongorun-core library.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for mongorun operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while starting or stopping a mongod instance.
#[derive(Error, Debug)]
pub enum Error {
    /// The pre-flight probe found a server already answering on the port.
    #[error("Port {port} is already running a MongoDB instance{}", format_databases(.databases))]
    AlreadyRunning { port: u16, databases: Vec<String> },

    /// The executable is missing or could not be spawned.
    #[error("Failed to launch {program}: {reason}")]
    LaunchFailure { program: String, reason: String },

    /// The child terminated while we were waiting for it to become ready.
    #[error("Command {command} exited before becoming ready: {outcome}")]
    ProcessExitedEarly { command: String, outcome: String },

    /// No readiness signal within the startup window.
    #[error("MongoDB on port {port} did not become ready within {}s", .timeout.as_secs())]
    ReadinessTimeout { port: u16, timeout: Duration },

    /// The database root exists as a non-directory or cannot be created.
    #[error("Invalid database root {}: {reason}", .path.display())]
    InvalidDatabaseRoot { path: PathBuf, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn format_databases(databases: &[String]) -> String {
    if databases.is_empty() {
        String::new()
    } else {
        format!(" with the following databases {:?}", databases)
    }
}
