//! Launch parameters and the mongod command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default port mongod listens on.
pub const DEFAULT_PORT: u16 = 27017;

/// Upper bound on the readiness wait.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

/// Namespace prefix of every registry key.
pub const REGISTRY_NAMESPACE: &str = "mongorun.process-registry";

/// Executable name for the current platform.
#[cfg(windows)]
pub const MONGOD_EXECUTABLE: &str = "mongod.exe";

/// Executable name for the current platform.
#[cfg(not(windows))]
pub const MONGOD_EXECUTABLE: &str = "mongod";

/// Key correlating a start with the later stop for the same port.
pub fn registry_key(port: u16) -> String {
    format!("{}:{}", REGISTRY_NAMESPACE, port)
}

/// Everything the start phase needs to launch one mongod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    /// Root of a MongoDB installation; `None` means `mongod` is on `PATH`.
    pub installation: Option<PathBuf>,
    /// Directory handed to `--dbpath`, created if missing.
    pub database_root: PathBuf,
    /// Host probed for readiness.
    pub host: String,
    /// Port mongod is told to listen on.
    pub port: u16,
    /// Run without `--quiet`.
    pub verbose: bool,
    /// Run with `--auth` instead of `--noauth`.
    pub auth: bool,
    /// Do nothing at all.
    pub skip: bool,
    /// How long to wait for the server to accept connections.
    pub startup_timeout: Duration,
}

impl StartOptions {
    /// Options for a database root on the default port.
    pub fn new(database_root: impl Into<PathBuf>) -> Self {
        Self {
            installation: None,
            database_root: database_root.into(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            verbose: false,
            auth: false,
            skip: false,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the installation root.
    pub fn installation(mut self, installation: impl Into<PathBuf>) -> Self {
        self.installation = Some(installation.into());
        self
    }

    /// Set the readiness timeout.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Key under which the launched processes are registered.
    pub fn registry_key(&self) -> String {
        registry_key(self.port)
    }

    /// Arguments passed to mongod, in a stable order.
    pub fn arguments(&self, database_path: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(6);
        if !self.verbose {
            args.push("--quiet".to_string());
        }
        args.push(if self.auth { "--auth" } else { "--noauth" }.to_string());
        args.push("--port".to_string());
        args.push(self.port.to_string());
        args.push("--dbpath".to_string());
        args.push(database_path.display().to_string());
        args
    }
}

/// A program plus its arguments, printable for logs and error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Builds the `std::process::Command` for this line.
    pub fn to_command(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_key() {
        assert_eq!(registry_key(27100), "mongorun.process-registry:27100");
        assert_eq!(StartOptions::new("db").port(1).registry_key(), registry_key(1));
    }

    #[test]
    fn test_quiet_noauth_arguments() {
        let options = StartOptions::new("/data/db").port(27100);
        let args = options.arguments(Path::new("/data/db"));
        assert_eq!(
            args,
            ["--quiet", "--noauth", "--port", "27100", "--dbpath", "/data/db"]
        );
    }

    #[test]
    fn test_verbose_auth_arguments() {
        let mut options = StartOptions::new("/data/db");
        options.verbose = true;
        options.auth = true;
        let args = options.arguments(Path::new("/data/db"));
        assert_eq!(args, ["--auth", "--port", "27017", "--dbpath", "/data/db"]);
    }

    #[test]
    fn test_command_line_display() {
        let line = CommandLine::new(
            "/opt/mongo/bin/mongod",
            vec!["--dbpath".into(), "/tmp/my db".into()],
        );
        assert_eq!(line.to_string(), "/opt/mongo/bin/mongod --dbpath \"/tmp/my db\"");
    }
}
