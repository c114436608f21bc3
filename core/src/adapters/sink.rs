//! Child output forwarded into `tracing`.

use tracing::{info, warn};

use crate::ports::{OutputSink, StreamKind};

/// Logs every line of mongod output under the `mongod` target.
///
/// Stdout lines are logged at info level, stderr lines at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, pid: u32, stream: StreamKind, line: &str) {
        match stream {
            StreamKind::Stdout => info!(target: "mongod", pid = pid, "{}", line),
            StreamKind::Stderr => warn!(target: "mongod", pid = pid, "{}", line),
        }
    }
}
