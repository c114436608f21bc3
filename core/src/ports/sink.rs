//! Child output sink port (interface).

/// Which pipe a line of child output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Port for line-oriented child output.
pub trait OutputSink: Send + Sync {
    /// Receive one line (without its terminator) from process `pid`.
    fn line(&self, pid: u32, stream: StreamKind, line: &str);
}
