//! Abrupt-shutdown delegate port (interface).

use crate::process::ProcessHandle;

/// Port for the host-provided "destroy everything on abrupt exit" mechanism.
///
/// Every handle a [`ProcessRegistry`](crate::registry::ProcessRegistry)
/// tracks is registered here too, so either owner can trigger its
/// destruction independently.
pub trait ShutdownDestroyer: Send + Sync {
    /// Start tracking a process. Returns false if it was already tracked.
    fn add(&self, process: &ProcessHandle) -> bool;

    /// Stop tracking a process. Returns false if it was not tracked.
    fn remove(&self, process: &ProcessHandle) -> bool;

    /// Number of processes currently tracked.
    fn size(&self) -> usize;
}
