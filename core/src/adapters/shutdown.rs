//! Abrupt-shutdown delegate.
//!
//! Tracks every process any registry tracks, independent of keys, so the
//! host can destroy all of them when it is interrupted or unwinds.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::ports::ShutdownDestroyer;
use crate::process::ProcessHandle;

/// Process-wide destroy-on-shutdown set.
///
/// Once [`destroy_all`](Self::destroy_all) has run, the hook counts as
/// fired: processes added afterwards are destroyed on the spot instead of
/// being tracked.
#[derive(Debug, Default)]
pub struct ShutdownHookDestroyer {
    processes: Mutex<HashSet<ProcessHandle>>,
    fired: AtomicBool,
}

impl ShutdownHookDestroyer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the hook has fired.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Request termination of every tracked process.
    ///
    /// Returns the number of processes signalled.
    pub fn destroy_all(&self) -> usize {
        let snapshot: Vec<ProcessHandle> = {
            let processes = self.processes.lock();
            self.fired.store(true, Ordering::Release);
            processes.iter().cloned().collect()
        };
        for process in &snapshot {
            warn!(pid = process.pid(), "Destroying process on shutdown");
            process.destroy();
        }
        snapshot.len()
    }

    /// Destroy every tracked process and wait up to `grace` for all of them.
    ///
    /// Returns the number of processes still running when `grace` ran out.
    pub fn destroy_all_and_wait(&self, grace: Duration) -> usize {
        let snapshot: Vec<ProcessHandle> = self.processes.lock().iter().cloned().collect();
        self.destroy_all();

        let deadline = Instant::now() + grace;
        let mut survivors = 0;
        for process in &snapshot {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if process.wait_timeout(remaining).is_none() {
                warn!(pid = process.pid(), "Process still running after shutdown grace period");
                survivors += 1;
            }
        }
        survivors
    }

    /// Guard that runs [`destroy_all_and_wait`](Self::destroy_all_and_wait)
    /// when dropped, including during a panic unwind.
    pub fn guard(self: &Arc<Self>, grace: Duration) -> ShutdownGuard {
        ShutdownGuard {
            destroyer: Arc::clone(self),
            grace,
        }
    }
}

impl ShutdownDestroyer for ShutdownHookDestroyer {
    fn add(&self, process: &ProcessHandle) -> bool {
        {
            let mut processes = self.processes.lock();
            if !self.has_fired() {
                return processes.insert(process.clone());
            }
        }
        warn!(pid = process.pid(), "Shutdown in progress, destroying new process");
        process.destroy();
        false
    }

    fn remove(&self, process: &ProcessHandle) -> bool {
        self.processes.lock().remove(process)
    }

    fn size(&self) -> usize {
        self.processes.lock().len()
    }
}

/// Destroys everything still tracked when dropped.
#[must_use = "the hook fires when the guard is dropped"]
pub struct ShutdownGuard {
    destroyer: Arc<ShutdownHookDestroyer>,
    grace: Duration,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if self.destroyer.size() == 0 {
            return;
        }
        info!(
            tracked = self.destroyer.size(),
            panicking = std::thread::panicking(),
            "Running shutdown hook"
        );
        self.destroyer.destroy_all_and_wait(self.grace);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ports::{OutputSink, StreamKind};
    use crate::registry::ProcessRegistry;
    use std::process::Command;

    struct NullSink;

    impl OutputSink for NullSink {
        fn line(&self, _pid: u32, _stream: StreamKind, _line: &str) {}
    }

    fn sleeper() -> ProcessHandle {
        let mut command = Command::new("sh");
        command.args(["-c", "exec sleep 30"]);
        ProcessHandle::spawn(command, Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn test_destroy_all_spans_registries() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let first = ProcessRegistry::new(hook.clone());
        let second = ProcessRegistry::new(hook.clone());
        let a = sleeper();
        let b = sleeper();
        first.add(&a);
        second.add(&b);
        assert_eq!(hook.size(), 2);

        let survivors = hook.destroy_all_and_wait(Duration::from_secs(10));
        assert_eq!(survivors, 0);
        assert!(!a.is_running() && !b.is_running());
        assert!(first.is_empty() && second.is_empty());
        assert_eq!(hook.size(), 0);
    }

    #[test]
    fn test_add_after_fire_destroys_immediately() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        assert_eq!(hook.destroy_all(), 0);
        assert!(hook.has_fired());

        let late = sleeper();
        assert!(!hook.add(&late));
        assert!(late.wait_timeout(Duration::from_secs(10)).is_some());
        assert_eq!(hook.size(), 0);
    }

    #[test]
    fn test_add_racing_destroy_all_never_leaks() {
        for _ in 0..20 {
            let hook = Arc::new(ShutdownHookDestroyer::new());
            let process = sleeper();
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let adder = {
                let hook = Arc::clone(&hook);
                let barrier = Arc::clone(&barrier);
                let process = process.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    hook.add(&process)
                })
            };
            barrier.wait();
            hook.destroy_all();
            let tracked = adder.join().unwrap();

            // Tracked before the hook fired, or destroyed on add: either way it dies.
            if tracked {
                assert!(hook.processes.lock().contains(&process));
            }
            assert!(process.wait_timeout(Duration::from_secs(10)).is_some());
        }
    }

    #[test]
    fn test_guard_reaps_on_drop() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let registry = ProcessRegistry::new(hook.clone());
        let process = sleeper();
        registry.add(&process);

        {
            let _guard = hook.guard(Duration::from_secs(10));
        }

        assert!(!process.is_running());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_reaps_on_panic() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let process = sleeper();
        hook.add(&process);

        let guarded = Arc::clone(&hook);
        let result = std::thread::spawn(move || {
            let _guard = guarded.guard(Duration::from_secs(10));
            panic!("task blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!process.is_running());
    }
}
