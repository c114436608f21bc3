//! Stop phase: terminate everything launched for a port and wait for it.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::registry_key;
use crate::process::ProcessHandle;
use crate::registry::RunContext;

/// Longest single wait on one process before moving to the next.
const WAIT_SLICE: Duration = Duration::from_millis(500);

/// Terminates registered processes and blocks until they have exited.
///
/// There is no overall timeout: a process that ignores termination keeps
/// `stop` waiting.
#[derive(Debug, Clone)]
pub struct Reaper {
    wait_slice: Duration,
}

impl Reaper {
    pub fn new() -> Self {
        Self {
            wait_slice: WAIT_SLICE,
        }
    }

    /// Override the longest single wait on one process.
    pub fn with_wait_slice(mut self, wait_slice: Duration) -> Self {
        self.wait_slice = wait_slice;
        self
    }

    /// Stop every process registered for `port`.
    ///
    /// Returns how many processes were signalled. Stopping a port with
    /// nothing registered is a no-op.
    pub fn stop(&self, context: &RunContext, port: u16) -> usize {
        self.stop_key(context, &registry_key(port))
    }

    /// Stop every process registered under `key`.
    pub fn stop_key(&self, context: &RunContext, key: &str) -> usize {
        let Some(registry) = context.get(key) else {
            debug!(key = key, "Nothing registered, nothing to stop");
            return 0;
        };

        // Signal everything first so the processes shut down concurrently.
        let mut remaining: Vec<ProcessHandle> = Vec::new();
        for process in &*registry {
            info!(pid = process.pid(), "Stopping MongoDB instance {}...", process);
            process.destroy();
            remaining.push(process);
        }
        let signalled = remaining.len();

        while !remaining.is_empty() {
            remaining.retain(|process| match process.wait_timeout(self.wait_slice) {
                Some(outcome) => {
                    info!(pid = process.pid(), outcome = %outcome, "MongoDB instance {} stopped.", process);
                    false
                }
                None => {
                    debug!(pid = process.pid(), "Still waiting for MongoDB instance {} to stop", process);
                    true
                }
            });
        }

        if context.remove_if_empty(key) {
            debug!(key = key, "Registry drained and removed");
        } else if context.get(key).is_some() {
            warn!(
                key = key,
                tracked = registry.len(),
                "Processes were registered during stop, keeping registry"
            );
        }

        signalled
    }
}

impl Default for Reaper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapters::ShutdownHookDestroyer;
    use crate::ports::{OutputSink, ShutdownDestroyer, StreamKind};
    use crate::registry::ProcessRegistry;
    use std::process::Command;
    use std::sync::Arc;
    use std::time::Instant;

    struct NullSink;

    impl OutputSink for NullSink {
        fn line(&self, _pid: u32, _stream: StreamKind, _line: &str) {}
    }

    fn spawn(script: &str) -> ProcessHandle {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        ProcessHandle::spawn(command, Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn test_stop_unknown_port_is_noop() {
        let context = RunContext::new();
        let reaper = Reaper::new();
        assert_eq!(reaper.stop(&context, 27017), 0);
        assert_eq!(reaper.stop(&context, 27017), 0);
        assert!(context.is_empty());
    }

    #[test]
    fn test_stop_reaps_every_process_for_key() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let context = RunContext::new();
        let registry = context.publish(&registry_key(27200), ProcessRegistry::new(hook.clone()));
        let processes: Vec<ProcessHandle> = (0..3).map(|_| spawn("exec sleep 30")).collect();
        for process in &processes {
            registry.add(process);
        }

        assert_eq!(Reaper::new().stop(&context, 27200), 3);

        assert!(processes.iter().all(|p| !p.is_running()));
        assert!(registry.is_empty());
        assert!(context.get(&registry_key(27200)).is_none());
        assert_eq!(hook.size(), 0);

        // Second stop finds nothing.
        assert_eq!(Reaper::new().stop(&context, 27200), 0);
    }

    #[test]
    fn test_stop_keeps_waiting_for_slow_shutdown() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let context = RunContext::new();
        let registry = context.publish(&registry_key(27204), ProcessRegistry::new(hook));
        let stubborn = spawn("trap 'sleep 1; exit 0' TERM; while :; do sleep 0.1; done");
        registry.add(&stubborn);
        // Let the shell install its trap.
        std::thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        let reaper = Reaper::new().with_wait_slice(Duration::from_millis(100));
        assert_eq!(reaper.stop(&context, 27204), 1);

        // Several slices elapsed before the process got out.
        assert!(started.elapsed() >= Duration::from_millis(800), "{:?}", started.elapsed());
        assert_eq!(stubborn.try_status().and_then(|o| o.code()), Some(0));
        assert!(context.is_empty());
    }

    #[test]
    fn test_stop_leaves_other_keys_alone() {
        let hook: Arc<dyn ShutdownDestroyer> = Arc::new(ShutdownHookDestroyer::new());
        let context = RunContext::new();
        let ours = context.publish(&registry_key(27201), ProcessRegistry::new(Arc::clone(&hook)));
        let theirs = context.publish(&registry_key(27202), ProcessRegistry::new(hook));
        let mine = spawn("exec sleep 30");
        let other = spawn("exec sleep 30");
        ours.add(&mine);
        theirs.add(&other);

        assert_eq!(Reaper::new().stop(&context, 27201), 1);
        assert!(!mine.is_running());
        assert!(other.is_running());
        assert_eq!(context.keys(), [registry_key(27202)]);

        assert_eq!(Reaper::new().stop(&context, 27202), 1);
        assert!(context.is_empty());
    }

    #[test]
    fn test_stop_counts_already_exited_processes_out() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let context = RunContext::new();
        let registry = context.publish(&registry_key(27203), ProcessRegistry::new(hook));
        let quick = spawn("exit 0");
        registry.add(&quick);
        quick.wait();

        assert_eq!(Reaper::new().stop(&context, 27203), 0);
        assert!(context.is_empty());
    }
}
