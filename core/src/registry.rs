//! Process registry and the cross-phase run context.
//!
//! A [`ProcessRegistry`] is the set of processes launched for one key. A
//! [`RunContext`] maps keys to registries and is handed by reference to
//! both the start and the stop phase of one pipeline run.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ports::ShutdownDestroyer;
use crate::process::ProcessHandle;

/// Thread-safe set of live processes.
///
/// Membership changes are mirrored into a [`ShutdownDestroyer`], and each
/// added process unregisters itself from both when it exits.
pub struct ProcessRegistry {
    processes: Mutex<HashSet<ProcessHandle>>,
    delegate: Arc<dyn ShutdownDestroyer>,
}

impl ProcessRegistry {
    /// Create an empty registry mirroring into `delegate`.
    pub fn new(delegate: Arc<dyn ShutdownDestroyer>) -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(HashSet::new()),
            delegate,
        })
    }

    /// Track a process. Returns false if it was already tracked.
    pub fn add(self: &Arc<Self>, process: &ProcessHandle) -> bool {
        let inserted = self.processes.lock().insert(process.clone());
        self.delegate.add(process);
        if inserted {
            let registry: Weak<Self> = Arc::downgrade(self);
            process.on_exit(move |exited| {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(exited);
                }
            });
        }
        inserted
    }

    /// Stop tracking a process. Returns false if it was not tracked.
    pub fn remove(&self, process: &ProcessHandle) -> bool {
        let removed = self.processes.lock().remove(process);
        self.delegate.remove(process);
        if removed {
            debug!(pid = process.pid(), "Process unregistered");
        }
        removed
    }

    /// Returns true if `process` is tracked.
    pub fn contains(&self, process: &ProcessHandle) -> bool {
        self.processes.lock().contains(process)
    }

    /// Number of tracked processes.
    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    /// Returns true if no process is tracked.
    pub fn is_empty(&self) -> bool {
        self.processes.lock().is_empty()
    }

    /// Copy of the current membership, safe to iterate while others mutate.
    pub fn snapshot(&self) -> Vec<ProcessHandle> {
        self.processes.lock().iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a ProcessRegistry {
    type Item = ProcessHandle;
    type IntoIter = std::vec::IntoIter<ProcessHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshot().into_iter()
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("processes", &self.snapshot())
            .finish()
    }
}

/// Registries of one logical pipeline run, keyed by
/// [`registry_key`](crate::domain::registry_key).
///
/// Created once per run and passed to every start and stop; it is never a
/// global. Holds at most one registry per key.
pub struct RunContext {
    id: Uuid,
    entries: RwLock<HashMap<String, Arc<ProcessRegistry>>>,
}

impl RunContext {
    /// Create an empty context for a new run.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Identifier of this run, for logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Registry stored under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<ProcessRegistry>> {
        self.entries.read().get(key).cloned()
    }

    /// Store `registry` under `key` unless a registry is already there, and
    /// return whichever registry the key now holds.
    pub fn publish(&self, key: &str, registry: Arc<ProcessRegistry>) -> Arc<ProcessRegistry> {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(existing) => {
                warn!(key = key, tracked = existing.len(), "Registry already published for key");
                Arc::clone(existing)
            }
            None => {
                entries.insert(key.to_string(), Arc::clone(&registry));
                registry
            }
        }
    }

    /// Remove and return the registry under `key`.
    pub fn remove(&self, key: &str) -> Option<Arc<ProcessRegistry>> {
        self.entries.write().remove(key)
    }

    /// Remove the registry under `key` only if it tracks nothing.
    ///
    /// Returns true if an entry was removed.
    pub fn remove_if_empty(&self, key: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(registry) if registry.is_empty() => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// All keys with a registry, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of keys with a registry.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no key has a registry.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapters::ShutdownHookDestroyer;
    use crate::ports::{OutputSink, StreamKind};
    use std::process::Command;
    use std::thread;

    struct NullSink;

    impl OutputSink for NullSink {
        fn line(&self, _pid: u32, _stream: StreamKind, _line: &str) {}
    }

    fn sleeper() -> ProcessHandle {
        let mut command = Command::new("sh");
        command.args(["-c", "exec sleep 30"]);
        ProcessHandle::spawn(command, Arc::new(NullSink)).unwrap()
    }

    fn reap(process: &ProcessHandle) {
        process.destroy();
        process.wait();
    }

    #[test]
    fn test_add_mirrors_into_delegate() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let registry = ProcessRegistry::new(hook.clone());
        let process = sleeper();

        assert!(registry.add(&process));
        assert!(!registry.add(&process));
        assert_eq!(registry.len(), 1);
        assert_eq!(hook.size(), 1);

        assert!(registry.remove(&process));
        assert!(registry.is_empty());
        assert_eq!(hook.size(), 0);

        reap(&process);
    }

    #[test]
    fn test_exit_unregisters_from_both_owners() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let registry = ProcessRegistry::new(hook.clone());
        let process = sleeper();
        registry.add(&process);

        reap(&process);

        assert!(registry.is_empty());
        assert!(!registry.contains(&process));
        assert_eq!(hook.size(), 0);
    }

    #[test]
    fn test_snapshot_is_isolated_from_mutation() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let registry = ProcessRegistry::new(hook);
        let first = sleeper();
        let second = sleeper();
        registry.add(&first);
        registry.add(&second);

        let mut seen = Vec::new();
        for process in &*registry {
            // Mutating mid-iteration must not disturb the snapshot.
            registry.remove(&first);
            registry.remove(&second);
            seen.push(process);
        }

        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&first) && seen.contains(&second));
        assert!(registry.is_empty());

        reap(&first);
        reap(&second);
    }

    #[test]
    fn test_concurrent_add_remove_during_iteration() {
        let hook = Arc::new(ShutdownHookDestroyer::new());
        let registry = ProcessRegistry::new(hook);
        let processes: Vec<ProcessHandle> = (0..4).map(|_| sleeper()).collect();
        for process in &processes {
            registry.add(process);
        }

        let churn = {
            let registry = Arc::clone(&registry);
            let processes = processes.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    for process in &processes {
                        registry.remove(process);
                        registry.add(process);
                    }
                }
            })
        };

        for _ in 0..200 {
            let snapshot = registry.snapshot();
            assert!(snapshot.len() <= processes.len());
            let unique: HashSet<_> = snapshot.iter().cloned().collect();
            assert_eq!(unique.len(), snapshot.len());
        }

        churn.join().unwrap();
        assert_eq!(registry.len(), processes.len());

        for process in &processes {
            reap(process);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_run_context_publish_and_remove() {
        let hook: Arc<dyn ShutdownDestroyer> = Arc::new(ShutdownHookDestroyer::new());
        let context = RunContext::new();
        assert!(context.is_empty());

        let first = ProcessRegistry::new(Arc::clone(&hook));
        let published = context.publish("k:1", Arc::clone(&first));
        assert!(Arc::ptr_eq(&published, &first));

        // A second publish under the same key keeps the existing registry.
        let second = ProcessRegistry::new(hook);
        let published = context.publish("k:1", second);
        assert!(Arc::ptr_eq(&published, &first));
        assert_eq!(context.keys(), ["k:1".to_string()]);

        assert!(context.remove_if_empty("k:1"));
        assert!(context.get("k:1").is_none());
        assert!(!context.remove_if_empty("k:1"));
    }

    #[test]
    fn test_remove_if_empty_keeps_tracked_registry() {
        let hook: Arc<dyn ShutdownDestroyer> = Arc::new(ShutdownHookDestroyer::new());
        let context = RunContext::new();
        let registry = ProcessRegistry::new(hook);
        let process = sleeper();
        registry.add(&process);
        context.publish("k:2", registry);

        assert!(!context.remove_if_empty("k:2"));
        assert_eq!(context.len(), 1);

        reap(&process);
        assert!(context.remove_if_empty("k:2"));
    }

    #[test]
    fn test_run_ids_differ() {
        assert_ne!(RunContext::new().id(), RunContext::new().id());
    }
}
