//! Handles to spawned mongod processes.
//!
//! Each spawned child is owned by a watcher thread that polls for its exit
//! and delivers termination requests. A [`ProcessHandle`] is the shared,
//! cloneable view of that child: it can request termination, block until
//! the child has exited, and carry exit observers.
//!
//! # Exit ordering
//! When the child exits, every registered exit observer runs before any
//! `wait` call returns. Observers are how registries unregister exited
//! processes, so a caller that has just seen `wait` return can rely on the
//! bookkeeping already being up to date.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::ports::{OutputSink, StreamKind};

/// How often the watcher checks the child for exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a tracked process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The OS reported an exit status.
    Exited(ExitStatus),
    /// Waiting on the child failed; the process is no longer observable.
    Lost(String),
}

impl ExitOutcome {
    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Exited(status) => status.code(),
            ExitOutcome::Lost(_) => None,
        }
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(status) => match status.code() {
                Some(code) => write!(f, "exited with exit code {}", code),
                None => write!(f, "terminated ({})", status),
            },
            ExitOutcome::Lost(reason) => write!(f, "lost track of process: {}", reason),
        }
    }
}

type ExitObserver = Box<dyn FnOnce(&ProcessHandle) + Send>;

enum Phase {
    Running(Vec<ExitObserver>),
    /// Exit observed, observers running.
    Completing,
    Exited(ExitOutcome),
}

struct Shared {
    pid: u32,
    phase: Mutex<Phase>,
    exited: Condvar,
    terminate_requested: AtomicBool,
    watcher: Mutex<Option<thread::Thread>>,
}

/// Shared reference to a spawned child process.
///
/// Clones refer to the same process; equality and hashing follow that
/// identity, so handles can live in sets.
#[derive(Clone)]
pub struct ProcessHandle {
    shared: Arc<Shared>,
}

impl ProcessHandle {
    /// Spawn `command` with stdout/stderr piped line by line into `sink`.
    ///
    /// Stdin is closed. Whatever `command` already configured for the
    /// standard streams is overridden.
    pub fn spawn(mut command: Command, sink: Arc<dyn OutputSink>) -> io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let pid = child.id();
        debug!(pid = pid, "Spawned child process");

        if let Some(stdout) = child.stdout.take() {
            pump(pid, StreamKind::Stdout, stdout, Arc::clone(&sink));
        }
        if let Some(stderr) = child.stderr.take() {
            pump(pid, StreamKind::Stderr, stderr, sink);
        }

        let handle = Self {
            shared: Arc::new(Shared {
                pid,
                phase: Mutex::new(Phase::Running(Vec::new())),
                exited: Condvar::new(),
                terminate_requested: AtomicBool::new(false),
                watcher: Mutex::new(None),
            }),
        };

        // The child is handed over only once the watcher exists, so it can
        // still be reaped here if the thread cannot be started.
        let (hand_over, receive) = mpsc::channel::<Child>();
        let watched = handle.clone();
        let spawned = thread::Builder::new()
            .name(format!("mongorun-watch-{}", pid))
            .spawn(move || {
                if let Ok(child) = receive.recv() {
                    watched.watch(child);
                }
            });
        let watcher = match spawned {
            Ok(watcher) => watcher,
            Err(e) => {
                abandon(child);
                return Err(e);
            }
        };
        *handle.shared.watcher.lock() = Some(watcher.thread().clone());

        if let Err(mpsc::SendError(child)) = hand_over.send(child) {
            abandon(child);
            return Err(io::Error::new(io::ErrorKind::Other, "process watcher exited"));
        }

        Ok(handle)
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    /// Request termination. Does nothing once the process has exited.
    ///
    /// On unix this sends SIGTERM so mongod can shut down cleanly;
    /// elsewhere the process is killed.
    pub fn destroy(&self) {
        if self.try_status().is_some() {
            return;
        }
        debug!(pid = self.pid(), "Termination requested");
        self.shared.terminate_requested.store(true, Ordering::Release);
        if let Some(watcher) = self.shared.watcher.lock().as_ref() {
            watcher.unpark();
        }
    }

    /// Exit outcome if the process has already exited.
    pub fn try_status(&self) -> Option<ExitOutcome> {
        match &*self.shared.phase.lock() {
            Phase::Exited(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Returns true while the process has not been observed to exit.
    pub fn is_running(&self) -> bool {
        self.try_status().is_none()
    }

    /// Block until the process has exited.
    pub fn wait(&self) -> ExitOutcome {
        let mut phase = self.shared.phase.lock();
        loop {
            if let Phase::Exited(outcome) = &*phase {
                return outcome.clone();
            }
            self.shared.exited.wait(&mut phase);
        }
    }

    /// Block until the process has exited or `timeout` elapses.
    ///
    /// `None` means the wait was cut short; the process may still be running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitOutcome> {
        let deadline = Instant::now() + timeout;
        let mut phase = self.shared.phase.lock();
        loop {
            if let Phase::Exited(outcome) = &*phase {
                return Some(outcome.clone());
            }
            if self.shared.exited.wait_until(&mut phase, deadline).timed_out() {
                return match &*phase {
                    Phase::Exited(outcome) => Some(outcome.clone()),
                    _ => None,
                };
            }
        }
    }

    /// Run `observer` once the process exits.
    ///
    /// If the process has already exited the observer runs immediately on
    /// the calling thread.
    pub fn on_exit<F>(&self, observer: F)
    where
        F: FnOnce(&ProcessHandle) + Send + 'static,
    {
        {
            let mut phase = self.shared.phase.lock();
            if let Phase::Running(observers) = &mut *phase {
                observers.push(Box::new(observer));
                return;
            }
        }
        observer(self);
    }

    fn watch(self, mut child: Child) {
        let outcome = loop {
            match child.try_wait() {
                Ok(Some(status)) => break ExitOutcome::Exited(status),
                Ok(None) => {}
                Err(e) => {
                    warn!(pid = self.pid(), error = %e, "Failed to wait on child process");
                    let _ = child.kill();
                    break ExitOutcome::Lost(e.to_string());
                }
            }

            if self.shared.terminate_requested.swap(false, Ordering::AcqRel) {
                if let Err(e) = terminate(&mut child) {
                    warn!(pid = self.pid(), error = %e, "Failed to signal child process");
                }
            }

            thread::park_timeout(EXIT_POLL_INTERVAL);
        };

        debug!(pid = self.pid(), outcome = %outcome, "Child process exited");
        self.complete(outcome);
    }

    fn complete(&self, outcome: ExitOutcome) {
        let observers = {
            let mut phase = self.shared.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Completing) {
                Phase::Running(observers) => observers,
                other => {
                    *phase = other;
                    return;
                }
            }
        };

        for observer in observers {
            observer(self);
        }

        *self.shared.phase.lock() = Phase::Exited(outcome);
        self.shared.exited.notify_all();
    }
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for ProcessHandle {}

impl std::hash::Hash for ProcessHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.shared).hash(state);
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid())
            .field("running", &self.is_running())
            .finish()
    }
}

impl std::fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid {}", self.pid())
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.kill()
}

/// Kill and reap a child nobody is watching.
fn abandon(mut child: Child) {
    warn!(pid = child.id(), "Killing unwatched child process");
    if let Err(e) = child.kill() {
        warn!(pid = child.id(), error = %e, "Failed to kill child process");
    }
    let _ = child.wait();
}

/// Forward every line from `reader` to `sink` on a dedicated thread.
///
/// Lines are decoded lossily so a stray non-UTF-8 byte never stops the
/// pipe from being drained.
fn pump<R>(pid: u32, stream: StreamKind, reader: R, sink: Arc<dyn OutputSink>)
where
    R: Read + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("mongorun-{}-{:?}", pid, stream).to_lowercase())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        sink.line(pid, stream, line.trim_end_matches(&['\r', '\n'][..]));
                    }
                    Err(e) => {
                        trace!(pid = pid, error = %e, "Output pipe closed");
                        break;
                    }
                }
            }
        });

    if let Err(e) = spawned {
        warn!(pid = pid, error = %e, "Failed to start output pump");
    }
}
