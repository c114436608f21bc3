//! mongorun Core Library
//!
//! Starts a local MongoDB server for the duration of a build task and tears
//! it down afterwards. Provides functionality to:
//! - Detect whether a port is already served by MongoDB
//! - Launch `mongod` and wait until it accepts connections
//! - Track launched processes per port across the start and stop phases
//! - Terminate every launched process on stop or on abrupt shutdown
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Pure data models
//! - `ports`: Trait definitions (interfaces)
//! - `adapters`: External system implementations
//! - `launcher`, `reaper`: The start and stop phases
//!
//! # Platform Support
//! - Unix: processes are stopped with SIGTERM
//! - Windows: processes are killed

// Hexagonal architecture layers
pub mod adapters;
pub mod domain;
pub mod ports;

pub mod config;
pub mod error;
pub mod launcher;
pub mod process;
pub mod reaper;
pub mod registry;

// Re-export domain types (primary API)
pub use domain::{registry_key, CommandLine, DatabaseListing, ProbeOutcome, StartOptions};

// Re-export other commonly used types
pub use adapters::{ShutdownGuard, ShutdownHookDestroyer, TracingSink, WireProber};
pub use config::{Config, ConfigStore};
pub use error::{Error, Result};
pub use launcher::Launcher;
pub use ports::{OutputSink, PortProber, ShutdownDestroyer, StreamKind};
pub use process::{ExitOutcome, ProcessHandle};
pub use reaper::Reaper;
pub use registry::{ProcessRegistry, RunContext};
