//! Domain layer - Pure data models.
//!
//! These types have no I/O dependencies and can be tested in isolation.

mod launch;
mod probe;

pub use launch::{
    registry_key, CommandLine, StartOptions, DEFAULT_PORT, DEFAULT_STARTUP_TIMEOUT,
    MONGOD_EXECUTABLE, REGISTRY_NAMESPACE,
};
pub use probe::{DatabaseListing, ProbeOutcome};
