//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits defined in `ports`.

pub mod prober;
pub mod shutdown;
pub mod sink;
pub mod wire;

// Re-export main types for convenience
pub use prober::WireProber;
pub use shutdown::{ShutdownGuard, ShutdownHookDestroyer};
pub use sink::TracingSink;
