//! Ports layer - Trait definitions (interfaces).
//!
//! The launcher, registry and reaper talk to the outside world only
//! through these traits. Implementations live in `adapters`.

mod destroyer;
mod prober;
mod sink;

pub use destroyer::ShutdownDestroyer;
pub use prober::PortProber;
pub use sink::{OutputSink, StreamKind};
