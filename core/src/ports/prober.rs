//! Port prober port (interface).

use std::time::Duration;

use crate::domain::ProbeOutcome;

/// Port for classifying what is listening on `host:port`.
///
/// Called in a tight poll loop, so implementations must honour the short
/// timeouts they are given and must never fail: every expected refusal is
/// reported as [`ProbeOutcome::Unready`].
pub trait PortProber: Send + Sync {
    fn probe(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> ProbeOutcome;
}

impl<P: PortProber + ?Sized> PortProber for std::sync::Arc<P> {
    fn probe(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> ProbeOutcome {
        (**self).probe(host, port, connect_timeout, read_timeout)
    }
}
