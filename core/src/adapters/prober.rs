//! Port prober speaking the MongoDB wire protocol.
//!
//! A probe connects, sends `listDatabases` as an `OP_MSG` and classifies
//! what comes back. Refusals and timeouts are the expected answer while
//! mongod is still starting, so they are logged at trace level only.
//!
//! Any reply at all means the port is taken. A reply that is not a valid
//! `OP_MSG` is reported as occupied with the listing unavailable.

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use bson::{doc, Bson, Document};
use tracing::{debug, trace};

use super::wire::{encode_op_msg, read_op_msg, WireError};
use crate::domain::{DatabaseListing, ProbeOutcome};
use crate::ports::PortProber;

/// Connect timeout of the pre-flight occupancy check.
pub const PREFLIGHT_CONNECT_TIMEOUT: Duration = Duration::from_millis(50);

/// Read timeout of the pre-flight occupancy check.
pub const PREFLIGHT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Connect timeout of each readiness probe.
pub const READINESS_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Read timeout of each readiness probe.
pub const READINESS_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Smallest timeout handed to the socket; zero is rejected by the OS API.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Probes a port by asking whatever listens there for its databases.
#[derive(Debug)]
pub struct WireProber {
    next_request_id: AtomicI32,
}

impl WireProber {
    pub fn new() -> Self {
        Self {
            next_request_id: AtomicI32::new(1),
        }
    }

    fn list_databases(
        &self,
        stream: &mut TcpStream,
        read_timeout: Duration,
    ) -> Result<DatabaseListing, WireError> {
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_write_timeout(Some(read_timeout))?;
        stream.set_nodelay(true)?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let command = doc! { "listDatabases": 1, "nameOnly": true, "$db": "admin" };
        stream.write_all(&encode_op_msg(request_id, 0, &command)?)?;

        let reply = read_op_msg(stream)?;
        if reply.response_to != request_id {
            return Err(WireError::Malformed(format!(
                "reply to request {} while waiting for {}",
                reply.response_to, request_id
            )));
        }
        parse_listing(&reply.body)
    }
}

impl Default for WireProber {
    fn default() -> Self {
        Self::new()
    }
}

impl PortProber for WireProber {
    fn probe(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> ProbeOutcome {
        let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => return ProbeOutcome::ConnectError(format!("cannot resolve {}: {}", host, e)),
        };
        if addrs.is_empty() {
            return ProbeOutcome::ConnectError(format!("{} resolved to no addresses", host));
        }

        let connect_timeout = connect_timeout.max(MIN_TIMEOUT);
        let mut stream = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => trace!(%addr, error = %e, "Connect failed"),
            }
        }
        let Some(mut stream) = stream else {
            return ProbeOutcome::Unready;
        };

        match self.list_databases(&mut stream, read_timeout.max(MIN_TIMEOUT)) {
            Ok(listing) => ProbeOutcome::Occupied(listing),
            Err(WireError::Io(e)) => {
                trace!(host = host, port = port, error = %e, "Connected but no answer yet");
                ProbeOutcome::Unready
            }
            Err(WireError::Encode(e)) => ProbeOutcome::ConnectError(e.to_string()),
            // Something answered, just not MongoDB.
            Err(e @ (WireError::Malformed(_) | WireError::Decode(_))) => {
                debug!(host = host, port = port, error = %e, "Port answered with a foreign protocol");
                ProbeOutcome::Occupied(DatabaseListing::Unavailable(e.to_string()))
            }
        }
    }
}

/// Interpret a `listDatabases` reply.
fn parse_listing(body: &Document) -> Result<DatabaseListing, WireError> {
    let ok = match body.get("ok") {
        Some(Bson::Double(v)) => *v == 1.0,
        Some(Bson::Int32(v)) => *v == 1,
        Some(Bson::Int64(v)) => *v == 1,
        Some(Bson::Boolean(v)) => *v,
        _ => return Err(WireError::Malformed("reply has no ok field".to_string())),
    };

    if !ok {
        let reason = body.get_str("errmsg").unwrap_or("command failed");
        return Ok(DatabaseListing::Unavailable(reason.to_string()));
    }

    let databases = body
        .get_array("databases")
        .map_err(|_| WireError::Malformed("reply has no databases array".to_string()))?;

    let names = databases
        .iter()
        .filter_map(Bson::as_document)
        .filter_map(|db| db.get_str("name").ok())
        .map(str::to_string)
        .collect();

    Ok(DatabaseListing::Databases(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    /// Serve one connection: read the request, answer with `reply`.
    fn fake_server(reply: Document) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let request = read_op_msg(&mut socket).unwrap();
            assert_eq!(request.body.get_i32("listDatabases").unwrap(), 1);
            assert_eq!(request.body.get_str("$db").unwrap(), "admin");
            let frame = encode_op_msg(100, request.request_id, &reply).unwrap();
            socket.write_all(&frame).unwrap();
        });
        (port, server)
    }

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn probe(port: u16) -> ProbeOutcome {
        WireProber::new().probe("127.0.0.1", port, Duration::from_millis(250), Duration::from_millis(250))
    }

    #[test]
    fn test_closed_port_is_unready() {
        assert_eq!(probe(free_port()), ProbeOutcome::Unready);
    }

    #[test]
    fn test_listening_server_is_occupied() {
        let (port, server) = fake_server(doc! {
            "databases": [{ "name": "admin" }, { "name": "local" }],
            "ok": 1.0,
        });

        let outcome = probe(port);
        server.join().unwrap();
        assert_eq!(
            outcome,
            ProbeOutcome::Occupied(DatabaseListing::Databases(vec![
                "admin".to_string(),
                "local".to_string()
            ]))
        );
    }

    #[test]
    fn test_refused_command_is_still_occupied() {
        let (port, server) = fake_server(doc! {
            "ok": 0.0,
            "errmsg": "command listDatabases requires authentication",
            "code": 13,
        });

        let outcome = probe(port);
        server.join().unwrap();
        assert_eq!(
            outcome,
            ProbeOutcome::Occupied(DatabaseListing::Unavailable(
                "command listDatabases requires authentication".to_string()
            ))
        );
    }

    #[test]
    fn test_silent_listener_is_unready() {
        // Accepted by the kernel backlog but never answered.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_eq!(probe(port), ProbeOutcome::Unready);
        drop(listener);
    }

    #[test]
    fn test_foreign_protocol_is_occupied() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 16];
            socket.read_exact(&mut request).unwrap();
            socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .unwrap();
            thread::sleep(Duration::from_millis(100));
        });

        let outcome = probe(port);
        server.join().unwrap();
        assert!(
            matches!(outcome, ProbeOutcome::Occupied(DatabaseListing::Unavailable(_))),
            "{outcome:?}"
        );
    }

    #[test]
    fn test_unresolvable_host_is_connect_error() {
        let outcome = WireProber::new().probe(
            "host.invalid",
            27017,
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        assert!(matches!(outcome, ProbeOutcome::ConnectError(_)), "{outcome:?}");
    }

    #[test]
    fn test_parse_listing_requires_ok() {
        let err = parse_listing(&doc! { "databases": [] }).unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));

        let listing = parse_listing(&doc! { "databases": [], "ok": 1 }).unwrap();
        assert_eq!(listing, DatabaseListing::Databases(Vec::new()));
    }
}
