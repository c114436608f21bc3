//! Probe outcome domain model.

use serde::{Deserialize, Serialize};

/// What a server answering on a probed port told us about its databases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum DatabaseListing {
    /// `listDatabases` succeeded.
    Databases(Vec<String>),
    /// The server answered but refused the command (auth required, etc.).
    Unavailable(String),
}

impl DatabaseListing {
    /// Database names, empty when the listing was refused.
    pub fn names(&self) -> &[String] {
        match self {
            DatabaseListing::Databases(names) => names,
            DatabaseListing::Unavailable(_) => &[],
        }
    }
}

/// Classification of a single connection attempt against `host:port`.
///
/// Not every failure means "safe to start", and not every answer on the
/// port comes from a process we launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "detail")]
pub enum ProbeOutcome {
    /// Connection refused or any network error: nothing is serving yet.
    Unready,
    /// Connected and something answered, MongoDB or not.
    Occupied(DatabaseListing),
    /// The host could not be resolved or the request could not be built.
    ConnectError(String),
}

impl ProbeOutcome {
    /// Returns true if something answered on the port.
    pub fn is_occupied(&self) -> bool {
        matches!(self, ProbeOutcome::Occupied(_))
    }

    /// Returns true if nothing is serving on the port yet.
    pub fn is_unready(&self) -> bool {
        matches!(self, ProbeOutcome::Unready)
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Unready => write!(f, "not listening"),
            ProbeOutcome::Occupied(DatabaseListing::Databases(names)) => {
                write!(f, "serving databases {:?}", names)
            }
            ProbeOutcome::Occupied(DatabaseListing::Unavailable(reason)) => {
                write!(f, "serving (unable to list databases: {})", reason)
            }
            ProbeOutcome::ConnectError(reason) => write!(f, "connect error: {}", reason),
        }
    }
}
