//! Local-domain socket IPC between fenced and its administrative clients.
//!
//! Every client connection carries exactly one request and receives at most
//! one reply, after which the daemon closes it.
//!
//! # Architecture
//!
//! ```text
//! fenced (reactor thread)                    Admin tool / test
//! ┌──────────────────────┐                  ┌──────────────────┐
//! │ ListenerSource       │   accept         │ FencedClient     │
//! │  bind_listener()     │◄─────────────────│  UnixStream      │
//! │ ClientConn           │  header+payload  │  blocking I/O    │
//! │  RequestDecoder      │─────────────────►│                  │
//! │  commands::dispatch  │  reply segments  │                  │
//! └──────────────────────┘                  └──────────────────┘
//! ```
//!
//! # Wire Protocol
//!
//! Fixed 20-byte header in host byte order, then `len - 20` payload bytes.
//! See [`framing`] for the header and record layouts.

pub mod client;
pub mod client_conn;
pub mod framing;
pub mod listener;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where the client socket lives.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SocketAddress {
    /// Linux abstract namespace name (no filesystem entry).
    Abstract(String),
    /// Filesystem path, created with owner-only permissions.
    Path(PathBuf),
}

impl SocketAddress {
    /// Parse a textual address: a leading `/` selects a path, anything else
    /// an abstract name.
    pub fn parse(s: &str) -> Self {
        if s.starts_with('/') {
            SocketAddress::Path(PathBuf::from(s))
        } else {
            SocketAddress::Abstract(s.to_owned())
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddress::Abstract(name) => write!(f, "@{name}"),
            SocketAddress::Path(path) => write!(f, "{}", path.display()),
        }
    }
}
