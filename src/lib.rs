//! fenced - per-node cluster fencing coordinator.
//!
//! The daemon tracks named fencing domains, answers local administrative
//! clients over a Unix socket, and reacts to cluster membership events.
//! Everything runs on one thread driven by a `poll(2)` reactor.
//!
//! # Architecture
//!
//! - **Reactor** - Slot table of I/O sources and the single blocking wait
//! - **Listener / ClientConn** - Admin socket, one request per connection
//! - **Commands** - Code-to-handler table producing framed replies
//! - **Domains** - Registry and join / leave / query lifecycle
//! - **Membership** - Backend trait plus the event channel feeding it
//! - **DebugRing** - Bounded debug log served by `DUMP_DEBUG`
//!
//! # Modules
//!
//! - [`reactor`] - Event reactor
//! - [`socket`] - Wire protocol, listener, connections and client
//! - [`domain`] - Fencing domains
//! - [`membership`] - Membership backends
//! - [`config`] - Configuration loading

// Library modules
pub mod commands;
pub mod config;
pub mod constants;
pub mod context;
pub mod daemon;
pub mod debug_ring;
pub mod domain;
pub mod error;
pub mod membership;
pub mod reactor;
pub mod socket;

// Re-export commonly used types
pub use config::Config;
pub use context::DaemonContext;
pub use daemon::{Daemon, LockFile};
pub use debug_ring::DebugRing;
pub use domain::{DomainRegistry, FenceDomain};
pub use error::{DomainError, ProtocolError};
pub use reactor::Reactor;
pub use socket::client::FencedClient;
pub use socket::SocketAddress;
