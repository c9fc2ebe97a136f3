//! Daemon-wide constants for fenced.
//!
//! This module centralizes the wire-protocol numbers, well-known paths and
//! tunables that both the daemon and its local clients depend on. Constants
//! are grouped by domain.
//!
//! # Categories
//!
//! - **Protocol**: magic, version, header size, command codes
//! - **Paths**: socket name, lock file, config file
//! - **Limits**: name lengths, request size cap, reactor chunking
//! - **Defaults**: fencing delays and override settings

// ============================================================================
// Protocol
// ============================================================================

/// Magic number carried in every message header.
pub const FENCED_MAGIC: u32 = 0x0000_00FE;

/// Protocol version: major in the high 16 bits, minor in the low 16 bits.
///
/// Only the major half must match between client and daemon.
pub const FENCED_VERSION: u32 = (1 << 16) | 1;

/// Mask selecting the major half of a packed version.
pub const VERSION_MAJOR_MASK: u32 = 0xFFFF_0000;

/// Size of the fixed message header: five 32-bit fields.
pub const HEADER_SIZE: usize = 20;

/// Upper bound on a request payload.
///
/// Requests only carry short node names; anything larger is treated as a
/// protocol error and the connection is dropped.
pub const MAX_REQUEST_PAYLOAD: usize = 1024 * 1024;

/// Command codes understood by the daemon.
pub mod command {
    /// Join the fencing domain.
    pub const JOIN: u32 = 1;
    /// Leave the fencing domain.
    pub const LEAVE: u32 = 2;
    /// Stream the debug ring buffer.
    pub const DUMP_DEBUG: u32 = 3;
    /// Record a node as fenced by an external agent.
    pub const EXTERNAL: u32 = 4;
    /// Fetch one node record.
    pub const NODE_INFO: u32 = 5;
    /// Fetch the domain summary record.
    pub const DOMAIN_INFO: u32 = 6;
    /// Fetch the domain member records.
    pub const DOMAIN_MEMBERS: u32 = 7;
}

/// Name of the only domain current clients address.
pub const DEFAULT_DOMAIN: &str = "default";

// ============================================================================
// Paths
// ============================================================================

/// Abstract-namespace socket name (no filesystem entry).
pub const FENCED_SOCK_NAME: &str = "fenced_sock";

/// Abstract socket name of the membership provider the daemon connects to.
pub const MEMBERSHIP_SOCK_NAME: &str = "fenced_membership";

/// Listen backlog for the client socket.
pub const LISTEN_BACKLOG: i32 = 5;

/// PID / single-instance lock file.
pub const LOCKFILE_PATH: &str = "/var/run/fenced.pid";

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cluster/fenced.json";

/// Default log file when not running in debug (foreground) mode.
pub const DEFAULT_LOG_PATH: &str = "/var/log/cluster/fenced.log";

// ============================================================================
// Limits
// ============================================================================

/// Maximum length of a fencing-domain name in bytes.
pub const MAX_GROUPNAME_LEN: usize = 32;

/// Maximum length of a node name in bytes.
pub const MAX_NODENAME_LEN: usize = 255;

/// Default capacity of the debug ring buffer (1 MiB).
pub const DUMP_SIZE: usize = 1024 * 1024;

/// Number of slots the reactor table grows by.
pub const REACTOR_CHUNK: usize = 32;

// ============================================================================
// Defaults
// ============================================================================

/// Default membership mode: 0 selects the newer group-communication backend.
pub const DEFAULT_GROUPD_COMPAT: u8 = 0;

/// Nodes are not assumed clean at startup unless asked.
pub const DEFAULT_CLEAN_START: bool = false;

/// Seconds to wait after joining before fencing absent nodes.
pub const DEFAULT_POST_JOIN_DELAY: i32 = 6;

/// Seconds to wait after a node failure before fencing it.
pub const DEFAULT_POST_FAIL_DELAY: i32 = 0;

/// Seconds between checks of the manual override file.
pub const DEFAULT_OVERRIDE_TIME: i32 = 3;

/// Smallest accepted override time.
pub const MIN_OVERRIDE_TIME: i32 = 3;

/// Manual override FIFO path.
pub const DEFAULT_OVERRIDE_PATH: &str = "/var/run/cluster/fenced_override";

/// Value written to `/proc/self/oom_adj` so the kernel avoids killing us.
pub const OOM_ADJ: i32 = -16;
