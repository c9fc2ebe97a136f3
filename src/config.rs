//! Daemon configuration loading.
//!
//! Settings come from, in increasing precedence: built-in defaults, a JSON
//! file, environment variables, then command-line flags (applied by the
//! binary). Every field has a default so a partial file is fine.
//!
//! # Environment Variables
//!
//! - `FENCED_CONFIG` - Path of the JSON config file
//! - `FENCED_SOCKET` - Socket address; a leading `/` selects a filesystem
//!   path, anything else an abstract name
//! - `FENCED_MEMBERSHIP_SOCKET` - Membership provider address, same syntax
//!   as `FENCED_SOCKET`
//! - `FENCED_LOCK_FILE` - PID / lock file path
//! - `FENCED_LOG_FILE` - Log file used outside debug mode
//! - `FENCED_NODE_NAME` - Name of this node in the static node table

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CLEAN_START, DEFAULT_CONFIG_PATH, DEFAULT_GROUPD_COMPAT, DEFAULT_LOG_PATH,
    DEFAULT_OVERRIDE_PATH, DEFAULT_OVERRIDE_TIME, DEFAULT_POST_FAIL_DELAY,
    DEFAULT_POST_JOIN_DELAY, DUMP_SIZE, FENCED_SOCK_NAME, LOCKFILE_PATH, MEMBERSHIP_SOCK_NAME, MIN_OVERRIDE_TIME,
};
use crate::domain::NodeId;
use crate::socket::SocketAddress;

/// One entry of the static node table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeEntry {
    /// Node name as clients refer to it.
    pub name: String,
    /// Cluster node id.
    pub nodeid: NodeId,
}

/// Configuration for the fenced daemon.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Membership mode: 0 = group-communication backend, 1 or 2 = legacy groupd.
    pub groupd_compat: u8,
    /// All nodes are in a clean state at start.
    pub clean_start: bool,
    /// Post-join fencing delay in seconds (-1 = unbounded).
    pub post_join_delay: i32,
    /// Post-fail fencing delay in seconds (-1 = unbounded).
    pub post_fail_delay: i32,
    /// Override-file poll interval in seconds (minimum 3).
    pub override_time: i32,
    /// Manual override FIFO path.
    pub override_path: PathBuf,
    /// Client socket address.
    pub socket: SocketAddress,
    /// Membership provider the daemon connects to at startup. `null` keeps
    /// the channel in-process, fed through [`Daemon::take_feed`].
    ///
    /// [`Daemon::take_feed`]: crate::daemon::Daemon::take_feed
    pub membership_socket: Option<SocketAddress>,
    /// PID / single-instance lock file.
    pub lock_file: PathBuf,
    /// Log file used when not in debug mode.
    pub log_file: PathBuf,
    /// Debug ring capacity in bytes.
    pub debug_ring_size: usize,
    /// Static node table for the in-process membership backend.
    pub nodes: Vec<NodeEntry>,
    /// Name of this node; defaults to the first table entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            groupd_compat: DEFAULT_GROUPD_COMPAT,
            clean_start: DEFAULT_CLEAN_START,
            post_join_delay: DEFAULT_POST_JOIN_DELAY,
            post_fail_delay: DEFAULT_POST_FAIL_DELAY,
            override_time: DEFAULT_OVERRIDE_TIME,
            override_path: PathBuf::from(DEFAULT_OVERRIDE_PATH),
            socket: SocketAddress::Abstract(FENCED_SOCK_NAME.to_string()),
            membership_socket: Some(SocketAddress::Abstract(MEMBERSHIP_SOCK_NAME.to_string())),
            lock_file: PathBuf::from(LOCKFILE_PATH),
            log_file: PathBuf::from(DEFAULT_LOG_PATH),
            debug_ring_size: DUMP_SIZE,
            nodes: Vec::new(),
            node_name: None,
        }
    }
}

impl Config {
    /// Path of the config file: `FENCED_CONFIG` or the default location.
    pub fn config_path() -> PathBuf {
        std::env::var("FENCED_CONFIG").map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// Load the config file (if present) and apply environment overrides.
    ///
    /// A missing file yields defaults; an unreadable or malformed one is an
    /// error.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.normalize();
        Ok(config)
    }

    /// Parse a JSON config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.normalize();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(socket) = std::env::var("FENCED_SOCKET") {
            self.socket = SocketAddress::parse(&socket);
        }
        if let Ok(socket) = std::env::var("FENCED_MEMBERSHIP_SOCKET") {
            self.membership_socket = Some(SocketAddress::parse(&socket));
        }
        if let Ok(path) = std::env::var("FENCED_LOCK_FILE") {
            self.lock_file = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("FENCED_LOG_FILE") {
            self.log_file = PathBuf::from(path);
        }
        if let Ok(name) = std::env::var("FENCED_NODE_NAME") {
            self.node_name = Some(name);
        }
    }

    /// Clamp values to their accepted ranges.
    pub fn normalize(&mut self) {
        if self.override_time < MIN_OVERRIDE_TIME {
            self.override_time = MIN_OVERRIDE_TIME;
        }
        if self.debug_ring_size == 0 {
            self.debug_ring_size = DUMP_SIZE;
        }
    }

    /// True when the legacy groupd-compatible backend is selected.
    pub fn uses_libgroup(&self) -> bool {
        self.groupd_compat != 0
    }

    /// Node id of this node from the static table.
    ///
    /// Uses `node_name` when set, otherwise the first entry; 0 if unknown.
    pub fn our_nodeid(&self) -> NodeId {
        match &self.node_name {
            Some(name) => self
                .nodes
                .iter()
                .find(|n| &n.name == name)
                .map_or(0, |n| n.nodeid),
            None => self.nodes.first().map_or(0, |n| n.nodeid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.post_join_delay, DEFAULT_POST_JOIN_DELAY);
        assert_eq!(config.override_time, DEFAULT_OVERRIDE_TIME);
        assert_eq!(config.socket, SocketAddress::Abstract(FENCED_SOCK_NAME.into()));
        assert!(!config.uses_libgroup());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"post_fail_delay": -1, "groupd_compat": 1}}"#).unwrap();
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.post_fail_delay, -1);
        assert!(config.uses_libgroup());
        assert_eq!(config.post_join_delay, DEFAULT_POST_JOIN_DELAY);
        assert_eq!(config.lock_file, PathBuf::from(LOCKFILE_PATH));
    }

    #[test]
    fn test_membership_socket_setting() {
        assert_eq!(
            Config::default().membership_socket,
            Some(SocketAddress::Abstract(MEMBERSHIP_SOCK_NAME.into()))
        );

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"membership_socket": {{"path": "/run/cluster/members.sock"}}}}"#).unwrap();
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(
            config.membership_socket,
            Some(SocketAddress::Path("/run/cluster/members.sock".into()))
        );

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"membership_socket": null}}"#).unwrap();
        assert_eq!(Config::load_from_file(file.path()).unwrap().membership_socket, None);
    }

    #[test]
    fn test_override_time_is_clamped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"override_time": 1}}"#).unwrap();
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.override_time, MIN_OVERRIDE_TIME);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"), "{err}");
    }

    #[test]
    fn test_our_nodeid_lookup() {
        let mut config = Config {
            nodes: vec![
                NodeEntry { name: "node-a".into(), nodeid: 1 },
                NodeEntry { name: "node-b".into(), nodeid: 2 },
            ],
            ..Config::default()
        };
        assert_eq!(config.our_nodeid(), 1);
        config.node_name = Some("node-b".into());
        assert_eq!(config.our_nodeid(), 2);
        config.node_name = Some("node-z".into());
        assert_eq!(config.our_nodeid(), 0);
    }
}
