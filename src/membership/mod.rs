//! Cluster membership: the backend trait and its event channel.
//!
//! The daemon learns about nodes joining and failing from a membership
//! service. Which service is in use (legacy groupd or the newer
//! group-communication protocol) is fixed at startup; the rest of the
//! daemon only sees [`MembershipBackend`].
//!
//! # Event flow
//!
//! ```text
//! MembershipFeed ──newline-delimited JSON──► MembershipChannel (reactor slot)
//!                                                   │ MembershipEvent
//!                                                   ▼
//!                                    MembershipBackend::apply(registry)
//! ```
//!
//! # Modules
//!
//! - [`channel`] - Reactor source reading events, and the feed that writes them
//! - [`static_backend`] - In-process backend driven by a configured node table

pub mod channel;
pub mod static_backend;

use serde::{Deserialize, Serialize};

use crate::domain::{DomainRegistry, FenceDomain, NodeId};
use crate::error::DomainError;
use crate::socket::framing::{DomainRecord, NodeRecord};

pub use channel::{MembershipChannel, MembershipFeed};
pub use static_backend::StaticBackend;

/// Membership protocol the daemon runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// Legacy groupd-compatible protocol.
    Libgroup,
    /// Group-communication (closed process group) protocol.
    Libcpg,
}

impl GroupMode {
    /// Value reported in the domain record's `group_mode` field.
    pub fn code(self) -> i32 {
        match self {
            GroupMode::Libgroup => 2,
            GroupMode::Libcpg => 3,
        }
    }
}

/// A membership event as carried on the channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MembershipEvent {
    /// A node joined the cluster.
    NodeUp {
        /// Node id.
        nodeid: NodeId,
        /// Node name used by `EXTERNAL` requests.
        name: String,
    },
    /// A node left or failed.
    NodeDown {
        /// Node id.
        nodeid: NodeId,
    },
    /// Cluster quorum changed.
    Quorum {
        /// True if the cluster is quorate.
        quorate: bool,
    },
}

/// Procedural interface to the active membership service.
///
/// The query methods have default implementations that read the domain's
/// own bookkeeping, which both protocols maintain the same way.
pub trait MembershipBackend {
    /// Protocol in use for the process lifetime.
    fn mode(&self) -> GroupMode;

    /// Join the domain's process group.
    fn join(&mut self, fd: &mut FenceDomain, now: i64) -> Result<(), DomainError>;

    /// Leave the domain's process group.
    fn leave(&mut self, fd: &mut FenceDomain) -> Result<(), DomainError>;

    /// Resolve a node name to its id.
    fn name_to_nodeid(&self, name: &str) -> Option<NodeId>;

    /// Tell the domain that `nodeid` was fenced by an external agent.
    fn send_external(&mut self, fd: &mut FenceDomain, nodeid: NodeId, now: i64) -> Result<(), DomainError>;

    /// Apply one membership event to every affected domain.
    fn apply(&mut self, event: &MembershipEvent, registry: &mut DomainRegistry, now: i64);

    /// Record describing `nodeid` in `fd`.
    fn node_info(&self, fd: &FenceDomain, nodeid: NodeId) -> Result<NodeRecord, DomainError> {
        let member = fd.members.contains(&nodeid);
        let victim = fd.victims.contains(&nodeid);
        let history = fd.history(nodeid);
        if !member && !victim && history.is_none() {
            return Err(DomainError::NotFound(format!("{}/node {nodeid}", fd.name())));
        }
        Ok(node_record(fd, nodeid))
    }

    /// Summary record for `fd`.
    fn domain_info(&self, fd: &FenceDomain) -> Result<DomainRecord, DomainError> {
        Ok(DomainRecord {
            group_mode: self.mode().code(),
            member_count: fd.members.len() as i32,
            master_nodeid: master_nodeid(fd),
            victim_count: fd.victims.len() as i32,
            current_victim: fd.victims.first().copied().unwrap_or(0),
            state: i32::from(fd.pending_changes() > 0),
        })
    }

    /// Records for every member of `fd`, lowest id first.
    fn domain_members(&self, fd: &FenceDomain) -> Result<Vec<NodeRecord>, DomainError> {
        Ok(fd.members.iter().map(|&id| node_record(fd, id)).collect())
    }
}

/// Lowest member id, or 0 for an empty domain.
pub fn master_nodeid(fd: &FenceDomain) -> NodeId {
    fd.members.first().copied().unwrap_or(0)
}

fn node_record(fd: &FenceDomain, nodeid: NodeId) -> NodeRecord {
    let mut record = NodeRecord {
        nodeid,
        member: i32::from(fd.members.contains(&nodeid)),
        victim: i32::from(fd.victims.contains(&nodeid)),
        ..NodeRecord::default()
    };
    if let Some(h) = fd.history(nodeid) {
        record.last_fenced_master = h.fence_master;
        record.last_fenced_how = h.fence_how.map_or(0, |how| how.code());
        record.last_fenced_time = h.fence_time.max(0) as u64;
    }
    record
}
