//! Fencing domains: state, registry and lifecycle.
//!
//! A fencing domain is a named set of cooperating nodes that agree on who
//! gets fenced. Each domain owns the containers that track the fencing
//! workflow (pending membership changes, node history, victims, ...).
//! Dropping a [`FenceDomain`] releases all of them.
//!
//! # Modules
//!
//! - [`registry`] - Name-keyed collection of live domains
//! - [`lifecycle`] - Join / leave / query operations routed through the
//!   active membership backend

pub mod lifecycle;
pub mod registry;

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::DomainError;

pub use registry::DomainRegistry;

/// Cluster node identifier.
pub type NodeId = i32;

/// How a node ended up fenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceHow {
    /// A configured fence agent succeeded.
    Agent,
    /// An administrator acknowledged via the override file.
    Override,
    /// An external agent reported it through the `EXTERNAL` command.
    External,
}

impl FenceHow {
    /// Code used in node records.
    pub fn code(self) -> i32 {
        match self {
            FenceHow::Agent => 1,
            FenceHow::Override => 2,
            FenceHow::External => 3,
        }
    }
}

/// A queued membership change awaiting processing by the fencing workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Monotonic per-domain sequence number.
    pub seq: u32,
    /// Members after the change.
    pub members: BTreeSet<NodeId>,
    /// Nodes that joined in this change.
    pub joined: BTreeSet<NodeId>,
    /// Nodes that failed or left in this change.
    pub removed: BTreeSet<NodeId>,
    /// Unix time the change was observed.
    pub created: i64,
}

/// Per-node record of fencing-relevant events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHistory {
    /// Node this entry describes.
    pub nodeid: NodeId,
    /// Unix time of the last observed failure.
    pub fail_time: i64,
    /// Unix time of the last completed fence, 0 if never fenced.
    pub fence_time: i64,
    /// Node that carried out the last fence.
    pub fence_master: NodeId,
    /// How the last fence was carried out.
    pub fence_how: Option<FenceHow>,
}

impl NodeHistory {
    fn new(nodeid: NodeId) -> Self {
        Self {
            nodeid,
            fail_time: 0,
            fence_time: 0,
            fence_master: 0,
            fence_how: None,
        }
    }
}

/// Settings a domain reads when it is joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    /// Seconds to wait after joining before fencing absent nodes (-1 = forever).
    pub post_join_delay: i32,
    /// Seconds to wait after a failure before fencing (-1 = forever).
    pub post_fail_delay: i32,
    /// Assume every node is clean when the domain starts.
    pub clean_start: bool,
    /// Seconds between override-file checks.
    pub override_time: i32,
    /// Manual override FIFO.
    pub override_path: PathBuf,
}

impl DomainConfig {
    /// Derive the domain settings from the daemon configuration.
    pub fn load(config: &Config) -> Result<Self, DomainError> {
        if !config.override_path.is_absolute() {
            return Err(DomainError::Config(format!(
                "override path {} is not absolute",
                config.override_path.display()
            )));
        }
        Ok(Self {
            post_join_delay: config.post_join_delay,
            post_fail_delay: config.post_fail_delay,
            clean_start: config.clean_start,
            override_time: config.override_time,
            override_path: config.override_path.clone(),
        })
    }
}

/// One fencing domain and everything it owns.
#[derive(Debug)]
pub struct FenceDomain {
    name: String,
    /// Membership changes not yet processed.
    pub changes: VecDeque<Change>,
    /// The change currently being processed, if any.
    pub started_change: Option<Change>,
    /// Per-node fencing history.
    pub node_history: Vec<NodeHistory>,
    /// Nodes waiting to be fenced.
    pub victims: BTreeSet<NodeId>,
    /// Nodes fenced since the last change completed.
    pub complete: BTreeSet<NodeId>,
    /// Members as of the previous completed change.
    pub prev: BTreeSet<NodeId>,
    /// Nodes leaving cleanly (never fenced).
    pub leaving: BTreeSet<NodeId>,
    /// Current domain members.
    pub members: BTreeSet<NodeId>,
    /// Settings loaded at join time.
    pub config: Option<DomainConfig>,
    /// True once the membership backend accepted the join.
    pub joined: bool,
    next_seq: u32,
}

impl FenceDomain {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            changes: VecDeque::new(),
            started_change: None,
            node_history: Vec::new(),
            victims: BTreeSet::new(),
            complete: BTreeSet::new(),
            prev: BTreeSet::new(),
            leaving: BTreeSet::new(),
            members: BTreeSet::new(),
            config: None,
            joined: false,
            next_seq: 1,
        }
    }

    /// Domain name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a membership change and return its sequence number.
    pub fn queue_change(&mut self, joined: BTreeSet<NodeId>, removed: BTreeSet<NodeId>, now: i64) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);
        self.changes.push_back(Change {
            seq,
            members: self.members.clone(),
            joined,
            removed,
            created: now,
        });
        seq
    }

    /// History entry for `nodeid`, created on first use.
    pub fn history_mut(&mut self, nodeid: NodeId) -> &mut NodeHistory {
        let idx = match self.node_history.iter().position(|h| h.nodeid == nodeid) {
            Some(idx) => idx,
            None => {
                self.node_history.push(NodeHistory::new(nodeid));
                self.node_history.len() - 1
            }
        };
        &mut self.node_history[idx]
    }

    /// History entry for `nodeid`, if one exists.
    pub fn history(&self, nodeid: NodeId) -> Option<&NodeHistory> {
        self.node_history.iter().find(|h| h.nodeid == nodeid)
    }

    /// Record that `nodeid` was fenced and move it from victims to complete.
    pub fn record_fenced(&mut self, nodeid: NodeId, master: NodeId, how: FenceHow, now: i64) {
        let history = self.history_mut(nodeid);
        history.fence_time = now;
        history.fence_master = master;
        history.fence_how = Some(how);
        self.victims.remove(&nodeid);
        self.complete.insert(nodeid);
    }

    /// Number of queued changes plus the one in progress.
    pub fn pending_changes(&self) -> usize {
        self.changes.len() + usize::from(self.started_change.is_some())
    }
}
