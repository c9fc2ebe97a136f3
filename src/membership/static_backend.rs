//! In-process membership backend driven by a node table.
//!
//! Nodes listed in the configuration start out up. Events arriving on the
//! membership channel move them up and down; each joined domain tracks the
//! effect on its members, victims and history.

use std::collections::BTreeSet;

use super::{GroupMode, MembershipBackend, MembershipEvent};
use crate::config::{Config, NodeEntry};
use crate::domain::{DomainRegistry, FenceDomain, FenceHow, NodeId};
use crate::error::DomainError;

/// Membership backend with a static node table.
#[derive(Debug)]
pub struct StaticBackend {
    mode: GroupMode,
    our_nodeid: NodeId,
    nodes: Vec<NodeEntry>,
    live: BTreeSet<NodeId>,
}

impl StaticBackend {
    /// Backend for `mode` where every listed node starts up.
    pub fn new(mode: GroupMode, our_nodeid: NodeId, nodes: Vec<NodeEntry>) -> Self {
        let live = nodes.iter().map(|n| n.nodeid).collect();
        Self {
            mode,
            our_nodeid,
            nodes,
            live,
        }
    }

    /// Backend described by the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        let mode = if config.uses_libgroup() {
            GroupMode::Libgroup
        } else {
            GroupMode::Libcpg
        };
        Self::new(mode, config.our_nodeid(), config.nodes.clone())
    }

    /// Nodes currently up.
    pub fn live_nodes(&self) -> &BTreeSet<NodeId> {
        &self.live
    }

    fn node_up(&mut self, nodeid: NodeId, name: &str, registry: &mut DomainRegistry, now: i64) {
        match self.nodes.iter().position(|n| n.nodeid == nodeid) {
            Some(idx) => name.clone_into(&mut self.nodes[idx].name),
            None => self.nodes.push(NodeEntry { name: name.to_owned(), nodeid }),
        }
        if !self.live.insert(nodeid) {
            return;
        }
        for fd in registry.iter_mut().filter(|fd| fd.joined) {
            fd.members.insert(nodeid);
            if fd.victims.remove(&nodeid) {
                fd.complete.insert(nodeid);
            }
            fd.queue_change(BTreeSet::from([nodeid]), BTreeSet::new(), now);
        }
    }

    fn node_down(&mut self, nodeid: NodeId, registry: &mut DomainRegistry, now: i64) {
        self.live.remove(&nodeid);
        for fd in registry.iter_mut().filter(|fd| fd.joined) {
            if !fd.members.remove(&nodeid) {
                continue;
            }
            if fd.leaving.remove(&nodeid) {
                fd.queue_change(BTreeSet::new(), BTreeSet::from([nodeid]), now);
                continue;
            }
            fd.victims.insert(nodeid);
            fd.history_mut(nodeid).fail_time = now;
            fd.queue_change(BTreeSet::new(), BTreeSet::from([nodeid]), now);
        }
    }
}

impl MembershipBackend for StaticBackend {
    fn mode(&self) -> GroupMode {
        self.mode
    }

    fn join(&mut self, fd: &mut FenceDomain, now: i64) -> Result<(), DomainError> {
        if self.our_nodeid == 0 {
            return Err(DomainError::Backend("local node id unknown".into()));
        }
        fd.members = self.live.clone();
        fd.members.insert(self.our_nodeid);
        fd.prev = fd.members.clone();
        let joined = fd.members.clone();
        fd.queue_change(joined, BTreeSet::new(), now);
        fd.joined = true;
        Ok(())
    }

    fn leave(&mut self, fd: &mut FenceDomain) -> Result<(), DomainError> {
        fd.leaving.insert(self.our_nodeid);
        fd.joined = false;
        Ok(())
    }

    fn name_to_nodeid(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.nodeid)
    }

    fn send_external(&mut self, fd: &mut FenceDomain, nodeid: NodeId, now: i64) -> Result<(), DomainError> {
        if self.mode == GroupMode::Libgroup {
            return Err(DomainError::NotSupported("external fencing"));
        }
        fd.record_fenced(nodeid, self.our_nodeid, FenceHow::External, now);
        Ok(())
    }

    fn apply(&mut self, event: &MembershipEvent, registry: &mut DomainRegistry, now: i64) {
        match event {
            MembershipEvent::NodeUp { nodeid, name } => self.node_up(*nodeid, name, registry, now),
            MembershipEvent::NodeDown { nodeid } => self.node_down(*nodeid, registry, now),
            MembershipEvent::Quorum { .. } => {}
        }
    }
}
