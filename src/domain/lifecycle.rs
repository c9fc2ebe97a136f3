//! Join, leave and query operations on a fencing domain.
//!
//! Each operation looks the domain up in the registry and routes the work to
//! the membership backend chosen at startup. Failures are returned as
//! [`DomainError`]s; the command layer decides whether they become a result
//! code or just a debug log line.

use super::{DomainConfig, NodeId};
use crate::context::{unix_now, DaemonContext};
use crate::error::DomainError;
use crate::log_debug;
use crate::membership::GroupMode;
use crate::socket::framing::{DomainRecord, NodeRecord};

/// Create `name`, load its settings and join it through the backend.
///
/// On any failure after creation the domain is removed again, so a failed
/// join never leaves a half-built domain behind.
pub fn join(cx: &mut DaemonContext, name: &str) -> Result<(), DomainError> {
    let fd = cx.registry.create(name)?;
    let result = DomainConfig::load(&cx.config).and_then(|dc| {
        fd.config = Some(dc);
        cx.backend.join(fd, unix_now())
    });

    match result {
        Ok(()) => {
            log_debug!(cx, "join {name} done");
            Ok(())
        }
        Err(e) => {
            cx.registry.destroy(name);
            Err(e)
        }
    }
}

/// Leave `name` through the backend and destroy it.
pub fn leave(cx: &mut DaemonContext, name: &str) -> Result<(), DomainError> {
    let fd = cx
        .registry
        .find_mut(name)
        .ok_or_else(|| DomainError::NotFound(name.to_owned()))?;
    cx.backend.leave(fd)?;
    cx.registry.destroy(name);
    log_debug!(cx, "leave {name} done");
    Ok(())
}

/// Record that the node called `node_name` was fenced by an external agent.
///
/// Unsupported on the legacy backend. An unknown node name is logged and
/// ignored.
pub fn external(cx: &mut DaemonContext, name: &str, node_name: &str) -> Result<(), DomainError> {
    if cx.registry.find(name).is_none() {
        return Err(DomainError::NotFound(name.to_owned()));
    }
    if cx.backend.mode() == GroupMode::Libgroup {
        return Err(DomainError::NotSupported("external fencing"));
    }
    let Some(nodeid) = cx.backend.name_to_nodeid(node_name) else {
        log_debug!(cx, "external: unknown node name {node_name:?}");
        return Ok(());
    };

    let fd = cx
        .registry
        .find_mut(name)
        .ok_or_else(|| DomainError::NotFound(name.to_owned()))?;
    cx.backend.send_external(fd, nodeid, unix_now())?;
    log_debug!(cx, "external fence of {node_name} ({nodeid}) recorded in {name}");
    Ok(())
}

/// Node record for `nodeid` in `name`.
pub fn node_info(cx: &DaemonContext, name: &str, nodeid: NodeId) -> Result<NodeRecord, DomainError> {
    let fd = cx
        .registry
        .find(name)
        .ok_or_else(|| DomainError::NotFound(name.to_owned()))?;
    cx.backend.node_info(fd, nodeid)
}

/// Summary record for `name`.
pub fn domain_info(cx: &DaemonContext, name: &str) -> Result<DomainRecord, DomainError> {
    let fd = cx
        .registry
        .find(name)
        .ok_or_else(|| DomainError::NotFound(name.to_owned()))?;
    cx.backend.domain_info(fd)
}

/// Member records for `name` in backend order.
pub fn domain_members(cx: &DaemonContext, name: &str) -> Result<Vec<NodeRecord>, DomainError> {
    let fd = cx
        .registry
        .find(name)
        .ok_or_else(|| DomainError::NotFound(name.to_owned()))?;
    cx.backend.domain_members(fd)
}
