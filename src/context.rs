//! Daemon-wide state shared by every reactor callback.
//!
//! There is exactly one [`DaemonContext`]. It lives next to the reactor and
//! is passed by `&mut` into each callback, so the registry and debug ring
//! are only ever touched from the reactor thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::debug_ring::DebugRing;
use crate::domain::{DomainRegistry, NodeId};
use crate::membership::{MembershipBackend, MembershipEvent};
use crate::reactor::ReactorContext;

/// Append a formatted message to the debug ring and the debug log.
#[macro_export]
macro_rules! log_debug {
    ($cx:expr, $($arg:tt)*) => {
        $cx.log_debug(format_args!($($arg)*))
    };
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Everything the daemon's callbacks operate on.
pub struct DaemonContext {
    /// Live fencing domains.
    pub registry: DomainRegistry,
    /// Debug log served by `DUMP_DEBUG`.
    pub ring: DebugRing,
    /// Membership backend chosen at startup.
    pub backend: Box<dyn MembershipBackend>,
    /// Effective configuration.
    pub config: Config,
    /// Set by SIGTERM.
    pub shutdown: Arc<AtomicBool>,
    /// This node's id.
    pub our_nodeid: NodeId,
    /// This node's name.
    pub our_name: String,
    /// Last quorum state reported by the membership service.
    pub quorate: bool,
}

impl fmt::Debug for DaemonContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonContext")
            .field("domains", &self.registry.len())
            .field("mode", &self.backend.mode())
            .field("our_nodeid", &self.our_nodeid)
            .field("our_name", &self.our_name)
            .field("quorate", &self.quorate)
            .finish_non_exhaustive()
    }
}

impl DaemonContext {
    /// Build the context from the effective configuration.
    pub fn new(config: Config, backend: Box<dyn MembershipBackend>, shutdown: Arc<AtomicBool>) -> Self {
        let our_name = config
            .node_name
            .clone()
            .or_else(|| config.nodes.first().map(|n| n.name.clone()))
            .unwrap_or_default();
        Self {
            registry: DomainRegistry::new(),
            ring: DebugRing::new(config.debug_ring_size),
            backend,
            our_nodeid: config.our_nodeid(),
            our_name,
            config,
            shutdown,
            quorate: false,
        }
    }

    /// Record `<unix-seconds> <message>\n` in the debug ring and log it.
    pub fn log_debug(&mut self, args: fmt::Arguments<'_>) {
        let line = format!("{} {args}\n", unix_now());
        self.ring.append(line.as_bytes());
        log::debug!("{args}");
    }

    /// Feed one membership event to the backend.
    pub fn apply_membership(&mut self, event: &MembershipEvent) {
        log_debug!(self, "membership {event:?}");
        match event {
            MembershipEvent::Quorum { quorate } => self.quorate = *quorate,
            _ => self.backend.apply(event, &mut self.registry, unix_now()),
        }
    }
}

impl ReactorContext for DaemonContext {
    fn on_interrupted(&mut self) -> bool {
        if !self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        if self.registry.is_empty() {
            // `run` then returns Ok and the process exits 0. Older fenced
            // releases exited 1 on this path.
            log_debug!(self, "shutdown requested, no domains joined");
            return true;
        }
        log_debug!(self, "shutdown ignored, {} domain(s) still joined", self.registry.len());
        self.shutdown.store(false, Ordering::SeqCst);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeEntry;
    use crate::membership::{GroupMode, StaticBackend};

    fn context() -> DaemonContext {
        let config = Config {
            nodes: vec![
                NodeEntry { name: "node-a".into(), nodeid: 1 },
                NodeEntry { name: "node-b".into(), nodeid: 2 },
            ],
            debug_ring_size: 256,
            ..Config::default()
        };
        let backend = StaticBackend::from_config(&config);
        DaemonContext::new(config, Box::new(backend), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_identity_from_node_table() {
        let cx = context();
        assert_eq!(cx.our_nodeid, 1);
        assert_eq!(cx.our_name, "node-a");
        assert_eq!(cx.backend.mode(), GroupMode::Libcpg);
        assert_eq!(cx.ring.capacity(), 256);
    }

    #[test]
    fn test_log_debug_format() {
        let mut cx = context();
        log_debug!(cx, "join {}", "default");
        let text = String::from_utf8(cx.ring.snapshot()).unwrap();
        let (secs, rest) = text.split_once(' ').unwrap();
        assert!(secs.parse::<i64>().is_ok(), "{text:?}");
        assert_eq!(rest, "join default\n");
    }

    #[test]
    fn test_interrupt_without_shutdown_keeps_running() {
        let mut cx = context();
        assert!(!cx.on_interrupted());
    }

    #[test]
    fn test_shutdown_with_empty_registry_stops() {
        let mut cx = context();
        cx.shutdown.store(true, Ordering::SeqCst);
        assert!(cx.on_interrupted());
    }

    #[test]
    fn test_shutdown_with_joined_domain_is_cleared() {
        let mut cx = context();
        cx.registry.create("default").unwrap();
        cx.shutdown.store(true, Ordering::SeqCst);
        assert!(!cx.on_interrupted());
        assert!(!cx.shutdown.load(Ordering::SeqCst));
    }

    #[test]
    fn test_quorum_event_updates_flag() {
        let mut cx = context();
        cx.apply_membership(&MembershipEvent::Quorum { quorate: true });
        assert!(cx.quorate);
    }
}
