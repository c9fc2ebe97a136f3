//! Daemon process setup.
//!
//! Single-instance lock file, OOM-killer adjustment, and assembly of the
//! reactor with its two long-lived sources (client listener and membership
//! channel). The membership channel is a connection to the configured
//! provider, or an in-process pair when `membership_socket` is unset.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::context::DaemonContext;
use crate::log_debug;
use crate::membership::channel::{self, MembershipChannel};
use crate::membership::{MembershipFeed, StaticBackend};
use crate::reactor::Reactor;
use crate::socket::listener::ListenerSource;

/// Held PID / lock file. The lock lasts as long as this value.
#[derive(Debug)]
pub struct LockFile {
    _file: File,
    path: PathBuf,
}

impl LockFile {
    /// Take an exclusive, non-blocking lock on `path` and write our PID.
    ///
    /// Fails with "is already running" if another process holds the lock.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        // SAFETY: `file` owns a valid descriptor for the duration of the call.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                bail!("fenced is already running (lock held on {})", path.display());
            }
            return Err(err).with_context(|| format!("Failed to lock {}", path.display()));
        }

        file.set_len(0)
            .with_context(|| format!("Failed to truncate {}", path.display()))?;
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("Failed to write PID to {}", path.display()))?;
        log::info!("Wrote PID file: {} (pid={})", path.display(), std::process::id());

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Ask the kernel not to pick us when memory runs out. Best-effort.
pub fn set_oom_adj(value: i32) {
    if let Err(e) = std::fs::write("/proc/self/oom_adj", format!("{value}\n")) {
        log::debug!("Could not set oom_adj to {value}: {e}");
    }
}

/// The assembled daemon: reactor, context and membership feed.
#[derive(Debug)]
pub struct Daemon {
    reactor: Reactor<DaemonContext>,
    cx: DaemonContext,
    feed: Option<MembershipFeed>,
}

impl Daemon {
    /// Bind the client socket, open the membership channel and register
    /// both with a fresh reactor.
    ///
    /// Fails if the configured membership provider cannot be reached.
    pub fn new(config: Config, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let backend = StaticBackend::from_config(&config);
        let mut cx = DaemonContext::new(config, Box::new(backend), shutdown);
        let mut reactor = Reactor::new();

        let listener = ListenerSource::bind(&cx.config.socket)?;
        reactor.register(Box::new(listener));

        let feed = match &cx.config.membership_socket {
            Some(addr) => {
                reactor.register(Box::new(MembershipChannel::connect(addr)?));
                None
            }
            None => {
                let (channel, feed) = channel::channel()?;
                reactor.register(Box::new(channel));
                Some(feed)
            }
        };

        let (mode, our_nodeid) = (cx.backend.mode(), cx.our_nodeid);
        log_debug!(
            cx,
            "fenced {} started, mode {mode:?}, our_nodeid {our_nodeid}",
            env!("CARGO_PKG_VERSION")
        );
        Ok(Self { reactor, cx, feed })
    }

    /// Run the reactor until shutdown or a fatal error.
    pub fn run(&mut self) -> Result<()> {
        let result = self.reactor.run(&mut self.cx);
        match &result {
            Ok(()) => log::info!("fenced shutting down"),
            Err(e) => log::error!("fenced exiting: {e:#}"),
        }
        result
    }

    /// Take the in-process membership feed out of the daemon.
    ///
    /// `None` when connected to a membership provider. Once the feed is
    /// dropped the channel closes and [`run`]
    /// returns an error.
    ///
    /// [`run`]: Daemon::run
    pub fn take_feed(&mut self) -> Option<MembershipFeed> {
        self.feed.take()
    }

    /// Daemon state.
    pub fn context(&self) -> &DaemonContext {
        &self.cx
    }

    /// Reactor table.
    pub fn reactor(&self) -> &Reactor<DaemonContext> {
        &self.reactor
    }
}
