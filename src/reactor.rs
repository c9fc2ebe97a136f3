//! Single-threaded `poll(2)` reactor.
//!
//! Every I/O source the daemon cares about (the client listener, the
//! membership channel, each accepted client connection) is an entry in one
//! table. One blocking `poll` call reports readiness for all of them and the
//! ready entries are dispatched in ascending slot order.
//!
//! # Table
//!
//! ```text
//! slots:   [ Some(listener) | Some(membership) | None | Some(client) | None ... ]
//! pollfds: [ fd 3           | fd 4             | -1   | fd 7         | -1   ... ]
//!                                                       ^ high water
//! ```
//!
//! The table grows by a fixed chunk and never shrinks or compacts. A free
//! slot carries the sentinel descriptor [`FREE_SLOT`], which `poll` ignores.
//! Slot indices double as [`SourceId`]s and may be reused once a source is
//! unregistered. The high-water index only moves up and bounds how much of
//! the table each pass scans.
//!
//! # Dispatch
//!
//! For each ready slot the readiness callback runs first; if the slot also
//! reported error / hang-up / invalid and is still open, the failure callback
//! runs next. Callbacks return a [`Disposition`] instead of touching the table
//! directly; sources they want to add go through a [`Registrar`] and are
//! registered once the callback returns.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;

use anyhow::{bail, Result};

use crate::constants::REACTOR_CHUNK;

/// Descriptor value marking an unused slot.
pub const FREE_SLOT: RawFd = -1;

/// Poll events that route to the failure callback.
const FAILURE_EVENTS: libc::c_short = libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;

/// Index of a registered source in the reactor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub usize);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which readiness a source wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Data (or a connection) is available to read.
    Readable,
    /// The socket buffer has room for more output.
    Writable,
}

impl Interest {
    fn poll_events(self) -> libc::c_short {
        match self {
            Interest::Readable => libc::POLLIN,
            Interest::Writable => libc::POLLOUT,
        }
    }
}

/// What the reactor should do with a source after a callback.
#[derive(Debug)]
pub enum Disposition {
    /// Keep the source registered.
    Continue,
    /// Unregister the source and drop it (closing its descriptor).
    Close,
    /// Stop the reactor with this error.
    Fatal(anyhow::Error),
}

/// Whether the reactor loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Wait again.
    Continue,
    /// Leave the loop.
    Stop,
}

/// A registered I/O source: a descriptor plus its two callbacks.
///
/// `C` is the context handed to every callback (the daemon context in
/// production).
pub trait EventSource<C> {
    /// Descriptor to poll.
    fn fd(&self) -> RawFd;

    /// Readiness this source is currently waiting for.
    fn interest(&self) -> Interest {
        Interest::Readable
    }

    /// Called when the requested readiness is reported.
    fn on_readable(&mut self, cx: &mut C, registrar: &mut Registrar<C>) -> Disposition;

    /// Called on error, hang-up or an invalid descriptor.
    fn on_error(&mut self, _cx: &mut C, _registrar: &mut Registrar<C>) -> Disposition {
        Disposition::Close
    }

    /// Short label for logs.
    fn kind(&self) -> &'static str;
}

/// Context hook consulted when the wait is interrupted by a signal.
pub trait ReactorContext {
    /// Return `true` to stop the loop, `false` to wait again.
    fn on_interrupted(&mut self) -> bool;
}

/// Collects sources a callback wants registered.
pub struct Registrar<C> {
    pending: Vec<Box<dyn EventSource<C>>>,
}

impl<C> fmt::Debug for Registrar<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<C> Default for Registrar<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Registrar<C> {
    /// Create an empty registrar.
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    /// Queue `source` for registration after the current callback.
    pub fn register(&mut self, source: Box<dyn EventSource<C>>) {
        self.pending.push(source);
    }
}

/// The reactor table and wait loop.
pub struct Reactor<C> {
    slots: Vec<Option<Box<dyn EventSource<C>>>>,
    pollfds: Vec<libc::pollfd>,
    chunk: usize,
    high_water: Option<usize>,
    growths: usize,
}

impl<C> fmt::Debug for Reactor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("capacity", &self.slots.len())
            .field("active", &self.active_count())
            .field("high_water", &self.high_water)
            .field("growths", &self.growths)
            .finish()
    }
}

impl<C> Default for Reactor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Reactor<C> {
    /// Create an empty reactor growing by [`REACTOR_CHUNK`] slots.
    pub fn new() -> Self {
        Self::with_chunk(REACTOR_CHUNK)
    }

    /// Create an empty reactor growing by `chunk` slots.
    ///
    /// # Panics
    ///
    /// Panics if `chunk == 0`.
    pub fn with_chunk(chunk: usize) -> Self {
        assert!(chunk > 0, "reactor chunk must be > 0");
        Self {
            slots: Vec::new(),
            pollfds: Vec::new(),
            chunk,
            high_water: None,
            growths: 0,
        }
    }

    /// Register a source in the first free slot, growing the table if full.
    pub fn register(&mut self, source: Box<dyn EventSource<C>>) -> SourceId {
        let idx = match self.pollfds.iter().position(|p| p.fd == FREE_SLOT) {
            Some(idx) => idx,
            None => {
                let idx = self.slots.len();
                self.grow();
                idx
            }
        };

        let fd = source.fd();
        debug_assert!(fd != FREE_SLOT, "source registered with sentinel descriptor");
        log::trace!("reactor: register {} fd {fd} in slot {idx}", source.kind());

        self.pollfds[idx] = libc::pollfd {
            fd,
            events: source.interest().poll_events(),
            revents: 0,
        };
        self.slots[idx] = Some(source);
        if self.high_water.map_or(true, |hw| idx > hw) {
            self.high_water = Some(idx);
        }
        SourceId(idx)
    }

    /// Unregister a source, dropping it and freeing its slot.
    ///
    /// Returns `false` if the slot was already free.
    pub fn unregister(&mut self, id: SourceId) -> bool {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return false;
        };
        let Some(source) = slot.take() else {
            return false;
        };
        log::trace!("reactor: unregister {} slot {id}", source.kind());
        self.free_slot(id.0);
        drop(source);
        true
    }

    fn grow(&mut self) {
        if !self.slots.is_empty() {
            self.growths += 1;
        }
        let new_len = self.slots.len() + self.chunk;
        self.slots.resize_with(new_len, || None);
        self.pollfds.resize(
            new_len,
            libc::pollfd {
                fd: FREE_SLOT,
                events: 0,
                revents: 0,
            },
        );
    }

    fn free_slot(&mut self, idx: usize) {
        let pfd = &mut self.pollfds[idx];
        pfd.fd = FREE_SLOT;
        pfd.events = 0;
        pfd.revents = 0;
    }

    /// Number of slots in the table.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// How many times the table was extended after its first allocation.
    pub fn growth_count(&self) -> usize {
        self.growths
    }

    /// Highest slot index ever used.
    pub fn high_water(&self) -> Option<usize> {
        self.high_water
    }

    /// Number of registered sources.
    pub fn active_count(&self) -> usize {
        self.pollfds.iter().filter(|p| p.fd != FREE_SLOT).count()
    }

    /// True if `id` currently holds a source.
    pub fn is_registered(&self, id: SourceId) -> bool {
        self.pollfds.get(id.0).is_some_and(|p| p.fd != FREE_SLOT)
    }
}

impl<C: ReactorContext> Reactor<C> {
    /// Run until the context asks to stop or a fatal error occurs.
    pub fn run(&mut self, cx: &mut C) -> Result<()> {
        loop {
            if self.turn(cx)? == Flow::Stop {
                return Ok(());
            }
        }
    }

    /// One blocking wait followed by one dispatch pass.
    pub fn turn(&mut self, cx: &mut C) -> Result<Flow> {
        let Some(high) = self.high_water else {
            bail!("reactor has no event sources registered");
        };
        if self.active_count() == 0 {
            bail!("reactor has no event sources registered");
        }

        let nfds = (high + 1) as libc::nfds_t;
        // SAFETY: `pollfds` holds at least `high + 1` initialised entries and
        // is not touched by anything else for the duration of the call.
        let rv = unsafe { libc::poll(self.pollfds.as_mut_ptr(), nfds, -1) };
        if rv < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(if cx.on_interrupted() { Flow::Stop } else { Flow::Continue });
            }
            return Err(anyhow::Error::new(err).context("poll failed"));
        }

        for idx in 0..=high {
            self.dispatch_slot(idx, cx)?;
        }
        Ok(Flow::Continue)
    }

    fn dispatch_slot(&mut self, idx: usize, cx: &mut C) -> Result<()> {
        let pfd = &mut self.pollfds[idx];
        let revents = pfd.revents;
        pfd.revents = 0;
        if pfd.fd == FREE_SLOT || revents == 0 {
            return Ok(());
        }
        let Some(mut source) = self.slots[idx].take() else {
            return Ok(());
        };

        let mut registrar = Registrar::new();
        let mut disposition = Disposition::Continue;

        if revents & source.interest().poll_events() != 0 {
            disposition = source.on_readable(cx, &mut registrar);
        }
        if matches!(disposition, Disposition::Continue) && revents & FAILURE_EVENTS != 0 {
            disposition = source.on_error(cx, &mut registrar);
        }

        match disposition {
            Disposition::Continue => {
                self.pollfds[idx].events = source.interest().poll_events();
                self.slots[idx] = Some(source);
            }
            Disposition::Close => {
                log::trace!("reactor: {} slot {idx} closed", source.kind());
                self.free_slot(idx);
                drop(source);
            }
            Disposition::Fatal(err) => {
                self.free_slot(idx);
                return Err(err.context(format!("{} source failed", source.kind())));
            }
        }

        for pending in registrar.pending {
            self.register(pending);
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct TestCtx {
        events: Vec<(usize, &'static str)>,
        interrupts: usize,
        stop_on_interrupt: bool,
    }

    impl ReactorContext for TestCtx {
        fn on_interrupted(&mut self) -> bool {
            self.interrupts += 1;
            self.stop_on_interrupt
        }
    }

    /// Reads whatever is available; closes on EOF unless `sticky`.
    struct TestSource {
        tag: usize,
        stream: UnixStream,
        sticky: bool,
        fatal_on_error: bool,
    }

    impl TestSource {
        fn boxed(tag: usize, stream: UnixStream) -> Box<dyn EventSource<TestCtx>> {
            Box::new(Self { tag, stream, sticky: false, fatal_on_error: false })
        }
    }

    impl EventSource<TestCtx> for TestSource {
        fn fd(&self) -> RawFd {
            self.stream.as_raw_fd()
        }

        fn on_readable(&mut self, cx: &mut TestCtx, _: &mut Registrar<TestCtx>) -> Disposition {
            let mut buf = [0u8; 64];
            match self.stream.read(&mut buf) {
                Ok(0) if !self.sticky => {
                    cx.events.push((self.tag, "eof"));
                    Disposition::Close
                }
                _ => {
                    cx.events.push((self.tag, "read"));
                    Disposition::Continue
                }
            }
        }

        fn on_error(&mut self, cx: &mut TestCtx, _: &mut Registrar<TestCtx>) -> Disposition {
            cx.events.push((self.tag, "error"));
            if self.fatal_on_error {
                Disposition::Fatal(anyhow::anyhow!("channel lost"))
            } else {
                Disposition::Close
            }
        }

        fn kind(&self) -> &'static str {
            "test"
        }
    }

    /// On first readiness, registers the stream it was built with.
    struct Spawner {
        stream: UnixStream,
        child: Option<UnixStream>,
    }

    impl EventSource<TestCtx> for Spawner {
        fn fd(&self) -> RawFd {
            self.stream.as_raw_fd()
        }

        fn on_readable(&mut self, cx: &mut TestCtx, registrar: &mut Registrar<TestCtx>) -> Disposition {
            let mut buf = [0u8; 8];
            let _ = self.stream.read(&mut buf);
            if let Some(child) = self.child.take() {
                registrar.register(TestSource::boxed(100, child));
            }
            cx.events.push((0, "spawn"));
            Disposition::Continue
        }

        fn kind(&self) -> &'static str {
            "spawner"
        }
    }

    #[test]
    fn test_forty_registrations_grow_once() {
        let mut reactor: Reactor<TestCtx> = Reactor::with_chunk(32);
        let mut peers = Vec::new();
        for tag in 0..40 {
            let (ours, theirs) = UnixStream::pair().unwrap();
            let id = reactor.register(TestSource::boxed(tag, ours));
            assert_eq!(id, SourceId(tag));
            peers.push(theirs);
        }
        assert_eq!(reactor.capacity(), 64);
        assert_eq!(reactor.growth_count(), 1);
        assert_eq!(reactor.active_count(), 40);
        assert_eq!(reactor.high_water(), Some(39));

        let mut cx = TestCtx::default();
        for tag in [39usize, 0, 33] {
            peers[tag].write_all(b"x").unwrap();
        }
        assert_eq!(reactor.turn(&mut cx).unwrap(), Flow::Continue);
        assert_eq!(cx.events, vec![(0, "read"), (33, "read"), (39, "read")]);

        cx.events.clear();
        peers[12].write_all(b"y").unwrap();
        reactor.turn(&mut cx).unwrap();
        assert_eq!(cx.events, vec![(12, "read")]);
    }

    #[test]
    fn test_first_allocation_is_not_a_growth() {
        let mut reactor: Reactor<TestCtx> = Reactor::with_chunk(4);
        let (a, _b) = UnixStream::pair().unwrap();
        reactor.register(TestSource::boxed(0, a));
        assert_eq!(reactor.capacity(), 4);
        assert_eq!(reactor.growth_count(), 0);
    }

    #[test]
    fn test_slot_reused_after_unregister() {
        let mut reactor: Reactor<TestCtx> = Reactor::with_chunk(4);
        let mut keep = Vec::new();
        for tag in 0..3 {
            let (ours, theirs) = UnixStream::pair().unwrap();
            reactor.register(TestSource::boxed(tag, ours));
            keep.push(theirs);
        }
        assert!(reactor.unregister(SourceId(1)));
        assert!(!reactor.is_registered(SourceId(1)));
        assert!(!reactor.unregister(SourceId(1)));

        let (ours, _theirs) = UnixStream::pair().unwrap();
        assert_eq!(reactor.register(TestSource::boxed(9, ours)), SourceId(1));
        assert_eq!(reactor.capacity(), 4);
        assert_eq!(reactor.high_water(), Some(2));
    }

    #[test]
    fn test_unregister_closes_descriptor() {
        let mut reactor: Reactor<TestCtx> = Reactor::with_chunk(4);
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let id = reactor.register(TestSource::boxed(0, ours));
        reactor.unregister(id);
        let mut buf = [0u8; 1];
        assert_eq!(theirs.read(&mut buf).unwrap(), 0, "peer should see EOF");
    }

    #[test]
    fn test_readiness_runs_before_failure_callback() {
        let mut reactor: Reactor<TestCtx> = Reactor::with_chunk(4);
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        reactor.register(Box::new(TestSource { tag: 0, stream: ours, sticky: true, fatal_on_error: false }));
        theirs.write_all(b"bye").unwrap();
        drop(theirs);

        let mut cx = TestCtx::default();
        reactor.turn(&mut cx).unwrap();
        assert_eq!(cx.events, vec![(0, "read"), (0, "error")]);
        assert_eq!(reactor.active_count(), 0);
    }

    #[test]
    fn test_closed_source_gets_no_failure_callback() {
        let mut reactor: Reactor<TestCtx> = Reactor::with_chunk(4);
        let (ours, theirs) = UnixStream::pair().unwrap();
        reactor.register(TestSource::boxed(0, ours));
        drop(theirs);

        let mut cx = TestCtx::default();
        reactor.turn(&mut cx).unwrap();
        assert_eq!(cx.events, vec![(0, "eof")]);
        assert_eq!(reactor.active_count(), 0);
    }

    #[test]
    fn test_fatal_failure_stops_the_loop() {
        let mut reactor: Reactor<TestCtx> = Reactor::with_chunk(4);
        let (ours, theirs) = UnixStream::pair().unwrap();
        reactor.register(Box::new(TestSource { tag: 0, stream: ours, sticky: true, fatal_on_error: true }));
        drop(theirs);

        let mut cx = TestCtx::default();
        let err = reactor.run(&mut cx).unwrap_err();
        assert!(format!("{err:#}").contains("channel lost"), "{err:#}");
    }

    #[test]
    fn test_sources_registered_from_callbacks() {
        let mut reactor: Reactor<TestCtx> = Reactor::with_chunk(2);
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let (child, mut child_peer) = UnixStream::pair().unwrap();
        reactor.register(Box::new(Spawner { stream: ours, child: Some(child) }));

        let mut cx = TestCtx::default();
        theirs.write_all(b"go").unwrap();
        reactor.turn(&mut cx).unwrap();
        assert_eq!(reactor.active_count(), 2);
        assert_eq!(cx.events, vec![(0, "spawn")]);

        cx.events.clear();
        child_peer.write_all(b"hi").unwrap();
        reactor.turn(&mut cx).unwrap();
        assert_eq!(cx.events, vec![(100, "read")]);
    }

    #[test]
    fn test_empty_reactor_refuses_to_wait() {
        let mut reactor: Reactor<TestCtx> = Reactor::new();
        let mut cx = TestCtx::default();
        assert!(reactor.turn(&mut cx).is_err());

        let (ours, _theirs) = UnixStream::pair().unwrap();
        let id = reactor.register(TestSource::boxed(0, ours));
        reactor.unregister(id);
        assert!(reactor.turn(&mut cx).is_err());
    }

    #[test]
    fn test_interrupted_wait_consults_context() {
        static INSTALLED: AtomicBool = AtomicBool::new(false);
        if !INSTALLED.swap(true, Ordering::SeqCst) {
            signal_hook::flag::register(libc::SIGUSR1, Arc::new(AtomicBool::new(false))).unwrap();
        }

        let mut reactor: Reactor<TestCtx> = Reactor::with_chunk(4);
        let (ours, _theirs) = UnixStream::pair().unwrap();
        reactor.register(TestSource::boxed(0, ours));

        // SAFETY: pthread_self has no preconditions.
        let target = unsafe { libc::pthread_self() };
        let signaller = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(100));
            // SAFETY: `target` is the test thread, which is blocked in poll
            // until this signal arrives and outlives this helper thread.
            unsafe { libc::pthread_kill(target, libc::SIGUSR1) };
        });

        let mut cx = TestCtx { stop_on_interrupt: true, ..TestCtx::default() };
        reactor.run(&mut cx).unwrap();
        signaller.join().unwrap();
        assert_eq!(cx.interrupts, 1);
        assert!(cx.events.is_empty());
    }

    #[test]
    fn test_debug_and_accessors_need_no_context() {
        let mut reactor: Reactor<()> = Reactor::with_chunk(2);
        let (a, _a_peer) = UnixStream::pair().unwrap();
        let (b, _b_peer) = UnixStream::pair().unwrap();
        let (c, _c_peer) = UnixStream::pair().unwrap();
        for stream in [a, b, c] {
            reactor.register(Box::new(Idle(stream)));
        }
        assert!(reactor.unregister(SourceId(1)));

        assert_eq!(reactor.capacity(), 4);
        assert_eq!(reactor.growth_count(), 1);
        assert_eq!(reactor.high_water(), Some(2));
        assert_eq!(reactor.active_count(), 2);
        assert!(!reactor.is_registered(SourceId(1)));
        let shown = format!("{reactor:?}");
        assert!(shown.contains("active: 2"), "{shown}");
        assert!(shown.contains("growths: 1"), "{shown}");
    }

    struct Idle(UnixStream);

    impl EventSource<()> for Idle {
        fn fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }

        fn on_readable(&mut self, _: &mut (), _: &mut Registrar<()>) -> Disposition {
            Disposition::Continue
        }

        fn kind(&self) -> &'static str {
            "idle"
        }
    }
}
