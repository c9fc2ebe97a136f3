//! Membership event channel.
//!
//! The daemon keeps a stream socket in its reactor table as a
//! [`MembershipChannel`] and reads one JSON [`MembershipEvent`] per line from
//! it. In production the stream is a connection to the membership provider
//! named by `membership_socket`; embedded daemons use an in-process socket
//! pair whose writing end is a [`MembershipFeed`].
//!
//! Losing the channel is fatal. A node that can no longer see membership
//! changes must not keep coordinating fencing.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use anyhow::{anyhow, Context, Result};

use super::MembershipEvent;
use crate::constants::MAX_REQUEST_PAYLOAD;
use crate::context::DaemonContext;
use crate::reactor::{Disposition, EventSource, Registrar};
use crate::socket::listener::connect_stream;
use crate::socket::SocketAddress;

const READ_CHUNK: usize = 4096;

/// Longest event line kept while waiting for its newline.
const MAX_EVENT_LINE: usize = MAX_REQUEST_PAYLOAD;

/// Create a connected channel/feed pair.
pub fn channel() -> Result<(MembershipChannel, MembershipFeed)> {
    let (ours, theirs) = UnixStream::pair().context("Failed to create membership channel")?;
    Ok((MembershipChannel::new(ours)?, MembershipFeed { stream: theirs }))
}

/// Reading end of the membership channel, registered with the reactor.
#[derive(Debug)]
pub struct MembershipChannel {
    stream: UnixStream,
    buf: Vec<u8>,
    discarding: bool,
}

impl MembershipChannel {
    fn new(stream: UnixStream) -> Result<Self> {
        stream
            .set_nonblocking(true)
            .context("Failed to make membership channel non-blocking")?;
        Ok(Self {
            stream,
            buf: Vec::new(),
            discarding: false,
        })
    }

    /// Connect to the membership provider listening on `addr`.
    pub fn connect(addr: &SocketAddress) -> Result<Self> {
        let stream = connect_stream(addr).context("Cannot reach membership provider")?;
        log::info!("[membership] Connected to provider at {addr}");
        Self::new(stream)
    }

    fn process_lines(&mut self, cx: &mut DaemonContext) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<MembershipEvent>(line) {
                Ok(event) => cx.apply_membership(&event),
                Err(e) => log::warn!("[membership] Skipping malformed event: {e}"),
            }
        }

        // No newline within the limit: drop what we have and the rest of
        // the line when it arrives.
        if self.buf.len() > MAX_EVENT_LINE {
            log::warn!(
                "[membership] Skipping malformed event: no newline in {} bytes",
                self.buf.len()
            );
            self.buf.clear();
            self.discarding = true;
        }
    }
}

impl EventSource<DaemonContext> for MembershipChannel {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn on_readable(&mut self, cx: &mut DaemonContext, _: &mut Registrar<DaemonContext>) -> Disposition {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    log::error!("[membership] Channel closed");
                    return Disposition::Fatal(anyhow!("cluster is down, exiting"));
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.process_lines(cx);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Disposition::Continue,
                Err(e) => {
                    log::error!("[membership] Read failed: {e}");
                    return Disposition::Fatal(anyhow::Error::new(e).context("cluster is down, exiting"));
                }
            }
        }
    }

    fn on_error(&mut self, _: &mut DaemonContext, _: &mut Registrar<DaemonContext>) -> Disposition {
        log::error!("[membership] Channel hung up");
        Disposition::Fatal(anyhow!("cluster is down, exiting"))
    }

    fn kind(&self) -> &'static str {
        "membership"
    }
}

/// Writing end of an in-process membership channel.
///
/// Dropping the feed closes the channel, which stops the daemon.
#[derive(Debug)]
pub struct MembershipFeed {
    stream: UnixStream,
}

impl MembershipFeed {
    /// Write one event as a JSON line.
    pub fn send(&mut self, event: &MembershipEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event).context("Failed to encode membership event")?;
        line.push(b'\n');
        self.stream
            .write_all(&line)
            .context("Failed to write membership event")
    }
}
