//! Per-connection state for admin clients (daemon side).
//!
//! Each accepted connection gets a [`ClientConn`] in the reactor table. It
//! reads exactly one request, dispatches it and writes the reply, then asks
//! the reactor to close it. The socket is non-blocking: a request that
//! arrives in pieces is reassembled across readiness events, and a reply
//! that does not fit in the socket buffer is finished on later writability
//! events.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use bytes::{Buf, Bytes};

use super::framing::RequestDecoder;
use crate::commands;
use crate::context::DaemonContext;
use crate::error::ProtocolError;
use crate::log_debug;
use crate::reactor::{Disposition, EventSource, Interest, Registrar};

const READ_CHUNK: usize = 4096;

#[derive(Debug)]
enum ConnState {
    Reading(RequestDecoder),
    Writing(VecDeque<Bytes>),
}

/// One admin client connection.
#[derive(Debug)]
pub struct ClientConn {
    stream: UnixStream,
    state: ConnState,
}

impl ClientConn {
    /// Wrap an accepted, non-blocking stream.
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            state: ConnState::Reading(RequestDecoder::new()),
        }
    }

    fn read_request(&mut self, cx: &mut DaemonContext) -> Disposition {
        let ConnState::Reading(decoder) = &mut self.state else {
            return Disposition::Continue;
        };
        let fd = self.stream.as_raw_fd();
        let mut chunk = [0u8; READ_CHUNK];

        let request = loop {
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => {
                    let err = ProtocolError::ConnectionClosed(decoder.buffered());
                    log_debug!(cx, "client {fd}: {err}");
                    return Disposition::Close;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Disposition::Continue,
                Err(e) => {
                    log_debug!(cx, "client {fd}: {}", ProtocolError::from(e));
                    return Disposition::Close;
                }
            };
            match decoder.feed(&chunk[..n]) {
                Ok(Some(request)) => break request,
                Ok(None) => {}
                Err(err) => {
                    log_debug!(cx, "client {fd}: {err}");
                    return Disposition::Close;
                }
            }
        };

        let reply = commands::dispatch(cx, &request);
        if reply.is_empty() {
            return Disposition::Close;
        }
        self.state = ConnState::Writing(reply.into_segments().into());
        self.write_reply()
    }

    fn write_reply(&mut self) -> Disposition {
        let ConnState::Writing(pending) = &mut self.state else {
            return Disposition::Continue;
        };
        while let Some(segment) = pending.front_mut() {
            match self.stream.write(segment) {
                Ok(0) => {
                    log::warn!("[client] Reply abandoned: socket accepted no bytes");
                    return Disposition::Close;
                }
                Ok(n) => {
                    segment.advance(n);
                    if segment.is_empty() {
                        pending.pop_front();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Disposition::Continue,
                Err(e) => {
                    log::warn!("[client] Reply abandoned: {e}");
                    return Disposition::Close;
                }
            }
        }
        Disposition::Close
    }
}

impl EventSource<DaemonContext> for ClientConn {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn interest(&self) -> Interest {
        match self.state {
            ConnState::Reading(_) => Interest::Readable,
            ConnState::Writing(_) => Interest::Writable,
        }
    }

    fn on_readable(&mut self, cx: &mut DaemonContext, _: &mut Registrar<DaemonContext>) -> Disposition {
        match self.state {
            ConnState::Reading(_) => self.read_request(cx),
            ConnState::Writing(_) => self.write_reply(),
        }
    }

    fn on_error(&mut self, cx: &mut DaemonContext, _: &mut Registrar<DaemonContext>) -> Disposition {
        log_debug!(cx, "client {} hung up", self.stream.as_raw_fd());
        Disposition::Close
    }

    fn kind(&self) -> &'static str {
        "client"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use crate::config::{Config, NodeEntry};
    use crate::constants::{command, HEADER_SIZE};
    use crate::membership::StaticBackend;
    use crate::socket::framing::{Header, Request};

    fn context(ring: usize) -> DaemonContext {
        let config = Config {
            nodes: vec![NodeEntry { name: "node-a".into(), nodeid: 1 }],
            debug_ring_size: ring,
            ..Config::default()
        };
        let backend = StaticBackend::from_config(&config);
        DaemonContext::new(config, Box::new(backend), Arc::new(AtomicBool::new(false)))
    }

    fn connection() -> (ClientConn, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        (ClientConn::new(ours), theirs)
    }

    #[test]
    fn test_request_split_across_reads() {
        let mut cx = context(4096);
        let (mut conn, mut peer) = connection();
        let mut registrar = Registrar::new();
        let bytes = Request::new(command::DOMAIN_INFO, 0, Bytes::new()).encode();

        peer.write_all(&bytes[..7]).unwrap();
        assert!(matches!(conn.on_readable(&mut cx, &mut registrar), Disposition::Continue));
        assert_eq!(conn.interest(), Interest::Readable);

        peer.write_all(&bytes[7..]).unwrap();
        assert!(matches!(conn.on_readable(&mut cx, &mut registrar), Disposition::Close));
        drop(conn);

        let mut reply = Vec::new();
        peer.read_to_end(&mut reply).unwrap();
        let header = Header::decode(&reply).unwrap();
        assert_eq!(header.command, command::DOMAIN_INFO);
        assert_eq!(header.data, -libc::ENOENT);
        assert_eq!(reply.len(), header.len as usize);
    }

    #[test]
    fn test_bad_major_version_gets_no_reply() {
        let mut cx = context(4096);
        let (mut conn, mut peer) = connection();
        let mut header = Header::new(command::DUMP_DEBUG, 0, 0);
        header.version = 2 << 16;
        peer.write_all(&header.encode()).unwrap();

        let mut registrar = Registrar::new();
        assert!(matches!(conn.on_readable(&mut cx, &mut registrar), Disposition::Close));
        drop(conn);

        let mut reply = Vec::new();
        peer.read_to_end(&mut reply).unwrap();
        assert!(reply.is_empty());
        let log = String::from_utf8(cx.ring.snapshot()).unwrap();
        assert!(log.contains("version error"), "{log}");
    }

    #[test]
    fn test_eof_before_full_request_is_closed() {
        let mut cx = context(4096);
        let (mut conn, mut peer) = connection();
        peer.write_all(&[0xFE, 0, 0]).unwrap();
        peer.shutdown(std::net::Shutdown::Write).unwrap();

        let mut registrar = Registrar::new();
        assert!(matches!(conn.on_readable(&mut cx, &mut registrar), Disposition::Close));
        let log = String::from_utf8(cx.ring.snapshot()).unwrap();
        assert!(log.contains("connection closed after 3 bytes"), "{log}");
    }

    #[test]
    fn test_large_reply_finishes_on_writability() {
        let mut cx = context(1024 * 1024);
        cx.ring.append(&vec![b'x'; 2 * 1024 * 1024]);
        let (mut conn, mut peer) = connection();
        peer.write_all(&Request::new(command::DUMP_DEBUG, 0, Bytes::new()).encode())
            .unwrap();

        let mut registrar = Registrar::new();
        assert!(matches!(conn.on_readable(&mut cx, &mut registrar), Disposition::Continue));
        assert_eq!(conn.interest(), Interest::Writable);

        let reader = std::thread::spawn(move || {
            let mut reply = Vec::new();
            peer.read_to_end(&mut reply).unwrap();
            reply
        });
        loop {
            match conn.on_readable(&mut cx, &mut registrar) {
                Disposition::Continue => std::thread::sleep(std::time::Duration::from_millis(1)),
                Disposition::Close => break,
                Disposition::Fatal(e) => panic!("{e}"),
            }
        }
        drop(conn);

        let reply = reader.join().unwrap();
        assert_eq!(reply.len(), HEADER_SIZE + 1024 * 1024);
        assert!(reply[HEADER_SIZE..].iter().all(|&b| b == b'x'));
    }
}
