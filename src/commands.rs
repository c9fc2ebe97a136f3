//! Client command dispatch.
//!
//! A validated [`Request`] is routed through a table from command code to
//! handler. Handlers return a [`Reply`]: a list of byte segments written to
//! the client in order, or nothing at all for commands that never answer.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{command, DEFAULT_DOMAIN, HEADER_SIZE};
use crate::context::DaemonContext;
use crate::domain::lifecycle;
use crate::error::RESULT_TOO_BIG;
use crate::log_debug;
use crate::socket::framing::{
    DomainRecord, Header, NodeRecord, Request, DOMAIN_RECORD_SIZE, NODE_RECORD_SIZE,
};

/// Bytes to send back to a client, one `write` per segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    segments: Vec<Bytes>,
}

impl Reply {
    /// A reply that sends nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Header and payload assembled into a single segment.
    pub fn framed(command: u32, result: i32, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_slice(&Header::new(command, result, payload.len()).encode());
        buf.put_slice(payload);
        Self {
            segments: vec![buf.freeze()],
        }
    }

    /// Append a raw segment; empty segments are skipped.
    pub fn push(&mut self, segment: Bytes) {
        if !segment.is_empty() {
            self.segments.push(segment);
        }
    }

    /// Segments in write order.
    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// Take the segments.
    pub fn into_segments(self) -> Vec<Bytes> {
        self.segments
    }

    /// True if nothing is to be sent.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total bytes across all segments.
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }
}

type Handler = fn(&mut DaemonContext, &Request) -> Reply;

/// Command code, log name and handler.
const HANDLERS: &[(u32, &str, Handler)] = &[
    (command::JOIN, "join", handle_join),
    (command::LEAVE, "leave", handle_leave),
    (command::DUMP_DEBUG, "dump_debug", handle_dump_debug),
    (command::EXTERNAL, "external", handle_external),
    (command::NODE_INFO, "node_info", handle_node_info),
    (command::DOMAIN_INFO, "domain_info", handle_domain_info),
    (command::DOMAIN_MEMBERS, "domain_members", handle_domain_members),
];

/// Run the handler for `request` and return what to send back.
pub fn dispatch(cx: &mut DaemonContext, request: &Request) -> Reply {
    let code = request.header.command;
    match HANDLERS.iter().find(|(c, _, _)| *c == code) {
        Some((_, name, handler)) => {
            log::trace!("[commands] {name} data={}", request.header.data);
            handler(cx, request)
        }
        None => {
            log_debug!(cx, "unknown command {code}");
            Reply::none()
        }
    }
}

fn handle_join(cx: &mut DaemonContext, _: &Request) -> Reply {
    if let Err(e) = lifecycle::join(cx, DEFAULT_DOMAIN) {
        log_debug!(cx, "join error: {e}");
    }
    Reply::none()
}

fn handle_leave(cx: &mut DaemonContext, _: &Request) -> Reply {
    if let Err(e) = lifecycle::leave(cx, DEFAULT_DOMAIN) {
        log_debug!(cx, "leave error: {e}");
    }
    Reply::none()
}

fn handle_external(cx: &mut DaemonContext, request: &Request) -> Reply {
    let node_name = request.node_name();
    if let Err(e) = lifecycle::external(cx, DEFAULT_DOMAIN, &node_name) {
        log_debug!(cx, "external error: {e}");
    }
    Reply::none()
}

fn handle_dump_debug(cx: &mut DaemonContext, _: &Request) -> Reply {
    let mut reply = Reply::framed(command::DUMP_DEBUG, 0, &[]);
    let (older, newer) = cx.ring.segments();
    reply.push(Bytes::copy_from_slice(older));
    reply.push(Bytes::copy_from_slice(newer));
    reply
}

fn handle_node_info(cx: &mut DaemonContext, request: &Request) -> Reply {
    let nodeid = request.header.data;
    let (result, record) = match lifecycle::node_info(cx, DEFAULT_DOMAIN, nodeid) {
        Ok(record) => (0, record),
        Err(e) => {
            log_debug!(cx, "node_info {nodeid} error: {e}");
            (e.result_code(), NodeRecord::default())
        }
    };
    let mut payload = BytesMut::with_capacity(NODE_RECORD_SIZE);
    record.encode_into(&mut payload);
    Reply::framed(command::NODE_INFO, result, &payload)
}

fn handle_domain_info(cx: &mut DaemonContext, _: &Request) -> Reply {
    let (result, record) = match lifecycle::domain_info(cx, DEFAULT_DOMAIN) {
        Ok(record) => (0, record),
        Err(e) => {
            log_debug!(cx, "domain_info error: {e}");
            (e.result_code(), DomainRecord::default())
        }
    };
    let mut payload = BytesMut::with_capacity(DOMAIN_RECORD_SIZE);
    record.encode_into(&mut payload);
    Reply::framed(command::DOMAIN_INFO, result, &payload)
}

fn handle_domain_members(cx: &mut DaemonContext, request: &Request) -> Reply {
    let max = usize::try_from(request.header.data).unwrap_or(0);
    let (result, members) = match lifecycle::domain_members(cx, DEFAULT_DOMAIN) {
        Ok(mut members) => {
            if members.len() > max {
                members.truncate(max);
                (RESULT_TOO_BIG, members)
            } else {
                (members.len() as i32, members)
            }
        }
        Err(e) => {
            log_debug!(cx, "domain_members error: {e}");
            (e.result_code(), Vec::new())
        }
    };
    let mut payload = BytesMut::with_capacity(members.len() * NODE_RECORD_SIZE);
    for record in &members {
        record.encode_into(&mut payload);
    }
    Reply::framed(command::DOMAIN_MEMBERS, result, &payload)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
