//! Blocking client for the fenced admin socket.
//!
//! Each call opens a fresh connection, sends one request and reads the
//! reply (or waits for the daemon to close the connection for commands that
//! never reply, so the caller knows the request has been processed).

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use anyhow::{bail, Context, Result};
use bytes::Bytes;

use super::framing::{DomainRecord, Header, NodeRecord, Request, NODE_RECORD_SIZE};
use super::listener::connect_stream;
use super::SocketAddress;
use crate::constants::{command, FENCED_SOCK_NAME, HEADER_SIZE, MAX_NODENAME_LEN};

/// Client bound to one daemon socket address.
#[derive(Debug, Clone)]
pub struct FencedClient {
    addr: SocketAddress,
}

impl Default for FencedClient {
    fn default() -> Self {
        Self::new(SocketAddress::Abstract(FENCED_SOCK_NAME.to_string()))
    }
}

impl FencedClient {
    /// Client for the daemon listening on `addr`.
    pub fn new(addr: SocketAddress) -> Self {
        Self { addr }
    }

    /// Ask the daemon to join the default domain.
    pub fn join(&self) -> Result<()> {
        self.send_only(&Request::new(command::JOIN, 0, Bytes::new()))
    }

    /// Ask the daemon to leave the default domain.
    pub fn leave(&self) -> Result<()> {
        self.send_only(&Request::new(command::LEAVE, 0, Bytes::new()))
    }

    /// Report `node_name` as fenced by an external agent.
    pub fn external(&self, node_name: &str) -> Result<()> {
        if node_name.len() > MAX_NODENAME_LEN {
            bail!("Node name too long ({} bytes, max {MAX_NODENAME_LEN})", node_name.len());
        }
        let mut payload = Vec::with_capacity(node_name.len() + 1);
        payload.extend_from_slice(node_name.as_bytes());
        payload.push(0);
        self.send_only(&Request::new(command::EXTERNAL, 0, payload))
    }

    /// Fetch the daemon's debug log.
    pub fn dump_debug(&self) -> Result<Vec<u8>> {
        let mut stream = self.send(&Request::new(command::DUMP_DEBUG, 0, Bytes::new()))?;
        let header = read_header(&mut stream)?;
        if header.command != command::DUMP_DEBUG || header.data != 0 {
            bail!("Unexpected dump reply: command {} result {}", header.command, header.data);
        }
        let mut log = Vec::new();
        stream.read_to_end(&mut log).context("Failed to read debug log")?;
        Ok(log)
    }

    /// Fetch the record of `nodeid` together with the result code.
    pub fn node_info(&self, nodeid: i32) -> Result<(i32, NodeRecord)> {
        let (header, payload) = self.request(&Request::new(command::NODE_INFO, nodeid, Bytes::new()))?;
        let record = NodeRecord::decode(&payload).context("Short node record")?;
        Ok((header.data, record))
    }

    /// Fetch the domain summary together with the result code.
    pub fn domain_info(&self) -> Result<(i32, DomainRecord)> {
        let (header, payload) = self.request(&Request::new(command::DOMAIN_INFO, 0, Bytes::new()))?;
        let record = DomainRecord::decode(&payload).context("Short domain record")?;
        Ok((header.data, record))
    }

    /// Fetch up to `max` member records together with the result code
    /// (member count, or a negative errno such as `-E2BIG`).
    pub fn domain_members(&self, max: i32) -> Result<(i32, Vec<NodeRecord>)> {
        let (header, payload) = self.request(&Request::new(command::DOMAIN_MEMBERS, max, Bytes::new()))?;
        let members = payload
            .chunks_exact(NODE_RECORD_SIZE)
            .filter_map(NodeRecord::decode)
            .collect();
        Ok((header.data, members))
    }

    /// Open a connection to the daemon.
    pub fn connect(&self) -> Result<UnixStream> {
        connect_stream(&self.addr)
    }

    fn send(&self, request: &Request) -> Result<UnixStream> {
        let mut stream = self.connect()?;
        stream
            .write_all(&request.encode())
            .context("Failed to send request")?;
        Ok(stream)
    }

    fn send_only(&self, request: &Request) -> Result<()> {
        let mut stream = self.send(request)?;
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).context("Failed waiting for daemon")?;
        Ok(())
    }

    fn request(&self, request: &Request) -> Result<(Header, Vec<u8>)> {
        let mut stream = self.send(request)?;
        let header = read_header(&mut stream)?;
        if header.command != request.header.command {
            bail!("Reply for command {} to request {}", header.command, request.header.command);
        }
        let mut payload = vec![0u8; header.payload_len()];
        stream.read_exact(&mut payload).context("Short reply payload")?;
        Ok((header, payload))
    }
}

fn read_header(stream: &mut UnixStream) -> Result<Header> {
    let mut buf = [0u8; HEADER_SIZE];
    stream.read_exact(&mut buf).context("No reply from daemon")?;
    let header = Header::decode(&buf).context("Short reply header")?;
    header.validate().context("Invalid reply header")?;
    Ok(header)
}
