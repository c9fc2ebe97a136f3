//! Wire codec for the fenced client protocol.
//!
//! Every message starts with a fixed header of five 32-bit fields in host
//! byte order (the C structure layout existing local clients use):
//!
//! ```text
//! [u32 magic] [u32 version] [u32 len] [u32 command] [i32 data] [payload: len-20 bytes]
//! ```
//!
//! In requests `data` carries a command argument (node id, member capacity);
//! in replies it carries the result code. Reply payloads are arrays of the
//! fixed records defined here.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{
    FENCED_MAGIC, FENCED_VERSION, HEADER_SIZE, MAX_NODENAME_LEN, MAX_REQUEST_PAYLOAD,
    VERSION_MAJOR_MASK,
};
use crate::error::ProtocolError;

/// Size of one node record on the wire.
pub const NODE_RECORD_SIZE: usize = 32;

/// Size of the domain record on the wire.
pub const DOMAIN_RECORD_SIZE: usize = 24;

/// Message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Must equal [`FENCED_MAGIC`].
    pub magic: u32,
    /// Packed major/minor protocol version.
    pub version: u32,
    /// Total message length including this header.
    pub len: u32,
    /// Command code.
    pub command: u32,
    /// Command argument or result code.
    pub data: i32,
}

impl Header {
    /// Header for a message carrying `payload_len` bytes after it.
    pub fn new(command: u32, data: i32, payload_len: usize) -> Self {
        Self {
            magic: FENCED_MAGIC,
            version: FENCED_VERSION,
            len: (HEADER_SIZE + payload_len) as u32,
            command,
            data,
        }
    }

    /// Encode into the fixed 20-byte layout.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_ne(self.magic);
        buf.put_u32_ne(self.version);
        buf.put_u32_ne(self.len);
        buf.put_u32_ne(self.command);
        buf.put_i32_ne(self.data);
        out
    }

    /// Decode the first [`HEADER_SIZE`] bytes of `bytes` without validating.
    ///
    /// Returns `None` if fewer than [`HEADER_SIZE`] bytes are given.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let mut buf = &bytes[..HEADER_SIZE];
        Some(Self {
            magic: buf.get_u32_ne(),
            version: buf.get_u32_ne(),
            len: buf.get_u32_ne(),
            command: buf.get_u32_ne(),
            data: buf.get_i32_ne(),
        })
    }

    /// Check magic, then major version, then length.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic != FENCED_MAGIC {
            return Err(ProtocolError::BadMagic(self.magic));
        }
        if self.version & VERSION_MAJOR_MASK != FENCED_VERSION & VERSION_MAJOR_MASK {
            return Err(ProtocolError::BadVersion(self.version));
        }
        let len = self.len as usize;
        if len < HEADER_SIZE || len - HEADER_SIZE > MAX_REQUEST_PAYLOAD {
            return Err(ProtocolError::BadLength(self.len));
        }
        Ok(())
    }

    /// Payload length implied by `len`.
    pub fn payload_len(&self) -> usize {
        (self.len as usize).saturating_sub(HEADER_SIZE)
    }
}

/// A complete, validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request header.
    pub header: Header,
    /// Bytes following the header.
    pub payload: Bytes,
}

impl Request {
    /// Build a request with a payload (used by clients and tests).
    pub fn new(command: u32, data: i32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            header: Header::new(command, data, payload.len()),
            payload,
        }
    }

    /// Encode header and payload into one buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Payload read as a NUL-terminated node name.
    ///
    /// Stops at the first NUL (or the end of the payload) and is capped at
    /// [`MAX_NODENAME_LEN`] bytes.
    pub fn node_name(&self) -> String {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.payload.len())
            .min(MAX_NODENAME_LEN);
        String::from_utf8_lossy(&self.payload[..end]).into_owned()
    }
}

/// Incremental request decoder that handles partial reads.
///
/// The header is validated as soon as it is complete, so a bad request is
/// rejected without waiting for a payload that may never come.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    buf: BytesMut,
    header: Option<Header>,
}

impl RequestDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return the request once all of it has arrived.
    ///
    /// Bytes beyond the first complete request are ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Option<Request>, ProtocolError> {
        self.buf.extend_from_slice(bytes);

        let header = match self.header {
            Some(header) => header,
            None => {
                let Some(header) = Header::decode(&self.buf) else {
                    return Ok(None);
                };
                header.validate()?;
                self.header = Some(header);
                header
            }
        };

        let total = header.len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let mut message = self.buf.split_to(total);
        let payload = message.split_off(HEADER_SIZE).freeze();
        Ok(Some(Request { header, payload }))
    }

    /// Number of bytes buffered so far.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Node record returned by `NODE_INFO` and `DOMAIN_MEMBERS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node id.
    pub nodeid: i32,
    /// 1 if the node is a current domain member.
    pub member: i32,
    /// 1 if the node is waiting to be fenced.
    pub victim: i32,
    /// Node that carried out the last fence.
    pub last_fenced_master: i32,
    /// How the last fence was carried out (0 = never).
    pub last_fenced_how: i32,
    /// Unix time of the last fence.
    pub last_fenced_time: u64,
}

impl NodeRecord {
    /// Append the 32-byte wire form to `buf`.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_i32_ne(self.nodeid);
        buf.put_i32_ne(self.member);
        buf.put_i32_ne(self.victim);
        buf.put_i32_ne(self.last_fenced_master);
        buf.put_i32_ne(self.last_fenced_how);
        buf.put_u32_ne(0); // padding to 8-byte alignment
        buf.put_u64_ne(self.last_fenced_time);
    }

    /// Decode one record from the front of `bytes`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < NODE_RECORD_SIZE {
            return None;
        }
        let mut buf = &bytes[..NODE_RECORD_SIZE];
        let nodeid = buf.get_i32_ne();
        let member = buf.get_i32_ne();
        let victim = buf.get_i32_ne();
        let last_fenced_master = buf.get_i32_ne();
        let last_fenced_how = buf.get_i32_ne();
        buf.advance(4);
        Some(Self {
            nodeid,
            member,
            victim,
            last_fenced_master,
            last_fenced_how,
            last_fenced_time: buf.get_u64_ne(),
        })
    }
}

/// Domain record returned by `DOMAIN_INFO`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainRecord {
    /// Membership backend in use (see `GroupMode`).
    pub group_mode: i32,
    /// Number of current members.
    pub member_count: i32,
    /// Node id of the fencing master.
    pub master_nodeid: i32,
    /// Number of nodes waiting to be fenced.
    pub victim_count: i32,
    /// Node currently being fenced, 0 if none.
    pub current_victim: i32,
    /// Workflow state (0 idle, 1 change in progress).
    pub state: i32,
}

impl DomainRecord {
    /// Append the 24-byte wire form to `buf`.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_i32_ne(self.group_mode);
        buf.put_i32_ne(self.member_count);
        buf.put_i32_ne(self.master_nodeid);
        buf.put_i32_ne(self.victim_count);
        buf.put_i32_ne(self.current_victim);
        buf.put_i32_ne(self.state);
    }

    /// Decode the record from the front of `bytes`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < DOMAIN_RECORD_SIZE {
            return None;
        }
        let mut buf = &bytes[..DOMAIN_RECORD_SIZE];
        Some(Self {
            group_mode: buf.get_i32_ne(),
            member_count: buf.get_i32_ne(),
            master_nodeid: buf.get_i32_ne(),
            victim_count: buf.get_i32_ne(),
            current_victim: buf.get_i32_ne(),
            state: buf.get_i32_ne(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::command;

    #[test]
    fn test_header_layout_is_host_order() {
        let header = Header::new(command::NODE_INFO, -2, 12);
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], &FENCED_MAGIC.to_ne_bytes());
        assert_eq!(&bytes[4..8], &FENCED_VERSION.to_ne_bytes());
        assert_eq!(&bytes[8..12], &32u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &command::NODE_INFO.to_ne_bytes());
        assert_eq!(&bytes[16..20], &(-2i32).to_ne_bytes());
        assert_eq!(Header::decode(&bytes), Some(header));
    }

    #[test]
    fn test_minor_version_is_ignored() {
        let mut header = Header::new(command::JOIN, 0, 0);
        header.version = (1 << 16) | 9;
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_validation_order() {
        let mut header = Header::new(command::JOIN, 0, 0);
        header.magic = 0xFF;
        header.version = 2 << 16;
        header.len = 3;
        assert_eq!(header.validate(), Err(ProtocolError::BadMagic(0xFF)));
        header.magic = FENCED_MAGIC;
        assert_eq!(header.validate(), Err(ProtocolError::BadVersion(2 << 16)));
        header.version = FENCED_VERSION;
        assert_eq!(header.validate(), Err(ProtocolError::BadLength(3)));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let header = Header::new(command::EXTERNAL, 0, MAX_REQUEST_PAYLOAD + 1);
        assert!(matches!(header.validate(), Err(ProtocolError::BadLength(_))));
        let header = Header::new(command::EXTERNAL, 0, MAX_REQUEST_PAYLOAD);
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_decoder_reassembles_byte_at_a_time() {
        let request = Request::new(command::EXTERNAL, 0, &b"node-b\0"[..]);
        let encoded = request.encode();
        let mut decoder = RequestDecoder::new();
        for (i, byte) in encoded.iter().enumerate() {
            let out = decoder.feed(&[*byte]).unwrap();
            if i < encoded.len() - 1 {
                assert!(out.is_none());
            } else {
                assert_eq!(out, Some(request.clone()));
            }
        }
    }

    #[test]
    fn test_decoder_rejects_bad_header_before_payload() {
        let mut header = Header::new(command::JOIN, 0, 100);
        header.version = 7 << 16;
        let mut decoder = RequestDecoder::new();
        let err = decoder.feed(&header.encode()).unwrap_err();
        assert_eq!(err, ProtocolError::BadVersion(7 << 16));
    }

    #[test]
    fn test_decoder_header_only_request() {
        let mut decoder = RequestDecoder::new();
        let request = decoder
            .feed(&Header::new(command::DUMP_DEBUG, 0, 0).encode())
            .unwrap()
            .unwrap();
        assert_eq!(request.header.command, command::DUMP_DEBUG);
        assert!(request.payload.is_empty());
    }

    #[test]
    fn test_node_name_stops_at_nul() {
        let request = Request::new(command::EXTERNAL, 0, &b"node-a\0garbage"[..]);
        assert_eq!(request.node_name(), "node-a");
        let request = Request::new(command::EXTERNAL, 0, &b"unterminated"[..]);
        assert_eq!(request.node_name(), "unterminated");
    }

    #[test]
    fn test_node_record_layout() {
        let record = NodeRecord {
            nodeid: 3,
            member: 1,
            victim: 0,
            last_fenced_master: 1,
            last_fenced_how: 3,
            last_fenced_time: 1_700_000_000,
        };
        let mut buf = BytesMut::new();
        record.encode_into(&mut buf);
        assert_eq!(buf.len(), NODE_RECORD_SIZE);
        assert_eq!(&buf[20..24], &[0, 0, 0, 0]);
        assert_eq!(&buf[24..32], &1_700_000_000u64.to_ne_bytes());
        assert_eq!(NodeRecord::decode(&buf), Some(record));
    }

    #[test]
    fn test_domain_record_layout() {
        let record = DomainRecord { group_mode: 1, member_count: 4, master_nodeid: 1, ..Default::default() };
        let mut buf = BytesMut::new();
        record.encode_into(&mut buf);
        assert_eq!(buf.len(), DOMAIN_RECORD_SIZE);
        assert_eq!(&buf[4..8], &4i32.to_ne_bytes());
        assert_eq!(DomainRecord::decode(&buf), Some(record));
        assert!(DomainRecord::decode(&buf[..10]).is_none());
    }
}
