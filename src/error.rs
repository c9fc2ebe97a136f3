//! Typed errors for domain operations and the client wire protocol.
//!
//! Domain errors travel back to clients as negative errno result codes, so
//! every variant knows its code. Bootstrap and fatal reactor paths use
//! `anyhow` instead.

use std::io;

use thiserror::Error;

/// Errors from fencing-domain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A domain with this name is already registered.
    #[error("domain {0} exists")]
    Exists(String),

    /// No domain with this name is registered.
    #[error("domain {0} not found")]
    NotFound(String),

    /// The active membership backend cannot perform the operation.
    #[error("{0} not supported by the active membership backend")]
    NotSupported(&'static str),

    /// Domain name exceeds the protocol limit.
    #[error("domain name is {len} bytes (max {max})")]
    NameTooLong {
        /// Length of the rejected name.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// The per-domain configuration could not be loaded.
    #[error("domain configuration: {0}")]
    Config(String),

    /// The membership backend failed.
    #[error("membership backend: {0}")]
    Backend(String),
}

impl DomainError {
    /// Negative errno reported to clients in the header `data` field.
    pub fn result_code(&self) -> i32 {
        let errno = match self {
            DomainError::Exists(_) => libc::EEXIST,
            DomainError::NotFound(_) => libc::ENOENT,
            DomainError::NotSupported(_) => libc::ENOSYS,
            DomainError::NameTooLong { .. } => libc::ENAMETOOLONG,
            DomainError::Config(_) => libc::EINVAL,
            DomainError::Backend(_) => libc::EIO,
        };
        -errno
    }
}

/// Result code for a member list truncated to the caller's capacity.
pub const RESULT_TOO_BIG: i32 = -libc::E2BIG;

/// Errors reading or validating a framed message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Header magic did not match.
    #[error("magic error {0:#x}")]
    BadMagic(u32),

    /// Major protocol version did not match.
    #[error("version error {0:#x}")]
    BadVersion(u32),

    /// Declared length is shorter than the header or over the payload cap.
    #[error("length error {0}")]
    BadLength(u32),

    /// Peer closed the stream before a full message arrived.
    #[error("connection closed after {0} bytes")]
    ConnectionClosed(usize),

    /// Socket I/O failed.
    #[error("I/O error: {0:?}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        ProtocolError::Io(e.kind())
    }
}
