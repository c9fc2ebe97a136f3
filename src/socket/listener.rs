//! Client socket listener.
//!
//! The listening socket is built with raw `socket`/`bind`/`listen` calls so
//! the abstract-namespace address and the listen backlog match what existing
//! local clients expect. Accepted connections are made non-blocking and
//! handed to the reactor as [`ClientConn`]s.

use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use super::client_conn::ClientConn;
use super::SocketAddress;
use crate::constants::LISTEN_BACKLOG;
use crate::context::DaemonContext;
use crate::reactor::{Disposition, EventSource, Registrar};

/// Build the `sockaddr_un` for `addr` and its length.
///
/// Abstract names start with a NUL byte and the length covers the family,
/// that NUL and the name, with no terminator, so the bound name is exactly
/// `"\0fenced_sock"`. Filesystem paths count their trailing NUL.
pub fn sockaddr(addr: &SocketAddress) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let mut sun: libc::sockaddr_un = unsafe { mem::zeroed() };
    sun.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let (offset, name) = match addr {
        SocketAddress::Abstract(name) => (1, name.as_bytes()),
        SocketAddress::Path(path) => (0, path.as_os_str().as_bytes()),
    };
    if name.is_empty() {
        bail!("Socket address is empty");
    }
    if offset + name.len() >= sun.sun_path.len() {
        bail!(
            "Socket address too long ({} bytes, max {}): {addr}",
            name.len(),
            sun.sun_path.len() - offset - 1
        );
    }
    for (dst, &src) in sun.sun_path[offset..].iter_mut().zip(name) {
        *dst = src as libc::c_char;
    }

    let len = match addr {
        SocketAddress::Abstract(_) => mem::size_of::<libc::sa_family_t>() + 1 + name.len(),
        SocketAddress::Path(_) => mem::size_of::<libc::sa_family_t>() + name.len() + 1,
    };
    Ok((sun, len as libc::socklen_t))
}

/// Create a stream socket with close-on-exec set.
pub(crate) fn stream_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain syscall with constant arguments.
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by socket(2) and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Open a blocking stream connection to `addr`.
pub fn connect_stream(addr: &SocketAddress) -> Result<UnixStream> {
    let (sun, len) = sockaddr(addr)?;
    let fd = stream_socket().context("Failed to create socket")?;
    // SAFETY: `sun` is a valid sockaddr_un and `len` does not exceed its size.
    let rv = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            std::ptr::addr_of!(sun).cast::<libc::sockaddr>(),
            len,
        )
    };
    if rv < 0 {
        return Err(io::Error::last_os_error()).with_context(|| format!("Failed to connect to {addr}"));
    }
    Ok(UnixStream::from(fd))
}

/// Bind and listen on `addr`.
///
/// For a filesystem path any stale socket file is removed first and the new
/// one is restricted to the owner (0600).
pub fn bind_listener(addr: &SocketAddress) -> Result<UnixListener> {
    let (sun, len) = sockaddr(addr)?;

    if let SocketAddress::Path(path) = addr {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
        }
    }

    let fd = stream_socket().context("Failed to create client socket")?;

    // SAFETY: `sun` is a valid sockaddr_un and `len` does not exceed its size.
    let rv = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            std::ptr::addr_of!(sun).cast::<libc::sockaddr>(),
            len,
        )
    };
    if rv < 0 {
        return Err(io::Error::last_os_error()).with_context(|| format!("Failed to bind socket {addr}"));
    }

    if let SocketAddress::Path(path) = addr {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    // SAFETY: `fd` is a bound stream socket.
    if unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) } < 0 {
        return Err(io::Error::last_os_error()).with_context(|| format!("Failed to listen on {addr}"));
    }

    let listener = UnixListener::from(fd);
    listener
        .set_nonblocking(true)
        .context("Failed to make listener non-blocking")?;
    log::info!("[listener] Listening on {addr}");
    Ok(listener)
}

/// Reactor source accepting client connections.
#[derive(Debug)]
pub struct ListenerSource {
    listener: UnixListener,
    path: Option<PathBuf>,
}

impl ListenerSource {
    /// Bind `addr` and wrap the listener.
    pub fn bind(addr: &SocketAddress) -> Result<Self> {
        let listener = bind_listener(addr)?;
        let path = match addr {
            SocketAddress::Path(path) => Some(path.clone()),
            SocketAddress::Abstract(_) => None,
        };
        Ok(Self { listener, path })
    }

    fn accept(&self) -> io::Result<Option<UnixStream>> {
        match self.listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(true)?;
                Ok(Some(stream))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl EventSource<DaemonContext> for ListenerSource {
    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn on_readable(&mut self, _: &mut DaemonContext, registrar: &mut Registrar<DaemonContext>) -> Disposition {
        loop {
            match self.accept() {
                Ok(Some(stream)) => {
                    log::trace!("[listener] Accepted client fd {}", stream.as_raw_fd());
                    registrar.register(Box::new(ClientConn::new(stream)));
                }
                Ok(None) => return Disposition::Continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::error!("[listener] Accept error: {e}");
                    return Disposition::Continue;
                }
            }
        }
    }

    fn on_error(&mut self, _: &mut DaemonContext, _: &mut Registrar<DaemonContext>) -> Disposition {
        Disposition::Fatal(anyhow!("client listener failed"))
    }

    fn kind(&self) -> &'static str {
        "listener"
    }
}

impl Drop for ListenerSource {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            let _ = std::fs::remove_file(path);
        }
    }
}
