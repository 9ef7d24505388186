//! Socket setup for the multiplexer: non-blocking TCP streams and listeners

use crate::error::{MuxError, MuxResult};
use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// A connection that was started without blocking
pub(crate) enum Connecting {
    /// Connected during the call
    Ready(TcpStream),
    /// Handshake still running; completion shows up as write readiness
    InProgress(TcpStream),
}

/// Start a non-blocking connection to `host:port`.
///
/// Resolved addresses are tried in turn until one connects or starts
/// connecting. An address that fails at once moves on to the next.
pub(crate) fn connect(host: &str, port: u16) -> MuxResult<Connecting> {
    let addrs = (host, port).to_socket_addrs().map_err(MuxError::connect)?;
    let mut last = None;
    for addr in addrs {
        match connect_addr(&addr) {
            Ok(connecting) => return Ok(connecting),
            Err(e) => {
                log::debug!("connect {}: {}", addr, e);
                last = Some(e);
            }
        }
    }
    Err(match last {
        Some(e) => MuxError::connect(e),
        None => MuxError::Connect {
            code: 0,
            message: format!("no addresses for {}:{}", host, port),
        },
    })
}

fn connect_addr(addr: &SocketAddr) -> io::Result<Connecting> {
    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let raw = unsafe {
        libc::socket(
            family,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: socket() returned a fresh descriptor we now own
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let (storage, len) = sockaddr(addr);
    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            (&storage as *const libc::sockaddr_storage).cast::<libc::sockaddr>(),
            len,
        )
    };
    let failure = (rc != 0).then(io::Error::last_os_error);
    let stream = TcpStream::from(fd);
    match failure {
        None => Ok(Connecting::Ready(stream)),
        Some(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(Connecting::InProgress(stream)),
        Some(e) => Err(e),
    }
}

fn sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: all-zero bytes are a valid sockaddr_storage
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            // SAFETY: sockaddr_storage is large and aligned enough for any sockaddr
            unsafe { (&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr_in>().write(sin) };
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            // SAFETY: as above
            unsafe { (&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr_in6>().write(sin6) };
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// Check a connection started with [`connect`].
///
/// `Ok(true)` once established, `Ok(false)` while the handshake runs, and
/// the pending socket error (`SO_ERROR`) as `ConnectError` if it failed.
pub(crate) fn connect_outcome(stream: &TcpStream) -> MuxResult<bool> {
    if let Some(err) = stream.take_error().map_err(MuxError::connect)? {
        return Err(MuxError::connect(err));
    }
    match stream.peer_addr() {
        Ok(_) => Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::ENOTCONN) => Ok(false),
        Err(e) => Err(MuxError::connect(e)),
    }
}

/// Bind `host:port` and make it passive with the given backlog.
pub(crate) fn listen(host: &str, port: u16, backlog: i32) -> MuxResult<TcpListener> {
    let listener = TcpListener::bind((host, port)).map_err(MuxError::bind)?;
    // std listens with its own backlog; a second listen() call resizes it
    if unsafe { libc::listen(listener.as_raw_fd(), backlog) } != 0 {
        return Err(MuxError::listen(io::Error::last_os_error()));
    }
    listener.set_nonblocking(true).map_err(MuxError::listen)?;
    Ok(listener)
}

/// Accept one pending connection; `None` when nothing is pending.
pub(crate) fn accept(listener: &TcpListener) -> MuxResult<Option<TcpStream>> {
    match listener.accept() {
        Ok((stream, peer)) => {
            stream.set_nonblocking(true).map_err(MuxError::accept)?;
            log::debug!("accepted {} on fd {}", peer, listener.as_raw_fd());
            Ok(Some(stream))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(MuxError::accept(e)),
    }
}
