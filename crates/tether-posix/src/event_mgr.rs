//! EventMgr: epoll-backed readiness multiplexer
//!
//! Owns one epoll instance and every socket it opens or accepts. Sockets are
//! registered level-triggered for read readiness; `wait` copies at most
//! `max_event` ready entries out of the kernel per call.
//!
//! `connect` never blocks. A connection still in its handshake is also
//! watched for writes; the first `wait` that reports it settles it into a
//! stream (or records the connect error that `send`/`recv` then return).
//!
//! Dropping the manager closes the epoll descriptor and every socket still
//! watched, and detaches any proxy the host bridge holds for it.

use crate::config::MuxConfig;
use crate::error::{MuxError, MuxResult};
use crate::net::{self, Connecting};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Weak};
use tether_sdk::{Bridge, BridgeResult, DynValue, Exposed, ToDynamic};

/// Default `recv` size when the caller gives none
pub const DEFAULT_RECV_SIZE: usize = 4096;

const HANGUP_MASK: u32 = (libc::EPOLLHUP | libc::EPOLLRDHUP | libc::EPOLLERR) as u32;

const READ_INTEREST: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;

const CONNECT_INTEREST: u32 = READ_INTEREST | libc::EPOLLOUT as u32;

/// One readiness report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    /// Descriptor the event is for
    pub fd: RawFd,
    /// Raw epoll event mask
    pub events: u32,
}

impl ReadyEvent {
    /// Data (or a pending connection) can be read
    pub fn readable(&self) -> bool {
        self.events & libc::EPOLLIN as u32 != 0
    }

    /// The socket accepts writes
    pub fn writable(&self) -> bool {
        self.events & libc::EPOLLOUT as u32 != 0
    }

    /// Peer hung up or the socket is in error
    pub fn hangup(&self) -> bool {
        self.events & HANGUP_MASK != 0
    }
}

impl ToDynamic for ReadyEvent {
    fn to_dynamic(self) -> DynValue {
        DynValue::record([
            ("fd", DynValue::Int(self.fd as i64)),
            ("events", DynValue::Int(self.events as i64)),
            ("readable", DynValue::Bool(self.readable())),
            ("writable", DynValue::Bool(self.writable())),
            ("hangup", DynValue::Bool(self.hangup())),
        ])
    }
}

/// A socket the manager watches and owns
enum Socket {
    Stream(TcpStream),
    /// Outgoing connection still in its handshake
    Connecting(TcpStream),
    /// Outgoing connection that failed after `connect` returned
    Failed(TcpStream, MuxError),
    Listener(TcpListener),
}

impl Socket {
    fn raw_fd(&self) -> RawFd {
        match self {
            Socket::Stream(s) | Socket::Connecting(s) | Socket::Failed(s, _) => s.as_raw_fd(),
            Socket::Listener(l) => l.as_raw_fd(),
        }
    }

    fn into_raw_fd(self) -> RawFd {
        match self {
            Socket::Stream(s) | Socket::Connecting(s) | Socket::Failed(s, _) => s.into_raw_fd(),
            Socket::Listener(l) => l.into_raw_fd(),
        }
    }
}

/// Readiness multiplexer over an epoll instance
#[derive(Exposed)]
#[exposed(methods = crate::registry::describe_methods)]
pub struct EventMgr {
    epoll: OwnedFd,
    events: Vec<libc::epoll_event>,
    #[exposed(readonly)]
    pub(crate) max_event: i32,
    #[exposed(readonly)]
    pub(crate) backlog: i32,
    watched: HashMap<RawFd, Socket>,
    host: Weak<Bridge>,
}

impl EventMgr {
    /// Create a manager reporting at most `max_event` events per `wait`
    pub fn new(host: &Arc<Bridge>, max_event: usize) -> MuxResult<Self> {
        Self::with_config(
            host,
            MuxConfig {
                max_event,
                ..MuxConfig::default()
            },
        )
    }

    /// Create a manager from config
    ///
    /// Out-of-range settings fail with `ConfigError` before anything is
    /// allocated.
    pub fn with_config(host: &Arc<Bridge>, config: MuxConfig) -> MuxResult<Self> {
        config.validate()?;
        let max_event = i32::try_from(config.max_event).map_err(|_| MuxError::Config {
            message: format!("max_event {} does not fit epoll_wait", config.max_event),
        })?;

        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(MuxError::epoll(io::Error::last_os_error()));
        }
        // SAFETY: epoll_create1 returned a fresh descriptor we now own
        let epoll = unsafe { OwnedFd::from_raw_fd(raw) };
        log::debug!("epoll fd {} created (max_event {})", raw, max_event);

        Ok(Self {
            epoll,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; max_event as usize],
            max_event,
            backlog: config.backlog,
            watched: HashMap::new(),
            host: Arc::downgrade(host),
        })
    }

    /// Ready-event capacity per `wait`
    pub fn max_event(&self) -> usize {
        self.max_event as usize
    }

    /// Number of watched descriptors
    pub fn watched(&self) -> usize {
        self.watched.len()
    }

    /// Start connecting to `host:port` without blocking.
    ///
    /// The new socket is watched for reads, and for writes until the
    /// handshake completes. Failures found later surface as `ConnectError`
    /// from `send` and `recv` on the returned fd.
    pub fn connect(&mut self, host: &str, port: u16) -> MuxResult<RawFd> {
        let (socket, interest) = match net::connect(host, port)? {
            Connecting::Ready(stream) => (Socket::Stream(stream), READ_INTEREST),
            Connecting::InProgress(stream) => (Socket::Connecting(stream), CONNECT_INTEREST),
        };
        self.watch(socket, interest).map_err(|e| MuxError::Connect {
            code: e.code(),
            message: e.to_string(),
        })
    }

    /// Listen on `host:port`; the listener is watched for incoming connections.
    ///
    /// A non-positive `backlog` uses the configured default.
    pub fn listen(&mut self, host: &str, port: u16, backlog: i32) -> MuxResult<RawFd> {
        let backlog = if backlog > 0 { backlog } else { self.backlog };
        let listener = net::listen(host, port, backlog)?;
        self.watch(Socket::Listener(listener), READ_INTEREST).map_err(|e| MuxError::Listen {
            code: e.code(),
            message: e.to_string(),
        })
    }

    /// Wait for readiness.
    ///
    /// `0` polls, a negative timeout blocks. Timeout and signal interruption
    /// both give an empty list.
    pub fn wait(&mut self, timeout_ms: i32) -> MuxResult<Vec<ReadyEvent>> {
        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.max_event,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(Vec::new());
            }
            return Err(MuxError::epoll(err));
        }

        let ready: Vec<ReadyEvent> = self.events[..n as usize]
            .iter()
            .map(|ev| {
                // epoll_event is packed on some targets; copy fields out
                let events = ev.events;
                let data = ev.u64;
                ReadyEvent {
                    fd: data as RawFd,
                    events,
                }
            })
            .collect();
        for ev in &ready {
            self.settle(ev.fd);
        }
        log::trace!("wait({}) -> {} ready", timeout_ms, ready.len());
        Ok(ready)
    }

    /// Send bytes on a watched stream; returns bytes written, `0` if the
    /// socket would block
    pub fn send(&mut self, fd: RawFd, data: &[u8]) -> MuxResult<usize> {
        self.settle(fd);
        let stream = match self.watched.get_mut(&fd) {
            Some(Socket::Stream(stream)) => stream,
            Some(Socket::Connecting(_)) => return Ok(0),
            Some(Socket::Failed(_, err)) => return Err(err.clone()),
            Some(Socket::Listener(_)) => {
                return Err(MuxError::Write {
                    code: libc::ENOTCONN,
                    message: format!("fd {} is a listener", fd),
                })
            }
            None => {
                return Err(MuxError::Write {
                    code: libc::EBADF,
                    message: format!("fd {} is not watched", fd),
                })
            }
        };
        match stream.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(MuxError::write(e)),
        }
    }

    /// Accept a pending connection on a watched listener.
    ///
    /// The new stream is watched; `None` when nothing is pending.
    pub fn accept(&mut self, fd: RawFd) -> MuxResult<Option<RawFd>> {
        let stream = match self.watched.get(&fd) {
            Some(Socket::Listener(listener)) => net::accept(listener)?,
            Some(Socket::Stream(_) | Socket::Connecting(_) | Socket::Failed(..)) => {
                return Err(MuxError::Accept {
                    code: libc::EINVAL,
                    message: format!("fd {} is not a listener", fd),
                })
            }
            None => {
                return Err(MuxError::Accept {
                    code: libc::EBADF,
                    message: format!("fd {} is not watched", fd),
                })
            }
        };
        match stream {
            Some(stream) => self.watch(Socket::Stream(stream), READ_INTEREST).map(Some),
            None => Ok(None),
        }
    }

    /// Receive up to `max` bytes from a watched stream.
    ///
    /// Empty when the socket would block, `None` on orderly shutdown by the
    /// peer.
    pub fn recv(&mut self, fd: RawFd, max: usize) -> MuxResult<Option<Vec<u8>>> {
        self.settle(fd);
        let stream = match self.watched.get_mut(&fd) {
            Some(Socket::Stream(stream)) => stream,
            Some(Socket::Connecting(_)) => return Ok(Some(Vec::new())),
            Some(Socket::Failed(_, err)) => return Err(err.clone()),
            Some(Socket::Listener(_)) => {
                return Err(MuxError::Read {
                    code: libc::ENOTCONN,
                    message: format!("fd {} is a listener", fd),
                })
            }
            None => {
                return Err(MuxError::Read {
                    code: libc::EBADF,
                    message: format!("fd {} is not watched", fd),
                })
            }
        };
        let mut buf = vec![0u8; max.max(1)];
        match stream.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Some(Vec::new())),
            Err(e) => Err(MuxError::read(e)),
        }
    }

    /// Stop watching `fd` and close it; false if it was not watched
    pub fn close(&mut self, fd: RawFd) -> bool {
        match self.watched.remove(&fd) {
            Some(socket) => {
                self.unwatch(socket);
                true
            }
            None => false,
        }
    }

    /// Local port a watched socket is bound to
    pub fn local_port(&self, fd: RawFd) -> MuxResult<u16> {
        let addr = match self.watched.get(&fd) {
            Some(Socket::Stream(s) | Socket::Connecting(s) | Socket::Failed(s, _)) => s.local_addr(),
            Some(Socket::Listener(l)) => l.local_addr(),
            None => {
                return Err(MuxError::Socket {
                    code: libc::EBADF,
                    message: format!("fd {} is not watched", fd),
                })
            }
        };
        addr.map(|a| a.port()).map_err(MuxError::socket)
    }

    /// Bind this manager to a proxy on its host bridge.
    ///
    /// # Safety
    /// The manager must not move while the proxy is in use; keep it boxed
    /// or otherwise pinned. Dropping the manager detaches the proxy.
    pub unsafe fn expose(&mut self) -> BridgeResult<DynValue> {
        let host = self.host.upgrade().ok_or(MuxError::Unhosted)?;
        host.bind(self as *mut EventMgr)
    }

    fn watch(&mut self, socket: Socket, interest: u32) -> MuxResult<RawFd> {
        let fd = socket.raw_fd();
        let mut ev = libc::epoll_event {
            events: interest,
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut ev) } != 0 {
            // socket drops here and closes fd
            return Err(MuxError::epoll(io::Error::last_os_error()));
        }
        self.watched.insert(fd, socket);
        log::debug!("watching fd {} ({} total)", fd, self.watched.len());
        Ok(fd)
    }

    /// Move a connecting socket on once its handshake is over
    fn settle(&mut self, fd: RawFd) {
        let outcome = match self.watched.get(&fd) {
            Some(Socket::Connecting(stream)) => net::connect_outcome(stream),
            _ => return,
        };
        let failure = match outcome {
            Ok(false) => return,
            Ok(true) => None,
            Err(err) => Some(err),
        };
        let Some(Socket::Connecting(stream)) = self.watched.remove(&fd) else {
            return;
        };

        let mut ev = libc::epoll_event {
            events: READ_INTEREST,
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut ev) } != 0 {
            log::warn!("epoll_ctl(MOD) on fd {}: {}", fd, io::Error::last_os_error());
        }
        let socket = match failure {
            None => {
                log::debug!("fd {} connected", fd);
                Socket::Stream(stream)
            }
            Some(err) => {
                log::debug!("fd {} failed to connect: {}", fd, err);
                Socket::Failed(stream, err)
            }
        };
        self.watched.insert(fd, socket);
    }

    fn unwatch(&self, socket: Socket) {
        let fd = socket.raw_fd();
        let rc = unsafe {
            libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if rc != 0 {
            log::warn!("epoll_ctl(DEL) on fd {}: {}", fd, io::Error::last_os_error());
        }
        let raw = socket.into_raw_fd();
        if unsafe { libc::close(raw) } != 0 {
            log::warn!("close fd {}: {}", raw, io::Error::last_os_error());
        }
        log::debug!("closed fd {}", raw);
    }
}

impl Drop for EventMgr {
    fn drop(&mut self) {
        if let Some(host) = self.host.upgrade() {
            host.cache().invalidate(self as *mut EventMgr as usize);
        }
        let sockets: Vec<Socket> = self.watched.drain().map(|(_, s)| s).collect();
        for socket in sockets {
            self.unwatch(socket);
        }
        log::debug!("releasing epoll fd {}", self.epoll.as_raw_fd());
    }
}
