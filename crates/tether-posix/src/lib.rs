//! Tether POSIX - epoll event multiplexer for the Tether bridge
//!
//! `EventMgr` owns an epoll instance and the TCP sockets it creates, and is
//! exposed to scripts as class `_class_meta:EventMgr` with `connect`,
//! `listen`, `wait`, `send`, `accept`, `recv` and `close`.
//!
//! All calls run on the runtime's thread. `wait` is the only call that
//! blocks, and only when given a non-zero timeout.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event_mgr;
mod net;
pub mod registry;

pub use config::{MuxConfig, MAX_EVENT_LIMIT};
pub use error::{MuxError, MuxResult};
pub use event_mgr::{EventMgr, ReadyEvent};
pub use registry::register_posix;
