//! Error types for the event multiplexer

use std::io;
use tether_sdk::BridgeError;

/// Result type for multiplexer operations
pub type MuxResult<T> = Result<T, MuxError>;

/// Multiplexer failures, each carrying the originating OS error code
/// (0 when the failure did not come from the OS).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MuxError {
    /// epoll instance creation, registration or wait failed
    #[error("epoll: {message}")]
    Epoll {
        /// OS error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Outgoing connection could not be established
    #[error("connect: {message}")]
    Connect {
        /// OS error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Local address could not be bound
    #[error("bind: {message}")]
    Bind {
        /// OS error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Bound socket could not be made passive
    #[error("listen: {message}")]
    Listen {
        /// OS error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Send failed or the descriptor is not a watched stream
    #[error("write: {message}")]
    Write {
        /// OS error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Receive failed or the descriptor is not a watched stream
    #[error("read: {message}")]
    Read {
        /// OS error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Incoming connection could not be accepted
    #[error("accept: {message}")]
    Accept {
        /// OS error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Socket state could not be queried or the descriptor is not watched
    #[error("socket: {message}")]
    Socket {
        /// OS error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Multiplexer settings are out of range
    #[error("config: {message}")]
    Config {
        /// What is wrong
        message: String,
    },

    /// The multiplexer's host bridge is gone
    #[error("host bridge was dropped")]
    Unhosted,
}

fn parts(err: &io::Error) -> (i32, String) {
    (err.raw_os_error().unwrap_or(0), err.to_string())
}

impl MuxError {
    pub(crate) fn epoll(err: io::Error) -> Self {
        let (code, message) = parts(&err);
        MuxError::Epoll { code, message }
    }

    pub(crate) fn connect(err: io::Error) -> Self {
        let (code, message) = parts(&err);
        MuxError::Connect { code, message }
    }

    pub(crate) fn bind(err: io::Error) -> Self {
        let (code, message) = parts(&err);
        MuxError::Bind { code, message }
    }

    pub(crate) fn listen(err: io::Error) -> Self {
        let (code, message) = parts(&err);
        MuxError::Listen { code, message }
    }

    pub(crate) fn write(err: io::Error) -> Self {
        let (code, message) = parts(&err);
        MuxError::Write { code, message }
    }

    pub(crate) fn read(err: io::Error) -> Self {
        let (code, message) = parts(&err);
        MuxError::Read { code, message }
    }

    pub(crate) fn accept(err: io::Error) -> Self {
        let (code, message) = parts(&err);
        MuxError::Accept { code, message }
    }

    pub(crate) fn socket(err: io::Error) -> Self {
        let (code, message) = parts(&err);
        MuxError::Socket { code, message }
    }

    /// OS error code, 0 if none
    pub fn code(&self) -> i32 {
        match self {
            MuxError::Epoll { code, .. }
            | MuxError::Connect { code, .. }
            | MuxError::Bind { code, .. }
            | MuxError::Listen { code, .. }
            | MuxError::Write { code, .. }
            | MuxError::Read { code, .. }
            | MuxError::Accept { code, .. }
            | MuxError::Socket { code, .. } => *code,
            MuxError::Config { .. } => libc::EINVAL,
            MuxError::Unhosted => 0,
        }
    }

    /// Script-visible error category
    pub fn kind(&self) -> &'static str {
        match self {
            MuxError::Epoll { .. } => "EpollError",
            MuxError::Connect { .. } => "ConnectError",
            MuxError::Bind { .. } => "BindError",
            MuxError::Listen { .. } => "ListenError",
            MuxError::Write { .. } => "WriteError",
            MuxError::Read { .. } => "ReadError",
            MuxError::Accept { .. } => "AcceptError",
            MuxError::Socket { .. } => "SocketError",
            MuxError::Config { .. } => "ConfigError",
            MuxError::Unhosted => "HostError",
        }
    }
}

impl From<MuxError> for BridgeError {
    fn from(err: MuxError) -> Self {
        let message = match &err {
            MuxError::Epoll { message, .. }
            | MuxError::Connect { message, .. }
            | MuxError::Bind { message, .. }
            | MuxError::Listen { message, .. }
            | MuxError::Write { message, .. }
            | MuxError::Read { message, .. }
            | MuxError::Accept { message, .. }
            | MuxError::Socket { message, .. }
            | MuxError::Config { message } => message.clone(),
            MuxError::Unhosted => err.to_string(),
        };
        BridgeError::Host {
            kind: err.kind(),
            code: err.code(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_code_is_kept() {
        let err = MuxError::connect(io::Error::from_raw_os_error(libc::ECONNREFUSED));
        assert_eq!(err.code(), libc::ECONNREFUSED);
        assert_eq!(err.kind(), "ConnectError");
        assert!(err.to_string().starts_with("connect: "));
    }

    #[test]
    fn test_non_os_error_has_code_zero() {
        let err = MuxError::bind(io::Error::new(io::ErrorKind::InvalidInput, "bad address"));
        assert_eq!(err.code(), 0);
        assert_eq!(err, MuxError::Bind { code: 0, message: "bad address".into() });
    }

    #[test]
    fn test_config_error_is_einval() {
        let err = MuxError::Config {
            message: "max_event must be at least 1".into(),
        };
        assert_eq!(err.code(), libc::EINVAL);
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn test_into_bridge_error() {
        let err: BridgeError = MuxError::Write {
            code: libc::EBADF,
            message: "fd 99 is not watched".into(),
        }
        .into();
        assert_eq!(
            err,
            BridgeError::Host {
                kind: "WriteError",
                code: libc::EBADF,
                message: "fd 99 is not watched".into(),
            }
        );

        let err: BridgeError = MuxError::Unhosted.into();
        assert!(matches!(err, BridgeError::Host { kind: "HostError", code: 0, .. }));
    }
}
