//! Error types for the bridge

use crate::marshal::PrimitiveKind;

/// Result type for bridge calls
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Class registration failures.
///
/// These indicate a defect in how a class describes itself and surface once,
/// when its metadata is built. Hosts are expected to treat them as fatal at
/// startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// Two members share a name
    #[error("class {class}: duplicate member `{member}`")]
    DuplicateMember {
        /// Meta name of the class
        class: &'static str,
        /// Offending member name
        member: &'static str,
    },

    /// Member name collides with a built-in identity tag
    #[error("class {class}: member name `{member}` is reserved")]
    ReservedName {
        /// Meta name of the class
        class: &'static str,
        /// Offending member name
        member: &'static str,
    },

    /// Member kind cannot be stored with the given layout
    #[error("class {class}: member `{member}` of kind {kind:?} cannot be {size} bytes at offset {offset}")]
    UnsupportedKind {
        /// Meta name of the class
        class: &'static str,
        /// Offending member name
        member: &'static str,
        /// Declared kind
        kind: PrimitiveKind,
        /// Declared width in bytes
        size: usize,
        /// Declared offset in bytes
        offset: usize,
    },

    /// Member extends past the end of the owning type
    #[error("class {class}: member `{member}` at {offset}+{size} exceeds type size {type_size}")]
    OutOfBounds {
        /// Meta name of the class
        class: &'static str,
        /// Offending member name
        member: &'static str,
        /// Declared offset in bytes
        offset: usize,
        /// Declared width in bytes
        size: usize,
        /// Size of the owning type
        type_size: usize,
    },

    /// Two distinct Rust types claim the same meta name
    #[error("meta name {name} is already registered for {existing}, cannot register {requested}")]
    MetaNameClash {
        /// Contested meta name
        name: &'static str,
        /// Type already registered under that name
        existing: &'static str,
        /// Type that attempted registration
        requested: &'static str,
    },
}

/// Bridge error types, surfaced to the scripting caller
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Class metadata could not be built
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// Argument could not be converted to the declared parameter type
    #[error("argument #{position}: expected {expected}, got {got}")]
    MarshalType {
        /// 1-based frame position (0 when not yet known)
        position: usize,
        /// Expected native type
        expected: &'static str,
        /// Dynamic type received
        got: &'static str,
    },

    /// Member does not exist on the class
    #[error("{class} has no member `{member}`")]
    UnknownMember {
        /// Meta name of the class
        class: &'static str,
        /// Requested member
        member: String,
    },

    /// Assignment to a read-only data member
    #[error("member `{member}` of {class} is read-only")]
    ReadOnly {
        /// Meta name of the class
        class: &'static str,
        /// Requested member
        member: String,
    },

    /// Call on a data member
    #[error("member `{member}` of {class} is not callable")]
    NotCallable {
        /// Meta name of the class
        class: &'static str,
        /// Requested member
        member: String,
    },

    /// Field access on a method
    #[error("member `{member}` of {class} is a method, not a field")]
    NotAField {
        /// Meta name of the class
        class: &'static str,
        /// Requested member
        member: String,
    },

    /// Native object behind the proxy was invalidated by the host
    #[error("{class} proxy at {address:#x} is detached from its native object")]
    Detached {
        /// Meta name of the class
        class: &'static str,
        /// Native address the proxy was bound to
        address: usize,
    },

    /// Proxy is already in use by a running member access
    #[error("{class} proxy at {address:#x} is already in use")]
    Busy {
        /// Meta name of the class
        class: &'static str,
        /// Native address the proxy is bound to
        address: usize,
    },

    /// Address is already bound to a proxy of another class
    #[error("pointer {address:#x} is bound as {bound}, cannot bind it as {requested}")]
    AliasedPointer {
        /// Contested address
        address: usize,
        /// Class of the live proxy
        bound: &'static str,
        /// Class requested by the caller
        requested: &'static str,
    },

    /// Failure reported by a native host operation (OS errors and the like)
    #[error("{kind}: {message} (os error {code})")]
    Host {
        /// Error category, e.g. `ConnectError`
        kind: &'static str,
        /// Originating OS error code
        code: i32,
        /// Human-readable message
        message: String,
    },
}

impl BridgeError {
    /// Attach a frame position to a marshaling error
    pub(crate) fn at_position(self, position: usize) -> Self {
        match self {
            BridgeError::MarshalType { expected, got, .. } => BridgeError::MarshalType {
                position,
                expected,
                got,
            },
            other => other,
        }
    }
}
