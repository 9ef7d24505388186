//! Tether SDK - bridge native Rust objects into an embedded scripting runtime
//!
//! This crate provides what a host needs to expose native objects to a
//! dynamically typed runtime: the dynamic value type, marshaling between
//! native and dynamic values, call adapters for methods of any arity, per
//! class reflection metadata and a weak object identity cache.
//!
//! # Example
//!
//! ```ignore
//! use tether_sdk::{Bridge, DynValue, Exposed};
//!
//! #[derive(Exposed)]
//! #[exposed(methods = Player::methods)]
//! struct Player {
//!     #[exposed]
//!     hp: i32,
//!     #[exposed(readonly)]
//!     level: i16,
//! }
//!
//! let bridge = Bridge::new();
//! let mut player = Player { hp: 10, level: 1 };
//! let proxy = unsafe { bridge.bind(&mut player as *mut Player)? };
//! let handle = proxy.as_object().unwrap();
//! bridge.set(handle, "hp", &DynValue::Int(7))?;
//! ```

#![warn(missing_docs)]

extern crate self as tether_sdk;

pub mod adapter;
pub mod bridge;
pub mod error;
pub mod frame;
pub mod identity;
pub mod marshal;
pub mod meta;
pub mod value;

pub use adapter::{adapter, frame_adapter, CallAdapter, Exclusive, Exposed, IntoReturn, Method, Shared};
pub use bridge::{Bridge, BridgeBuilder, ExposedClass};
pub use error::{BridgeError, BridgeResult, RegistrationError};
pub use frame::CallFrame;
pub use identity::{ObjectCache, ProxyHandle};
pub use marshal::{ByteString, Primitive, PrimitiveKind, ToDynamic, ToNative, UnixTime};
pub use meta::{
    Access, ClassBuilder, ClassMetadata, Locator, MemberDescriptor, MemberKind, MetaRegistry,
    NAME_TAG, POINTER_TAG,
};
pub use value::DynValue;

/// Derive `ExposedClass` from annotated struct fields
pub use tether_derive::Exposed;
