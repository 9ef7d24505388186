//! Bridge facade
//!
//! A `Bridge` ties one `MetaRegistry` to one `ObjectCache` and is what a
//! scripting runtime talks to: it binds native pointers to proxies, reads and
//! writes data members in place, and dispatches method calls through their
//! adapters.

use crate::error::{BridgeError, BridgeResult, RegistrationError};
use crate::frame::CallFrame;
use crate::identity::{ObjectCache, ProxyHandle};
use crate::marshal::{read_raw, write_raw, PrimitiveKind};
use crate::meta::{
    Access, ClassBuilder, ClassMetadata, Locator, MemberDescriptor, MemberKind, MetaRegistry,
    NAME_TAG, POINTER_TAG,
};
use crate::value::DynValue;
use std::sync::Arc;

/// A native class that can cross the bridge.
///
/// Usually derived with `#[derive(Exposed)]`, which computes every offset
/// with `offset_of!`. By hand, data members need an `unsafe` block since the
/// builder cannot check that an offset names a field of the declared type:
///
/// ```ignore
/// impl ExposedClass for Player {
///     const META_NAME: &'static str = "_class_meta:Player";
///
///     fn describe(class: &mut ClassBuilder<Self>) -> Result<(), RegistrationError> {
///         // SAFETY: `hp` is an i32 field of Player
///         unsafe { class.field::<i32>("hp", offset_of!(Player, hp), Access::ReadWrite)? };
///         class.method("heal", Player::heal)?;
///         Ok(())
///     }
/// }
/// ```
pub trait ExposedClass: Sized + 'static {
    /// Meta name, conventionally `_class_meta:<TypeName>`
    const META_NAME: &'static str;

    /// Declare the class's members in order
    fn describe(class: &mut ClassBuilder<Self>) -> Result<(), RegistrationError>;
}

/// Entry point for a scripting runtime
pub struct Bridge {
    registry: Arc<MetaRegistry>,
    cache: Arc<ObjectCache>,
}

impl Bridge {
    /// Create a bridge with its own registry and cache
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a bridge that may share state with others
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    /// Metadata registry
    pub fn registry(&self) -> &Arc<MetaRegistry> {
        &self.registry
    }

    /// Identity cache
    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    /// Build (or fetch) the metadata for `T` ahead of the first bind.
    ///
    /// Hosts call this at startup so description defects abort early.
    pub fn register<T: ExposedClass>(&self) -> BridgeResult<Arc<ClassMetadata>> {
        Ok(self.registry.resolve::<T>()?)
    }

    /// Bind a native pointer to its proxy.
    ///
    /// Null gives `Nil`. A pointer with a live proxy gives that same proxy.
    ///
    /// # Safety
    /// `ptr` must be null or point to a `T` that stays valid for as long as
    /// any proxy bound to it is read, written or invoked, unless the host
    /// calls `ObjectCache::invalidate` for it first. While a bridge call on
    /// the proxy runs, nothing else may access the object: not the host, and
    /// not a proxy for an overlapping object (a field of it, or the same
    /// address bound in another cache). Calls through this one proxy are
    /// serialized by the bridge, which fails a nested call with `Busy`.
    pub unsafe fn bind<T: ExposedClass>(&self, ptr: *mut T) -> BridgeResult<DynValue> {
        if ptr.is_null() {
            return Ok(DynValue::Nil);
        }
        let meta = self.registry.resolve::<T>()?;
        let handle = self.cache.get_or_insert(ptr as usize, &meta)?;
        Ok(DynValue::Object(handle))
    }

    /// Read a member.
    ///
    /// Data members are read in place; `__pointer__` and `__name__` give the
    /// identity tags. Unknown names read as `Nil`.
    pub fn get(&self, handle: &ProxyHandle, member: &str) -> BridgeResult<DynValue> {
        match member {
            POINTER_TAG => return Ok(DynValue::Pointer(handle.address())),
            NAME_TAG => return Ok(DynValue::str(handle.meta_name())),
            _ => {}
        }
        let Some(descriptor) = handle.meta().member(member) else {
            return Ok(DynValue::Nil);
        };
        let (kind, offset, size) = field_layout(handle, descriptor)?;
        let _claim = handle.enter()?;
        // SAFETY: `ClassBuilder::field` callers vouch for the layout, `bind` requires the
        // object to be alive while attached, and the claim excludes any other
        // access through this proxy.
        Ok(unsafe { read_raw(kind, size, (handle.address() + offset) as *const u8) })
    }

    /// Assign a read-write data member
    pub fn set(&self, handle: &ProxyHandle, member: &str, value: &DynValue) -> BridgeResult<()> {
        let descriptor = match member {
            POINTER_TAG | NAME_TAG => {
                return Err(BridgeError::ReadOnly {
                    class: handle.meta_name(),
                    member: member.to_string(),
                })
            }
            _ => lookup(handle, member)?,
        };
        let (kind, offset, size) = field_layout(handle, descriptor)?;
        if descriptor.access() == Access::ReadOnly {
            return Err(BridgeError::ReadOnly {
                class: handle.meta_name(),
                member: member.to_string(),
            });
        }
        let _claim = handle.enter()?;
        // SAFETY: as in `get`.
        unsafe { write_raw(kind, size, (handle.address() + offset) as *mut u8, value) };
        Ok(())
    }

    /// Invoke a method with the arguments already in `frame`.
    ///
    /// Returns the number of results the method pushed.
    pub fn invoke(&self, handle: &ProxyHandle, member: &str, frame: &mut CallFrame<'_>) -> BridgeResult<usize> {
        let descriptor = lookup(handle, member)?;
        let Locator::Adapter(adapter) = descriptor.locator() else {
            return Err(BridgeError::NotCallable {
                class: handle.meta_name(),
                member: member.to_string(),
            });
        };
        let _claim = handle.enter()?;
        log::trace!("invoke {}.{}", handle.meta_name(), member);
        adapter(handle.address() as *mut (), frame)
    }

    /// Invoke a method and collect its results
    pub fn call(&self, handle: &ProxyHandle, member: &str, args: Vec<DynValue>) -> BridgeResult<Vec<DynValue>> {
        let mut frame = CallFrame::new(self, args);
        let count = self.invoke(handle, member, &mut frame)?;
        Ok(frame.into_results(count))
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'m>(handle: &'m ProxyHandle, member: &str) -> BridgeResult<&'m MemberDescriptor> {
    handle
        .meta()
        .member(member)
        .ok_or_else(|| BridgeError::UnknownMember {
            class: handle.meta_name(),
            member: member.to_string(),
        })
}

fn field_layout(
    handle: &ProxyHandle,
    descriptor: &MemberDescriptor,
) -> BridgeResult<(PrimitiveKind, usize, usize)> {
    match (descriptor.kind(), descriptor.locator()) {
        (MemberKind::Data(kind), Locator::Field { offset, size }) => Ok((kind, *offset, *size)),
        _ => Err(BridgeError::NotAField {
            class: handle.meta_name(),
            member: descriptor.name().to_string(),
        }),
    }
}

/// Builder for a `Bridge` that shares its cache or registry
#[derive(Default)]
pub struct BridgeBuilder {
    registry: Option<Arc<MetaRegistry>>,
    cache: Option<Arc<ObjectCache>>,
}

impl BridgeBuilder {
    /// Share an identity cache with other bridges
    pub fn shared_cache(mut self, cache: Arc<ObjectCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share a metadata registry with other bridges
    pub fn shared_registry(mut self, registry: Arc<MetaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Finish building
    pub fn build(self) -> Bridge {
        Bridge {
            registry: self.registry.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
        }
    }
}
