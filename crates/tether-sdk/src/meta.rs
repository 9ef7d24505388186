//! Reflection metadata: per-class member tables
//!
//! A `ClassMetadata` is built once per class through a typed `ClassBuilder`
//! and shared as `Arc<ClassMetadata>` afterwards. Member order is declaration
//! order and never changes once built.

use crate::adapter::{adapter, frame_adapter, CallAdapter, Method};
use crate::bridge::ExposedClass;
use crate::error::{BridgeResult, RegistrationError};
use crate::frame::CallFrame;
use crate::marshal::{Primitive, PrimitiveKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Identity tag exposing the native address of a proxy
pub const POINTER_TAG: &str = "__pointer__";

/// Identity tag exposing the meta name of a proxy
pub const NAME_TAG: &str = "__name__";

/// Whether scripts may assign a data member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Reads only
    ReadOnly,
    /// Reads and writes
    ReadWrite,
}

/// What a member is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Data member of a primitive kind
    Data(PrimitiveKind),
    /// Callable method
    Method,
}

/// Where a member lives
#[derive(Clone)]
pub enum Locator {
    /// Byte range inside the native object
    Field {
        /// Offset from the object's base address
        offset: usize,
        /// Width in bytes
        size: usize,
    },
    /// Invocation closure
    Adapter(CallAdapter),
}

/// One exposed member of a class
#[derive(Clone)]
pub struct MemberDescriptor {
    name: &'static str,
    kind: MemberKind,
    access: Access,
    locator: Locator,
}

impl MemberDescriptor {
    /// Member name as seen by scripts
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Member kind
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    /// Member access
    pub fn access(&self) -> Access {
        self.access
    }

    /// Member locator
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// True for callable members
    pub fn is_method(&self) -> bool {
        matches!(self.kind, MemberKind::Method)
    }
}

impl std::fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("MemberDescriptor");
        s.field("name", &self.name)
            .field("kind", &self.kind)
            .field("access", &self.access);
        if let Locator::Field { offset, size } = self.locator {
            s.field("offset", &offset).field("size", &size);
        }
        s.finish()
    }
}

/// Member table of one native class
pub struct ClassMetadata {
    name: &'static str,
    type_name: &'static str,
    type_id: TypeId,
    size: usize,
    members: Vec<MemberDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl ClassMetadata {
    /// Build the table for `T` by running its `describe`
    pub fn build<T: ExposedClass>() -> Result<Self, RegistrationError> {
        let mut builder = ClassBuilder::<T>::new();
        T::describe(&mut builder)?;
        Ok(builder.finish())
    }

    /// Meta name, e.g. `_class_meta:Player`
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Rust type name of the class
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Rust type identity of the class
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Size of the native type in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Members in declaration order
    pub fn members(&self) -> &[MemberDescriptor] {
        &self.members
    }

    /// Look up a member by name
    pub fn member(&self, name: &str) -> Option<&MemberDescriptor> {
        self.index.get(name).map(|&i| &self.members[i])
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the class exposes nothing
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl std::fmt::Debug for ClassMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassMetadata")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("size", &self.size)
            .field("members", &self.members)
            .finish()
    }
}

/// Typed builder for a class's member table
pub struct ClassBuilder<T> {
    members: Vec<MemberDescriptor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ExposedClass> ClassBuilder<T> {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Expose a data member of native type `F` at `offset`
    ///
    /// Use `std::mem::offset_of!` for the offset; `#[derive(Exposed)]` does.
    ///
    /// # Safety
    /// `offset` must be the offset of a field of `T` whose type is exactly
    /// `F`. The bridge reads and writes the member in place, dropping and
    /// replacing `String` values.
    pub unsafe fn field<F: Primitive>(
        &mut self,
        name: &'static str,
        offset: usize,
        access: Access,
    ) -> Result<&mut Self, RegistrationError> {
        self.raw_field(name, F::KIND, offset, std::mem::size_of::<F>(), access)
    }

    /// Expose a data member described by kind, offset and width
    ///
    /// Width, alignment and bounds are checked; the field's type cannot be.
    ///
    /// # Safety
    /// `offset` must be the offset of a field of `T` holding the native type
    /// behind `kind` (`[u8; size]` for fixed strings).
    pub unsafe fn raw_field(
        &mut self,
        name: &'static str,
        kind: PrimitiveKind,
        offset: usize,
        size: usize,
        access: Access,
    ) -> Result<&mut Self, RegistrationError> {
        self.check_name(name)?;
        if !kind.accepts(offset, size) {
            return Err(RegistrationError::UnsupportedKind {
                class: T::META_NAME,
                member: name,
                kind,
                size,
                offset,
            });
        }
        let type_size = std::mem::size_of::<T>();
        if offset.checked_add(size).map_or(true, |end| end > type_size) {
            return Err(RegistrationError::OutOfBounds {
                class: T::META_NAME,
                member: name,
                offset,
                size,
                type_size,
            });
        }
        self.members.push(MemberDescriptor {
            name,
            kind: MemberKind::Data(kind),
            access,
            locator: Locator::Field { offset, size },
        });
        Ok(self)
    }

    /// Expose a typed method
    pub fn method<Args, M: Method<T, Args>>(
        &mut self,
        name: &'static str,
        method: M,
    ) -> Result<&mut Self, RegistrationError> {
        self.push_method(name, adapter::<T, Args, M>(method))
    }

    /// Expose a pure-frame method that handles its own arguments and results
    pub fn frame_method<F>(&mut self, name: &'static str, method: F) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(&mut T, &mut CallFrame<'_>) -> BridgeResult<usize> + Send + Sync + 'static,
    {
        self.push_method(name, frame_adapter::<T, F>(method))
    }

    fn push_method(&mut self, name: &'static str, adapter: CallAdapter) -> Result<&mut Self, RegistrationError> {
        self.check_name(name)?;
        self.members.push(MemberDescriptor {
            name,
            kind: MemberKind::Method,
            access: Access::ReadOnly,
            locator: Locator::Adapter(adapter),
        });
        Ok(self)
    }

    fn check_name(&self, name: &'static str) -> Result<(), RegistrationError> {
        if name == POINTER_TAG || name == NAME_TAG {
            return Err(RegistrationError::ReservedName {
                class: T::META_NAME,
                member: name,
            });
        }
        if self.members.iter().any(|m| m.name == name) {
            return Err(RegistrationError::DuplicateMember {
                class: T::META_NAME,
                member: name,
            });
        }
        Ok(())
    }

    fn finish(self) -> ClassMetadata {
        let index = self
            .members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name, i))
            .collect();
        ClassMetadata {
            name: T::META_NAME,
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: std::mem::size_of::<T>(),
            members: self.members,
            index,
        }
    }
}

/// Registry of class metadata keyed by meta name.
///
/// A lookup miss builds the class table; hits return the cached `Arc`.
pub struct MetaRegistry {
    classes: DashMap<&'static str, Arc<ClassMetadata>>,
    registrations: AtomicUsize,
}

impl MetaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            classes: DashMap::new(),
            registrations: AtomicUsize::new(0),
        }
    }

    /// Get the metadata for `T`, building it on first use
    pub fn resolve<T: ExposedClass>(&self) -> Result<Arc<ClassMetadata>, RegistrationError> {
        if let Some(meta) = self.classes.get(T::META_NAME) {
            return Self::check_type::<T>(meta.value());
        }
        match self.classes.entry(T::META_NAME) {
            Entry::Occupied(entry) => Self::check_type::<T>(entry.get()),
            Entry::Vacant(entry) => {
                let meta = Arc::new(ClassMetadata::build::<T>()?);
                self.registrations.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "registered class {} ({} members)",
                    meta.name(),
                    meta.len()
                );
                Ok(Arc::clone(entry.insert(meta).value()))
            }
        }
    }

    fn check_type<T: ExposedClass>(meta: &Arc<ClassMetadata>) -> Result<Arc<ClassMetadata>, RegistrationError> {
        if meta.type_id() != TypeId::of::<T>() {
            return Err(RegistrationError::MetaNameClash {
                name: T::META_NAME,
                existing: meta.type_name(),
                requested: std::any::type_name::<T>(),
            });
        }
        Ok(Arc::clone(meta))
    }

    /// Get metadata by meta name if already built
    pub fn get(&self, name: &str) -> Option<Arc<ClassMetadata>> {
        self.classes.get(name).map(|meta| Arc::clone(meta.value()))
    }

    /// All registered classes, sorted by meta name
    pub fn classes(&self) -> Vec<Arc<ClassMetadata>> {
        let mut all: Vec<_> = self.classes.iter().map(|e| Arc::clone(e.value())).collect();
        all.sort_by_key(|meta| meta.name());
        all
    }

    /// How many class tables have been built
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::Relaxed)
    }

    /// Get the number of registered classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for MetaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[allow(dead_code)]
    struct Sample {
        a: i32,
        b: f64,
        tag: [u8; 8],
    }

    impl Sample {
        fn sum(&self, x: i32) -> f64 {
            self.a as f64 + self.b + x as f64
        }
    }

    impl ExposedClass for Sample {
        const META_NAME: &'static str = "_class_meta:Sample";

        fn describe(class: &mut ClassBuilder<Self>) -> Result<(), RegistrationError> {
            // SAFETY: offsets and types match the fields of Sample
            unsafe {
                class
                    .field::<i32>("a", offset_of!(Sample, a), Access::ReadWrite)?
                    .field::<f64>("b", offset_of!(Sample, b), Access::ReadOnly)?
                    .field::<[u8; 8]>("tag", offset_of!(Sample, tag), Access::ReadWrite)?;
            }
            class.method("sum", Sample::sum)?;
            Ok(())
        }
    }

    struct Duplicate;

    impl ExposedClass for Duplicate {
        const META_NAME: &'static str = "_class_meta:Duplicate";

        fn describe(class: &mut ClassBuilder<Self>) -> Result<(), RegistrationError> {
            class
                .method("x", |_: &Duplicate| 1)?
                .method("x", |_: &Duplicate| 2)?;
            Ok(())
        }
    }

    struct Impostor;

    impl ExposedClass for Impostor {
        const META_NAME: &'static str = "_class_meta:Sample";

        fn describe(_class: &mut ClassBuilder<Self>) -> Result<(), RegistrationError> {
            Ok(())
        }
    }

    #[test]
    fn test_member_order_is_declaration_order() {
        let meta = ClassMetadata::build::<Sample>().unwrap();
        let names: Vec<_> = meta.members().iter().map(|m| m.name()).collect();
        assert_eq!(names, ["a", "b", "tag", "sum"]);
        assert_eq!(meta.name(), "_class_meta:Sample");
        assert!(meta.member("sum").unwrap().is_method());
        assert_eq!(
            meta.member("b").unwrap().kind(),
            MemberKind::Data(PrimitiveKind::Double)
        );
        assert_eq!(meta.member("b").unwrap().access(), Access::ReadOnly);
        assert!(meta.member("nope").is_none());
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let err = ClassMetadata::build::<Duplicate>().unwrap_err();
        assert_eq!(
            err,
            RegistrationError::DuplicateMember {
                class: "_class_meta:Duplicate",
                member: "x"
            }
        );
    }

    #[test]
    fn test_raw_field_validation() {
        let mut builder = ClassBuilder::<Sample>::new();
        // every call below is rejected before anything is recorded
        unsafe {
            let err = builder
                .raw_field("a", PrimitiveKind::Int, 0, 3, Access::ReadOnly)
                .err()
                .unwrap();
            assert!(matches!(err, RegistrationError::UnsupportedKind { size: 3, .. }));

            let err = builder
                .raw_field("far", PrimitiveKind::Int64, 1024, 8, Access::ReadOnly)
                .err()
                .unwrap();
            assert!(matches!(err, RegistrationError::OutOfBounds { offset: 1024, .. }));

            let err = builder
                .raw_field(POINTER_TAG, PrimitiveKind::Int, 0, 4, Access::ReadOnly)
                .err()
                .unwrap();
            assert!(matches!(err, RegistrationError::ReservedName { .. }));
        }
        assert!(builder.members.is_empty());
    }

    #[test]
    fn test_registry_builds_once() {
        let registry = MetaRegistry::new();
        let first = registry.resolve::<Sample>().unwrap();
        let second = registry.resolve::<Sample>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.registrations(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("_class_meta:Sample").is_some());
    }

    #[test]
    fn test_registry_rejects_name_clash() {
        let registry = MetaRegistry::new();
        registry.resolve::<Sample>().unwrap();
        let err = registry.resolve::<Impostor>().unwrap_err();
        assert!(matches!(err, RegistrationError::MetaNameClash { .. }));
        assert_eq!(registry.registrations(), 1);
    }

    #[test]
    fn test_failed_registration_is_not_cached() {
        let registry = MetaRegistry::new();
        assert!(registry.resolve::<Duplicate>().is_err());
        assert!(registry.is_empty());
        assert_eq!(registry.registrations(), 0);
    }
}
