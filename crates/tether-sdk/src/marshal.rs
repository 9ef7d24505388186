//! Type marshaling between native values and `DynValue`
//!
//! `ToNative` and `ToDynamic` cover method arguments and return values.
//! `Primitive` plus `read_raw`/`write_raw` cover data members, which are read
//! and written in place at a byte offset inside the native object.
//!
//! Numeric conversions never fail: integers wrap to the target width, floats
//! truncate toward zero, numeric strings are parsed and anything else reads
//! as zero. String conversions of nil (or any non-scalar) give `""`.

use crate::error::{BridgeError, BridgeResult};
use crate::identity::ProxyHandle;
use crate::value::DynValue;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of a data member; fixes both conversion and raw memory width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// 1-byte signed integer
    Char,
    /// 2-byte signed integer
    Short,
    /// 4-byte signed integer
    Int,
    /// 8-byte signed integer
    Int64,
    /// Seconds since the Unix epoch, 8 bytes
    Time,
    /// Boolean, 1 byte
    Bool,
    /// 4-byte float
    Float,
    /// 8-byte float
    Double,
    /// NUL-terminated byte buffer of fixed capacity
    FixedString,
    /// Heap string (`String`)
    OwnedString,
}

impl PrimitiveKind {
    /// Width in bytes the kind requires, `None` for fixed strings (any N >= 1).
    pub fn width(self) -> Option<usize> {
        match self {
            PrimitiveKind::Char | PrimitiveKind::Bool => Some(1),
            PrimitiveKind::Short => Some(2),
            PrimitiveKind::Int | PrimitiveKind::Float => Some(4),
            PrimitiveKind::Int64 | PrimitiveKind::Time | PrimitiveKind::Double => Some(8),
            PrimitiveKind::OwnedString => Some(std::mem::size_of::<String>()),
            PrimitiveKind::FixedString => None,
        }
    }

    /// Alignment the raw accessors rely on
    pub(crate) fn align(self) -> usize {
        match self {
            PrimitiveKind::OwnedString => std::mem::align_of::<String>(),
            _ => 1,
        }
    }

    /// Check that a member of this kind can live at `offset` with `size` bytes
    pub fn accepts(self, offset: usize, size: usize) -> bool {
        let width_ok = match self.width() {
            Some(width) => width == size,
            None => size >= 1,
        };
        width_ok && offset % self.align() == 0
    }
}

/// Seconds since the Unix epoch, stored as a 64-bit integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct UnixTime(pub i64);

impl UnixTime {
    /// Current wall-clock time
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        UnixTime(secs)
    }
}

/// Native types that can be exposed as data members.
pub trait Primitive: 'static {
    /// Kind used for marshaling and raw access
    const KIND: PrimitiveKind;
}

impl Primitive for i8 {
    const KIND: PrimitiveKind = PrimitiveKind::Char;
}
impl Primitive for i16 {
    const KIND: PrimitiveKind = PrimitiveKind::Short;
}
impl Primitive for i32 {
    const KIND: PrimitiveKind = PrimitiveKind::Int;
}
impl Primitive for i64 {
    const KIND: PrimitiveKind = PrimitiveKind::Int64;
}
impl Primitive for UnixTime {
    const KIND: PrimitiveKind = PrimitiveKind::Time;
}
impl Primitive for bool {
    const KIND: PrimitiveKind = PrimitiveKind::Bool;
}
impl Primitive for f32 {
    const KIND: PrimitiveKind = PrimitiveKind::Float;
}
impl Primitive for f64 {
    const KIND: PrimitiveKind = PrimitiveKind::Double;
}
impl<const N: usize> Primitive for [u8; N] {
    const KIND: PrimitiveKind = PrimitiveKind::FixedString;
}
impl Primitive for String {
    const KIND: PrimitiveKind = PrimitiveKind::OwnedString;
}

// ============================================================================
// Conversion traits
// ============================================================================

/// Convert from `DynValue` to a native type.
pub trait ToNative: Sized {
    /// Convert, failing only for types that have no total conversion
    fn to_native(value: &DynValue) -> BridgeResult<Self>;
}

/// Convert from a native type to `DynValue`.
pub trait ToDynamic {
    /// Convert to a dynamic value
    fn to_dynamic(self) -> DynValue;
}

fn parse_integer(s: &str) -> i64 {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|n| n as i64))
        .unwrap_or(0)
}

pub(crate) fn to_integer(value: &DynValue) -> i64 {
    match value {
        DynValue::Int(i) => *i,
        DynValue::Num(n) => *n as i64,
        DynValue::Str(s) => parse_integer(s),
        DynValue::Bytes(b) => std::str::from_utf8(b).map(parse_integer).unwrap_or(0),
        _ => 0,
    }
}

pub(crate) fn to_number(value: &DynValue) -> f64 {
    match value {
        DynValue::Int(i) => *i as f64,
        DynValue::Num(n) => *n,
        DynValue::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        DynValue::Bytes(b) => std::str::from_utf8(b)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

pub(crate) fn to_string_lossy(value: &DynValue) -> String {
    match value {
        DynValue::Str(s) => s.clone(),
        DynValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        DynValue::Int(i) => i.to_string(),
        DynValue::Num(n) => n.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn to_byte_string(value: &DynValue) -> Vec<u8> {
    match value {
        DynValue::Bytes(b) => b.clone(),
        other => to_string_lossy(other).into_bytes(),
    }
}

macro_rules! impl_integer {
    ($($ty:ty),*) => {
        $(
            impl ToNative for $ty {
                #[inline]
                fn to_native(value: &DynValue) -> BridgeResult<Self> {
                    Ok(to_integer(value) as $ty)
                }
            }

            impl ToDynamic for $ty {
                #[inline]
                fn to_dynamic(self) -> DynValue {
                    DynValue::Int(self as i64)
                }
            }
        )*
    };
}

impl_integer!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);

impl ToNative for f32 {
    fn to_native(value: &DynValue) -> BridgeResult<Self> {
        Ok(to_number(value) as f32)
    }
}

impl ToDynamic for f32 {
    fn to_dynamic(self) -> DynValue {
        DynValue::Num(self as f64)
    }
}

impl ToNative for f64 {
    fn to_native(value: &DynValue) -> BridgeResult<Self> {
        Ok(to_number(value))
    }
}

impl ToDynamic for f64 {
    fn to_dynamic(self) -> DynValue {
        DynValue::Num(self)
    }
}

impl ToNative for bool {
    fn to_native(value: &DynValue) -> BridgeResult<Self> {
        Ok(value.is_truthy())
    }
}

impl ToDynamic for bool {
    fn to_dynamic(self) -> DynValue {
        DynValue::Bool(self)
    }
}

impl ToNative for UnixTime {
    fn to_native(value: &DynValue) -> BridgeResult<Self> {
        Ok(UnixTime(to_integer(value)))
    }
}

impl ToDynamic for UnixTime {
    fn to_dynamic(self) -> DynValue {
        DynValue::Int(self.0)
    }
}

impl ToNative for String {
    fn to_native(value: &DynValue) -> BridgeResult<Self> {
        Ok(to_string_lossy(value))
    }
}

impl ToDynamic for String {
    fn to_dynamic(self) -> DynValue {
        DynValue::Str(self)
    }
}

impl ToDynamic for &str {
    fn to_dynamic(self) -> DynValue {
        DynValue::Str(self.to_string())
    }
}

/// Byte buffer argument or result, carried as `DynValue::Bytes`.
///
/// Accepts strings and byte strings alike without any UTF-8 conversion;
/// numbers are formatted, anything else is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteString(pub Vec<u8>);

impl ByteString {
    /// Borrow the bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(bytes: Vec<u8>) -> Self {
        ByteString(bytes)
    }
}

impl ToNative for ByteString {
    fn to_native(value: &DynValue) -> BridgeResult<Self> {
        Ok(ByteString(to_byte_string(value)))
    }
}

impl ToDynamic for ByteString {
    fn to_dynamic(self) -> DynValue {
        DynValue::Bytes(self.0)
    }
}

impl ToNative for DynValue {
    fn to_native(value: &DynValue) -> BridgeResult<Self> {
        Ok(value.clone())
    }
}

impl ToDynamic for DynValue {
    fn to_dynamic(self) -> DynValue {
        self
    }
}

impl ToNative for ProxyHandle {
    fn to_native(value: &DynValue) -> BridgeResult<Self> {
        match value {
            DynValue::Object(handle) => Ok(handle.clone()),
            other => Err(BridgeError::MarshalType {
                position: 0,
                expected: "object",
                got: other.type_name(),
            }),
        }
    }
}

impl ToDynamic for ProxyHandle {
    fn to_dynamic(self) -> DynValue {
        DynValue::Object(self)
    }
}

impl ToNative for Option<ProxyHandle> {
    fn to_native(value: &DynValue) -> BridgeResult<Self> {
        match value {
            DynValue::Nil => Ok(None),
            other => ProxyHandle::to_native(other).map(Some),
        }
    }
}

impl<T: ToDynamic> ToDynamic for Option<T> {
    fn to_dynamic(self) -> DynValue {
        match self {
            Some(value) => value.to_dynamic(),
            None => DynValue::Nil,
        }
    }
}

impl<T: ToDynamic> ToDynamic for Vec<T> {
    fn to_dynamic(self) -> DynValue {
        DynValue::Array(self.into_iter().map(ToDynamic::to_dynamic).collect())
    }
}

// ============================================================================
// Raw member access
// ============================================================================

/// Read a data member of `kind` stored at `src`.
///
/// # Safety
/// `src` must point to `size` readable bytes holding a valid value of the
/// native type behind `kind`, aligned as `PrimitiveKind::accepts` requires.
pub unsafe fn read_raw(kind: PrimitiveKind, size: usize, src: *const u8) -> DynValue {
    match kind {
        PrimitiveKind::Char => DynValue::Int(src.cast::<i8>().read_unaligned() as i64),
        PrimitiveKind::Short => DynValue::Int(src.cast::<i16>().read_unaligned() as i64),
        PrimitiveKind::Int => DynValue::Int(src.cast::<i32>().read_unaligned() as i64),
        PrimitiveKind::Int64 | PrimitiveKind::Time => {
            DynValue::Int(src.cast::<i64>().read_unaligned())
        }
        PrimitiveKind::Bool => DynValue::Bool(src.read() != 0),
        PrimitiveKind::Float => DynValue::Num(src.cast::<f32>().read_unaligned() as f64),
        PrimitiveKind::Double => DynValue::Num(src.cast::<f64>().read_unaligned()),
        PrimitiveKind::FixedString => {
            let bytes = std::slice::from_raw_parts(src, size);
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(size);
            match std::str::from_utf8(&bytes[..end]) {
                Ok(text) => DynValue::str(text),
                Err(_) => DynValue::Bytes(bytes[..end].to_vec()),
            }
        }
        PrimitiveKind::OwnedString => DynValue::Str((*src.cast::<String>()).clone()),
    }
}

/// Write `value` into a data member of `kind` stored at `dst`.
///
/// Fixed strings are truncated to `size - 1` bytes and NUL-padded; their
/// bytes are copied as is, so non-UTF-8 contents read back as `Bytes`.
///
/// # Safety
/// Same requirements as [`read_raw`], with `dst` writable and not aliased.
pub unsafe fn write_raw(kind: PrimitiveKind, size: usize, dst: *mut u8, value: &DynValue) {
    match kind {
        PrimitiveKind::Char => dst.cast::<i8>().write_unaligned(to_integer(value) as i8),
        PrimitiveKind::Short => dst.cast::<i16>().write_unaligned(to_integer(value) as i16),
        PrimitiveKind::Int => dst.cast::<i32>().write_unaligned(to_integer(value) as i32),
        PrimitiveKind::Int64 | PrimitiveKind::Time => {
            dst.cast::<i64>().write_unaligned(to_integer(value))
        }
        PrimitiveKind::Bool => dst.write(value.is_truthy() as u8),
        PrimitiveKind::Float => dst.cast::<f32>().write_unaligned(to_number(value) as f32),
        PrimitiveKind::Double => dst.cast::<f64>().write_unaligned(to_number(value)),
        PrimitiveKind::FixedString => {
            let bytes = to_byte_string(value);
            let len = bytes.len().min(size - 1);
            let buf = std::slice::from_raw_parts_mut(dst, size);
            buf[..len].copy_from_slice(&bytes[..len]);
            buf[len..].fill(0);
        }
        PrimitiveKind::OwnedString => *dst.cast::<String>() = to_string_lossy(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_truncation() {
        let v = DynValue::Int(300);
        assert_eq!(i8::to_native(&v).unwrap(), 44);
        assert_eq!(u8::to_native(&v).unwrap(), 44);
        assert_eq!(i16::to_native(&v).unwrap(), 300);
        assert_eq!(i32::to_native(&DynValue::Num(-7.9)).unwrap(), -7);
    }

    #[test]
    fn test_numeric_conversions_are_total() {
        assert_eq!(i32::to_native(&DynValue::Nil).unwrap(), 0);
        assert_eq!(i32::to_native(&DynValue::Bool(true)).unwrap(), 0);
        assert_eq!(i64::to_native(&DynValue::str(" 42 ")).unwrap(), 42);
        assert_eq!(i64::to_native(&DynValue::str("2.5")).unwrap(), 2);
        assert_eq!(f64::to_native(&DynValue::str("nope")).unwrap(), 0.0);
        assert_eq!(f64::to_native(&DynValue::Int(3)).unwrap(), 3.0);
    }

    #[test]
    fn test_string_conversions() {
        assert_eq!(String::to_native(&DynValue::Nil).unwrap(), "");
        assert_eq!(String::to_native(&DynValue::Int(12)).unwrap(), "12");
        assert_eq!(String::to_native(&DynValue::str("hi")).unwrap(), "hi");
        assert_eq!(String::to_native(&DynValue::Bool(true)).unwrap(), "");
    }

    #[test]
    fn test_bool_truthiness() {
        assert!(!bool::to_native(&DynValue::Nil).unwrap());
        assert!(bool::to_native(&DynValue::Int(0)).unwrap());
        assert!(!bool::to_native(&DynValue::Bool(false)).unwrap());
    }

    #[test]
    fn test_object_marshal_error() {
        let err = ProxyHandle::to_native(&DynValue::Int(1)).unwrap_err();
        assert_eq!(
            err,
            BridgeError::MarshalType {
                position: 0,
                expected: "object",
                got: "integer"
            }
        );
        assert_eq!(Option::<ProxyHandle>::to_native(&DynValue::Nil).unwrap(), None);
    }

    #[test]
    fn test_to_dynamic() {
        assert_eq!(5u16.to_dynamic(), DynValue::Int(5));
        assert_eq!(1.5f32.to_dynamic(), DynValue::Num(1.5));
        assert_eq!("x".to_dynamic(), DynValue::str("x"));
        assert_eq!(None::<i32>.to_dynamic(), DynValue::Nil);
        assert_eq!(
            vec![1i32, 2].to_dynamic(),
            DynValue::Array(vec![DynValue::Int(1), DynValue::Int(2)])
        );
        assert_eq!(UnixTime(9).to_dynamic(), DynValue::Int(9));
    }

    #[test]
    fn test_kind_layout_checks() {
        assert!(PrimitiveKind::Int.accepts(0, 4));
        assert!(!PrimitiveKind::Int.accepts(0, 3));
        assert!(PrimitiveKind::FixedString.accepts(3, 16));
        assert!(!PrimitiveKind::FixedString.accepts(0, 0));
        assert!(!PrimitiveKind::OwnedString.accepts(1, std::mem::size_of::<String>()));
    }

    #[test]
    fn test_raw_fixed_string() {
        let mut buf = [0xFFu8; 6];
        unsafe {
            write_raw(PrimitiveKind::FixedString, 6, buf.as_mut_ptr(), &DynValue::str("abcdefgh"));
            assert_eq!(buf, *b"abcde\0");
            assert_eq!(
                read_raw(PrimitiveKind::FixedString, 6, buf.as_ptr()),
                DynValue::str("abcde")
            );
            write_raw(PrimitiveKind::FixedString, 6, buf.as_mut_ptr(), &DynValue::str("ab"));
            assert_eq!(buf, *b"ab\0\0\0\0");
        }
    }

    #[test]
    fn test_raw_fixed_string_keeps_bytes() {
        let mut buf = [0u8; 4];
        unsafe {
            write_raw(
                PrimitiveKind::FixedString,
                4,
                buf.as_mut_ptr(),
                &DynValue::Bytes(vec![0xff, 0xfe, 0x80, 0x81]),
            );
            assert_eq!(buf, [0xff, 0xfe, 0x80, 0]);
            assert_eq!(
                read_raw(PrimitiveKind::FixedString, 4, buf.as_ptr()),
                DynValue::Bytes(vec![0xff, 0xfe, 0x80])
            );
        }
    }

    #[test]
    fn test_byte_string_conversions() {
        let raw = vec![0xffu8, 0xfe, 0x00, 0x80];
        let bytes = ByteString::to_native(&DynValue::Bytes(raw.clone())).unwrap();
        assert_eq!(bytes.as_slice(), &raw[..]);
        assert_eq!(bytes.to_dynamic(), DynValue::Bytes(raw));

        assert_eq!(ByteString::to_native(&DynValue::str("ok")).unwrap().0, b"ok");
        assert_eq!(ByteString::to_native(&DynValue::Int(7)).unwrap().0, b"7");
        assert!(ByteString::to_native(&DynValue::Nil).unwrap().0.is_empty());

        assert_eq!(i32::to_native(&DynValue::Bytes(b"12".to_vec())).unwrap(), 12);
        assert_eq!(String::to_native(&DynValue::Bytes(vec![b'h', 0xff])).unwrap(), "h\u{fffd}");
    }

    #[test]
    fn test_raw_owned_string() {
        let mut s = String::from("old");
        let ptr = (&mut s as *mut String).cast::<u8>();
        let size = std::mem::size_of::<String>();
        unsafe {
            write_raw(PrimitiveKind::OwnedString, size, ptr, &DynValue::str("new value"));
            assert_eq!(read_raw(PrimitiveKind::OwnedString, size, ptr), DynValue::str("new value"));
        }
        assert_eq!(s, "new value");
    }

    #[test]
    fn test_raw_char_truncates() {
        let mut c: i8 = 0;
        let ptr = (&mut c as *mut i8).cast::<u8>();
        unsafe {
            write_raw(PrimitiveKind::Char, 1, ptr, &DynValue::Int(300));
            assert_eq!(read_raw(PrimitiveKind::Char, 1, ptr), DynValue::Int(44));
        }
    }
}
