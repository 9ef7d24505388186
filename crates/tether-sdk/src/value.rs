//! DynValue: the scripting runtime's generic value representation
//!
//! Everything that crosses the bridge travels as a `DynValue`. Primitives are
//! stored inline, native objects travel as reference-counted proxy handles,
//! and composite results (readiness records, lists) use `Array`/`Record`.
//!
//! # Variants
//!
//! ```text
//! Nil              absent / null
//! Bool(bool)       boolean
//! Int(i64)         integer (every native integer width widens to i64)
//! Num(f64)         floating point
//! Str(String)      string
//! Bytes(bytes)     byte string, not necessarily UTF-8
//! Pointer(usize)   light pointer, used as an identity tag
//! Object(handle)   proxy bound to one native object
//! Array(values)    ordered list
//! Record(fields)   ordered name/value pairs
//! ```

use crate::identity::ProxyHandle;

/// Generic value exchanged with the scripting runtime.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum DynValue {
    /// Absent value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Num(f64),
    /// String
    Str(String),
    /// Byte string (socket payloads, fixed buffers holding non-UTF-8 data)
    Bytes(Vec<u8>),
    /// Light pointer (opaque address)
    Pointer(usize),
    /// Proxy for a native object
    Object(ProxyHandle),
    /// Ordered list of values
    Array(Vec<DynValue>),
    /// Ordered record of named fields
    Record(Vec<(String, DynValue)>),
}

impl DynValue {
    /// Build a string value
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Build a record from name/value pairs, keeping their order
    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, DynValue)>,
        K: Into<String>,
    {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Check if value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Extract an integer (no coercion)
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a number, widening integers
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Extract a boolean (no truthiness coercion)
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow string contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the raw bytes of a string or byte string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Str(s) => Some(s.as_bytes()),
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the proxy handle of an object value
    pub fn as_object(&self) -> Option<&ProxyHandle> {
        match self {
            Self::Object(handle) => Some(handle),
            _ => None,
        }
    }

    /// Borrow array items
    pub fn as_array(&self) -> Option<&[DynValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a record field by name
    pub fn field(&self, name: &str) -> Option<&DynValue> {
        match self {
            Self::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Scripting-side truthiness: only `nil` and `false` are false
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    /// Get type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Pointer(_) => "pointer",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::Record(_) => "record",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_default() {
        let v = DynValue::default();
        assert!(v.is_nil());
        assert!(!v.is_truthy());
        assert_eq!(v.type_name(), "nil");
    }

    #[test]
    fn test_truthiness() {
        assert!(!DynValue::Bool(false).is_truthy());
        assert!(DynValue::Bool(true).is_truthy());
        assert!(DynValue::Int(0).is_truthy());
        assert!(DynValue::str("").is_truthy());
    }

    #[test]
    fn test_record_field_order() {
        let rec = DynValue::record([("fd", DynValue::Int(3)), ("events", DynValue::Int(1))]);
        assert_eq!(rec.field("fd"), Some(&DynValue::Int(3)));
        assert_eq!(rec.field("missing"), None);
        match rec {
            DynValue::Record(fields) => {
                let names: Vec<_> = fields.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(names, ["fd", "events"]);
            }
            _ => panic!("expected record"),
        }
    }

    #[test]
    fn test_bytes_are_not_text() {
        let raw = DynValue::Bytes(vec![0xff, 0x00]);
        assert_eq!(raw.as_bytes(), Some(&[0xff, 0x00][..]));
        assert_eq!(raw.as_str(), None);
        assert_eq!(raw.type_name(), "bytes");
        assert_eq!(DynValue::str("ab").as_bytes(), Some(&b"ab"[..]));
        assert_ne!(DynValue::str("ab"), DynValue::Bytes(b"ab".to_vec()));
    }

    #[test]
    fn test_as_num_widens_int() {
        assert_eq!(DynValue::Int(7).as_num(), Some(7.0));
        assert_eq!(DynValue::str("7").as_num(), None);
    }
}
