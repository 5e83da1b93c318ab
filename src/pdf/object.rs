//! In-memory PDF object model.
//!
//! PDF Spec: Section 7.3 - Objects

use super::error::{PdfError, PdfResult};
use bytes::Bytes;
use std::collections::HashMap;

/// A PDF dictionary: name keys (without the leading slash) to objects.
pub type Dictionary = HashMap<String, Object>;

/// A PDF object.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// `null`
    Null,
    /// `true` / `false`
    Boolean(bool),
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// Literal or hexadecimal string, stored as raw bytes
    String(Vec<u8>),
    /// Name, stored without the leading `/`
    Name(String),
    /// Array
    Array(Vec<Object>),
    /// Dictionary
    Dictionary(Dictionary),
    /// Stream: dictionary plus the (still encoded) payload
    Stream {
        /// Stream dictionary
        dict: Dictionary,
        /// Encoded stream bytes as stored in the file
        data: Bytes,
    },
    /// Indirect reference `id gen R`
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Human readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Shorthand for a name object.
    pub fn name(name: &str) -> Self {
        Object::Name(name.to_string())
    }

    /// Integer value, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an integer or real.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Name value, if this is a name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(n) => Some(n),
            _ => None,
        }
    }

    /// String bytes, if this is a string.
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Dictionary of a dictionary or stream object.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Mutable dictionary of a dictionary or stream object.
    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Array elements, if this is an array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Reference target, if this is an indirect reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Dictionary or a typed error.
    pub fn expect_dict(&self) -> PdfResult<&Dictionary> {
        self.as_dict().ok_or(PdfError::InvalidObjectType {
            expected: "Dictionary",
            found: self.type_name(),
        })
    }

    /// `/Type` of a dictionary or stream, if present.
    pub fn dict_type(&self) -> Option<&str> {
        self.as_dict()
            .and_then(|d| d.get("Type"))
            .and_then(Object::as_name)
    }
}

impl From<ObjectRef> for Object {
    fn from(r: ObjectRef) -> Self {
        Object::Reference(r)
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Object::Integer(i)
    }
}

impl From<f64> for Object {
    fn from(r: f64) -> Self {
        Object::Real(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_coercion() {
        assert_eq!(Object::Integer(3).as_number(), Some(3.0));
        assert_eq!(Object::Real(1.5).as_number(), Some(1.5));
        assert_eq!(Object::Null.as_number(), None);
    }

    #[test]
    fn test_stream_exposes_dict() {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("XObject"));
        let stream = Object::Stream {
            dict,
            data: Bytes::from_static(b"abc"),
        };
        assert_eq!(stream.dict_type(), Some("XObject"));
        assert!(stream.expect_dict().is_ok());
    }

    #[test]
    fn test_expect_dict_reports_type() {
        let err = Object::Integer(1).expect_dict().unwrap_err();
        assert!(err.to_string().contains("Integer"));
    }
}
