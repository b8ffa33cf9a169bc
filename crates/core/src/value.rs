//! Versioned values
//!
//! A [`Value`] is an opaque byte string. Deletion is not a value: the
//! storage layer records a tombstone as an empty encoded record, so an
//! empty `Value` is still a live value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::key::{escape_bytes, unescape_bytes};

/// Tag byte prefixed to every encoded live value
const VALUE_TAG: u8 = 0x01;

/// Token of the empty value; brackets are always escaped in other values
pub const EMPTY_VALUE_TOKEN: &str = "[]";

/// Opaque value bytes
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(Vec<u8>);

impl Value {
    /// Create a value from raw bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Value(bytes.into())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encode for storage
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() + 1);
        out.push(VALUE_TAG);
        out.extend_from_slice(&self.0);
        out
    }

    /// Decode a stored record
    ///
    /// Returns `Ok(None)` for a tombstone (empty record).
    pub fn decode(raw: &[u8]) -> Result<Option<Value>> {
        match raw.split_first() {
            None => Ok(None),
            Some((&VALUE_TAG, rest)) => Ok(Some(Value(rest.to_vec()))),
            Some((tag, _)) => Err(Error::Corruption(format!(
                "unknown value tag {:#04x}",
                tag
            ))),
        }
    }

    /// Encoded tombstone record
    pub fn tombstone() -> Vec<u8> {
        Vec::new()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str(EMPTY_VALUE_TOKEN)
        } else {
            f.write_str(&escape_bytes(&self.0))
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self)
    }
}

impl FromStr for Value {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            EMPTY_VALUE_TOKEN => Ok(Value::default()),
            "" => Err(Error::InvalidArgument(
                "empty value token; the empty value is written []".to_string(),
            )),
            _ => unescape_bytes(s).map(Value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let v = Value::from_bytes(b"hello".to_vec());
        let decoded = Value::decode(&v.encode()).unwrap();
        assert_eq!(decoded, Some(v));
    }

    #[test]
    fn test_empty_value_is_not_tombstone() {
        let v = Value::from_bytes(Vec::new());
        assert_eq!(Value::decode(&v.encode()).unwrap(), Some(v));
        assert_eq!(Value::decode(&Value::tombstone()).unwrap(), None);
    }

    #[test]
    fn test_decode_unknown_tag() {
        let err = Value::decode(&[0x7f, 1, 2]).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_empty_value_has_visible_token() {
        let empty = Value::default();
        assert_eq!(empty.to_string(), "[]");
        assert_eq!("[]".parse::<Value>().unwrap(), empty);
        assert!("".parse::<Value>().is_err());
        assert_eq!(Value::from_bytes(b"[]".to_vec()).to_string(), "\\x5b\\x5d");
    }

    #[test]
    fn test_display_parse() {
        let v: Value = "abc123".parse().unwrap();
        assert_eq!(v.as_bytes(), b"abc123");
        assert_eq!(v.to_string(), "abc123");
    }
}
