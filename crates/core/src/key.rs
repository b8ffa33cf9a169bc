//! Keys for the multi-version store
//!
//! Three key shapes are used throughout the system:
//! - [`Key`]: raw user key bytes
//! - [`MvccKey`]: user key plus version timestamp; the zero timestamp
//!   addresses the metadata record of the key
//! - [`Span`]: a single key or a half-open range `[key, end_key)`
//!
//! ## Ordering
//!
//! `MvccKey` sorts by user key ascending, then the metadata record first,
//! then versions newest-to-oldest. Iterating forward over a user key
//! therefore visits its intent metadata (if any) before its versions.
//!
//! ## Textual form
//!
//! Keys print in an escaped form that is safe inside a whitespace-separated
//! trace line: printable ASCII is kept as-is except `\`, `/`, `#`, `,`,
//! `[`, `]` and `:`, which (like every other byte) print as `\xNN`.
//! [`unescape_bytes`] is the exact inverse.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::timestamp::Timestamp;

/// Bytes that always print escaped
const RESERVED_BYTES: &[u8] = b"\\/#,[]:";

/// Escape raw bytes into their token form
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_graphic() && !RESERVED_BYTES.contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}

/// Inverse of [`escape_bytes`]
///
/// Rejects reserved or non-printable characters that appear unescaped.
pub fn unescape_bytes(s: &str) -> Result<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            if i + 4 > bytes.len() || bytes[i + 1] != b'x' {
                return Err(Error::InvalidArgument(format!(
                    "bad escape sequence in {:?}",
                    s
                )));
            }
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4])
                .map_err(|_| Error::InvalidArgument(format!("bad escape in {:?}", s)))?;
            let value = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::InvalidArgument(format!("bad escape in {:?}", s)))?;
            out.push(value);
            i += 4;
        } else if b.is_ascii_graphic() && !RESERVED_BYTES.contains(&b) {
            out.push(b);
            i += 1;
        } else {
            return Err(Error::InvalidArgument(format!(
                "unexpected character {:?} in {:?}",
                b as char, s
            )));
        }
    }
    Ok(out)
}

/// Raw user key
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// The empty key, smaller than every other key
    pub const MIN: Key = Key(Vec::new());

    /// Create a key from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty key
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Smallest key strictly greater than this one
    pub fn next(&self) -> Key {
        let mut bytes = self.0.clone();
        bytes.push(0);
        Key(bytes)
    }

    /// Consume into raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key(b.to_vec())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&escape_bytes(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        unescape_bytes(s).map(Key)
    }
}

/// User key plus version timestamp
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MvccKey {
    /// User key
    pub key: Key,
    /// Version timestamp; zero addresses the metadata record
    pub timestamp: Timestamp,
}

impl MvccKey {
    /// Create a versioned key
    pub fn new(key: Key, timestamp: Timestamp) -> Self {
        MvccKey { key, timestamp }
    }

    /// Key of the metadata record for `key`
    pub fn metadata(key: Key) -> Self {
        MvccKey {
            key,
            timestamp: Timestamp::ZERO,
        }
    }

    /// True when this addresses a data version (non-zero timestamp)
    pub fn is_value(&self) -> bool {
        !self.timestamp.is_zero()
    }

    /// Encoded size used for size accounting
    pub fn encoded_size(&self) -> usize {
        let ts_len = if self.timestamp.is_zero() {
            0
        } else if self.timestamp.logical() == 0 {
            8
        } else {
            12
        };
        self.key.len() + 1 + ts_len
    }
}

impl Ord for MvccKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| {
            match (self.timestamp.is_zero(), other.timestamp.is_zero()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                // Newer versions first
                (false, false) => other.timestamp.cmp(&self.timestamp),
            }
        })
    }
}

impl PartialOrd for MvccKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MvccKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.key, self.timestamp)
    }
}

impl fmt::Debug for MvccKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MvccKey({})", self)
    }
}

impl FromStr for MvccKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key, ts) = s
            .rsplit_once('/')
            .ok_or_else(|| Error::InvalidArgument(format!("missing timestamp in key {:?}", s)))?;
        Ok(MvccKey {
            key: key.parse()?,
            timestamp: ts.parse()?,
        })
    }
}

/// A single key or a half-open key range
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Start key (inclusive)
    pub key: Key,
    /// End key (exclusive); `None` for a single-key span
    pub end_key: Option<Key>,
}

impl Span {
    /// Span covering exactly one key
    pub fn point(key: Key) -> Self {
        Span { key, end_key: None }
    }

    /// Span covering `[key, end_key)`
    pub fn range(key: Key, end_key: Key) -> Self {
        Span {
            key,
            end_key: Some(end_key),
        }
    }

    /// True if `key` falls inside this span
    pub fn contains(&self, key: &Key) -> bool {
        match &self.end_key {
            None => &self.key == key,
            Some(end) => &self.key <= key && key < end,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.end_key {
            None => write!(f, "{}", self.key),
            Some(end) => write!(f, "[{}, {})", self.key, end),
        }
    }
}
