//! Core types for the Strata multi-version store
//!
//! This crate defines the foundational types shared by the storage layer
//! and the metamorphic test engine:
//! - Timestamp: hybrid-logical version timestamp
//! - Key / MvccKey / Span: user keys, versioned keys and key ranges
//! - Value: opaque value bytes with a stable storage encoding
//! - Transaction / TxnMeta / Intent / LockUpdate: transactional write records
//! - Error: storage error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod timestamp;
pub mod txn;
pub mod value;

pub use error::{Error, Result};
pub use key::{escape_bytes, unescape_bytes, Key, MvccKey, Span};
pub use timestamp::Timestamp;
pub use txn::{Intent, LockUpdate, Transaction, TxnMeta, TxnStatus};
pub use value::{Value, EMPTY_VALUE_TOKEN};
