//! Error types for the storage layer
//!
//! Every failure a storage engine or an MVCC operation can report. Callers
//! that treat engine failures as data (the metamorphic runner records them as
//! `error: ...` output lines) rely on the `Display` text being stable for a
//! given failure. We use `thiserror` for automatic `Display` and `Error`
//! trait implementations.

use std::io;
use thiserror::Error;

use crate::timestamp::Timestamp;
use crate::txn::Intent;
use crate::value::Value;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error taxonomy
#[derive(Debug, Error)]
pub enum Error {
    /// A read or write ran into intents of other transactions
    #[error("conflicting intents on {}", format_intents(.0))]
    WriteIntent(Vec<Intent>),

    /// A write below an existing committed version
    #[error("write at timestamp {requested} too old; existing version at {existing}")]
    WriteTooOld {
        /// Timestamp of the rejected write
        requested: Timestamp,
        /// Timestamp of the newest existing version
        existing: Timestamp,
    },

    /// A conditional write found an unexpected value
    #[error("unexpected value: {}", format_actual(.actual))]
    ConditionFailed {
        /// Value actually present
        actual: Option<Value>,
    },

    /// Caller supplied an invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored data failed validation
    #[error("data corruption: {0}")]
    Corruption(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Handle used after close
    #[error("{0} is closed")]
    Closed(&'static str),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

fn format_intents(intents: &[Intent]) -> String {
    let parts: Vec<String> = intents.iter().map(|i| i.to_string()).collect();
    format!("[{}]", parts.join(" "))
}

fn format_actual(actual: &Option<Value>) -> String {
    match actual {
        Some(v) => v.to_string(),
        None => "<nil>".to_string(),
    }
}
