//! Fatal harness errors
//!
//! Operation-level failures are never errors here: an operation that fails
//! against the engine reports `error: ...` as its output line. `MetaError`
//! covers what aborts a run: generator invariant violations, malformed
//! traces, missing runtime resources and setup failures.

use std::io;
use thiserror::Error;

use crate::operands::OperandType;

/// Result type alias for harness operations
pub type MetaResult<T> = std::result::Result<T, MetaError>;

/// Harness error taxonomy
#[derive(Debug, Error)]
pub enum MetaError {
    /// `get` on an operand domain with no live instances
    #[error("no live {0} operands")]
    EmptyDomain(OperandType),

    /// Token could not be parsed into an operand
    #[error("invalid {kind} token {token:?}: {reason}")]
    InvalidToken {
        /// Operand kind being parsed
        kind: &'static str,
        /// Offending token
        token: String,
        /// What was wrong with it
        reason: String,
    },

    /// Operation received the wrong number of arguments
    #[error("{op} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        /// Operation name
        op: &'static str,
        /// Operand count of the operation
        expected: usize,
        /// Arguments supplied
        actual: usize,
    },

    /// Trace line naming an operation that does not exist
    #[error("line {line}: unknown operation {name:?}")]
    UnknownOperation {
        /// 1-based line number
        line: usize,
        /// Operation name found
        name: String,
    },

    /// Trace line that could not be parsed or bound
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// Description of the failure
        message: String,
    },

    /// Operation referenced a resource that is not open at run time
    #[error("{kind} {id} is not open")]
    MissingResource {
        /// Resource kind
        kind: &'static str,
        /// Resource identifier
        id: String,
    },

    /// Configuration names an unknown engine profile or is otherwise invalid
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file failed to parse
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Engine failure outside of an operation (open, restart)
    #[error("storage error: {0}")]
    Storage(#[from] strata_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A parallel worker panicked while running a seed
    #[error("worker for seed {seed} panicked")]
    WorkerPanicked {
        /// Seed the worker was running
        seed: u64,
    },

    /// Report serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MetaError {
    /// Shorthand for a missing runtime resource
    pub(crate) fn missing(kind: &'static str, id: impl ToString) -> Self {
        MetaError::MissingResource {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for an unparseable token
    pub(crate) fn token(kind: &'static str, token: &str, reason: impl ToString) -> Self {
        MetaError::InvalidToken {
            kind,
            token: token.to_string(),
            reason: reason.to_string(),
        }
    }
}
