//! Resource identifiers
//!
//! Transactions, batches and iterators are referred to by short textual
//! tokens in traces (`t3`, `batch2`, `iter7`, `engine`). These newtypes keep
//! the kinds apart in code and own the token encoding in both directions.

use std::fmt;
use std::str::FromStr;

use crate::error::{MetaError, MetaResult};

fn parse_numbered(kind: &'static str, prefix: &str, token: &str) -> MetaResult<u64> {
    let digits = token
        .strip_prefix(prefix)
        .ok_or_else(|| MetaError::token(kind, token, format!("expected prefix {:?}", prefix)))?;
    digits
        .parse::<u64>()
        .map_err(|e| MetaError::token(kind, token, e))
}

/// Transaction identifier, `t<N>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl FromStr for TxnId {
    type Err = MetaError;

    fn from_str(s: &str) -> MetaResult<Self> {
        parse_numbered("transaction", "t", s).map(TxnId)
    }
}

/// Batch identifier, `batch<N>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch{}", self.0)
    }
}

/// Reader/writer identifier: the base engine or an open batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadWriterId {
    /// The base engine; always open
    Engine,
    /// A batch over the engine
    Batch(BatchId),
}

impl ReadWriterId {
    /// Batch id, if this is a batch
    pub fn batch(&self) -> Option<BatchId> {
        match self {
            ReadWriterId::Engine => None,
            ReadWriterId::Batch(id) => Some(*id),
        }
    }
}

impl fmt::Display for ReadWriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadWriterId::Engine => f.write_str("engine"),
            ReadWriterId::Batch(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for ReadWriterId {
    type Err = MetaError;

    fn from_str(s: &str) -> MetaResult<Self> {
        if s == "engine" {
            return Ok(ReadWriterId::Engine);
        }
        parse_numbered("read/writer", "batch", s).map(|n| ReadWriterId::Batch(BatchId(n)))
    }
}

/// Iterator identifier, `iter<N>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IteratorId(pub u64);

impl fmt::Display for IteratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iter{}", self.0)
    }
}

impl FromStr for IteratorId {
    type Err = MetaError;

    fn from_str(s: &str) -> MetaResult<Self> {
        parse_numbered("iterator", "iter", s).map(IteratorId)
    }
}
