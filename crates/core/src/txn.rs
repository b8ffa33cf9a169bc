//! Transaction records and write intents
//!
//! A [`Transaction`] is the client-side view of a transaction: its
//! timestamps, sequence counter and the spans it has written. The storage
//! layer only ever sees the persisted subset, [`TxnMeta`], which is
//! embedded in each intent's metadata record.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::key::{Key, Span};
use crate::timestamp::Timestamp;

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Writes are provisional
    Pending,
    /// Writes are final and may be resolved
    Committed,
    /// Writes must be discarded
    Aborted,
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnStatus::Pending => "PENDING",
            TxnStatus::Committed => "COMMITTED",
            TxnStatus::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Persisted transaction metadata carried by intents
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnMeta {
    /// Transaction identifier
    pub id: Uuid,
    /// Anchor key of the transaction record
    pub key: Key,
    /// Timestamp at which the transaction writes
    pub write_timestamp: Timestamp,
    /// Sequence number of the latest write
    pub sequence: u32,
}

impl TxnMeta {
    /// Short identifier used in human-readable output
    pub fn short_id(&self) -> String {
        let simple = self.id.simple().to_string();
        simple[simple.len() - 8..].to_string()
    }
}

/// Client-side transaction state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Persisted metadata
    pub meta: TxnMeta,
    /// Human-readable name
    pub name: String,
    /// Timestamp at which the transaction reads
    pub read_timestamp: Timestamp,
    /// Current status
    pub status: TxnStatus,
    /// Spans written so far; resolved at commit
    pub lock_spans: Vec<Span>,
}

impl Transaction {
    /// Create a pending transaction reading and writing at `ts`
    pub fn new(name: impl Into<String>, id: Uuid, ts: Timestamp) -> Self {
        Transaction {
            meta: TxnMeta {
                id,
                key: Key::MIN,
                write_timestamp: ts,
                sequence: 0,
            },
            name: name.into(),
            read_timestamp: ts,
            status: TxnStatus::Pending,
            lock_spans: Vec::new(),
        }
    }

    /// Write timestamp
    pub fn write_timestamp(&self) -> Timestamp {
        self.meta.write_timestamp
    }

    /// Bump the sequence counter before a write
    pub fn step(&mut self) -> u32 {
        self.meta.sequence += 1;
        self.meta.sequence
    }

    /// Record a written span
    pub fn track_span(&mut self, span: Span) {
        self.lock_spans.push(span);
    }
}

/// Request to resolve the intents of a transaction over a span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockUpdate {
    /// Span whose intents are resolved
    pub span: Span,
    /// Owning transaction
    pub txn: TxnMeta,
    /// Final status
    pub status: TxnStatus,
}

impl LockUpdate {
    /// Build an update from the transaction's current status
    pub fn new(txn: &Transaction, span: Span) -> Self {
        LockUpdate {
            span,
            txn: txn.meta.clone(),
            status: txn.status,
        }
    }
}

/// A provisional write observed by a reader
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Intent {
    /// Key holding the intent
    pub key: Key,
    /// Owning transaction
    pub txn: TxnMeta,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} txn={} ts={}}}",
            self.key,
            self.txn.short_id(),
            self.txn.write_timestamp
        )
    }
}
