//! Runnable operations
//!
//! Every operation is a small struct holding its bound operands. Running it
//! against a [`RunState`] yields exactly one line of output text. Failures
//! reported by the engine or the MVCC layer become `error: ...` output;
//! only harness invariant violations (a resource that should be open but is
//! not) surface as `Err`.

use std::fmt;
use std::path::Path;

use strata_core::{Key, LockUpdate, MvccKey, Span, Timestamp, Transaction, TxnStatus, Value};
use strata_storage::{
    mvcc_clear_time_range, mvcc_conditional_put, mvcc_delete, mvcc_delete_range,
    mvcc_find_split_key, mvcc_get, mvcc_init_put, mvcc_put, mvcc_resolve_write_intent, mvcc_scan,
    IterOptions, MvccGetOptions, MvccIterator, MvccScanOptions, ReadWriter, SstWriter, Writer,
};
use uuid::Uuid;

use crate::error::MetaResult;
use crate::ids::{BatchId, IteratorId, ReadWriterId, TxnId};
use crate::state::RunState;

/// Output of a successful write
pub const OK: &str = "ok";

/// Name of the scratch file built by `ingest`
pub const INGEST_FILE_NAME: &str = "ingest.sst";

/// Value stored under every ingested key
pub const INGESTED_VALUE: &[u8] = b"ingested";

/// An operation bound to its operands
pub trait MvccOp: fmt::Debug + Send {
    /// Execute against the run state and describe the outcome
    fn run(&self, state: &mut RunState) -> MetaResult<String>;
}

fn error_line(err: impl fmt::Display) -> String {
    format!("error: {}", err)
}

fn or_nil<T: fmt::Display>(value: Option<T>, nil: &str) -> String {
    value.map_or_else(|| nil.to_string(), |v| v.to_string())
}

fn iter_state(iter: &dyn MvccIterator) -> String {
    match iter.valid() {
        Ok(true) => match iter.key() {
            Some(key) => format!("key = {}", key),
            None => "valid = false".to_string(),
        },
        Ok(false) => "valid = false".to_string(),
        Err(e) => format!("valid = false, err = {}", e),
    }
}

/// Timestamp a read happens at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAt {
    /// Consistent read at the transaction's read timestamp
    Txn(TxnId),
    /// Inconsistent read at an explicit timestamp, skipping intents
    Inconsistent(Timestamp),
}

impl ReadAt {
    fn resolve(self, state: &RunState) -> MetaResult<(Timestamp, Option<&Transaction>)> {
        match self {
            ReadAt::Txn(id) => {
                let txn = state.txn(id)?;
                Ok((txn.read_timestamp, Some(txn)))
            }
            ReadAt::Inconsistent(ts) => Ok((ts, None)),
        }
    }

    fn is_inconsistent(self) -> bool {
        matches!(self, ReadAt::Inconsistent(_))
    }
}

/// Run a transactional write, tracking the keys it wrote as lock spans
fn run_txn_write<F>(state: &mut RunState, txn: TxnId, writer: ReadWriterId, write: F) -> MetaResult<String>
where
    F: FnOnce(&mut dyn ReadWriter, &Transaction) -> strata_core::Result<Vec<Key>>,
{
    let (txn, rw) = state.txn_and_writer(txn, writer)?;
    txn.step();
    Ok(match write(rw, txn) {
        Ok(keys) => {
            for key in keys {
                txn.track_span(Span::point(key));
            }
            OK.to_string()
        }
        Err(e) => error_line(e),
    })
}

// ============================================================================
// MVCC reads
// ============================================================================

/// Point read through a reader
#[derive(Debug, Clone)]
pub struct MvccGetOp {
    /// Reader
    pub reader: ReadWriterId,
    /// Key read
    pub key: Key,
    /// Read timestamp source
    pub read: ReadAt,
}

impl MvccOp for MvccGetOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let (ts, txn) = self.read.resolve(state)?;
        let reader = state.reader(self.reader)?;
        let opts = MvccGetOptions {
            inconsistent: self.read.is_inconsistent(),
            tombstones: true,
            txn,
        };
        Ok(match mvcc_get(reader, &self.key, ts, opts) {
            Ok(res) => format!(
                "val = {}, intent = {}",
                or_nil(res.value, "nil"),
                or_nil(res.intent, "false")
            ),
            Err(e) => error_line(e),
        })
    }
}

/// Range read against the base engine
#[derive(Debug, Clone)]
pub struct MvccScanOp {
    /// Start key, inclusive
    pub key: Key,
    /// End key, exclusive
    pub end_key: Key,
    /// Read timestamp source
    pub read: ReadAt,
    /// Descending order
    pub reverse: bool,
}

impl MvccOp for MvccScanOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let (ts, txn) = self.read.resolve(state)?;
        let reader = state.engine()?.as_reader();
        let opts = MvccScanOptions {
            inconsistent: self.read.is_inconsistent(),
            tombstones: true,
            reverse: self.reverse,
            txn,
        };
        Ok(match mvcc_scan(reader, &self.key, &self.end_key, ts, opts) {
            Ok(res) => {
                let kvs: Vec<String> = res.kvs.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
                let intents: Vec<String> = res.intents.iter().map(|i| i.to_string()).collect();
                format!("kvs = [{}], intents = [{}]", kvs.join(", "), intents.join(", "))
            }
            Err(e) => error_line(e),
        })
    }
}

/// Split key search against the base engine
#[derive(Debug, Clone)]
pub struct MvccFindSplitKeyOp {
    /// Start key
    pub key: Key,
    /// End key
    pub end_key: Key,
    /// Target size of the left side
    pub split_size: usize,
}

impl MvccOp for MvccFindSplitKeyOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let reader = state.engine()?.as_reader();
        Ok(
            match mvcc_find_split_key(reader, &self.key, &self.end_key, self.split_size) {
                Ok(split) => format!(
                    "ok, splitSize = {}, splitKey = {}",
                    self.split_size,
                    or_nil(split, "nil")
                ),
                Err(e) => error_line(e),
            },
        )
    }
}

// ============================================================================
// MVCC writes
// ============================================================================

/// Transactional put
#[derive(Debug, Clone)]
pub struct MvccPutOp {
    /// Writer
    pub writer: ReadWriterId,
    /// Key written
    pub key: Key,
    /// Value written
    pub value: Value,
    /// Owning transaction
    pub txn: TxnId,
}

impl MvccOp for MvccPutOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        run_txn_write(state, self.txn, self.writer, |rw, txn| {
            mvcc_put(rw, &self.key, txn.write_timestamp(), &self.value, Some(txn))
                .map(|()| vec![self.key.clone()])
        })
    }
}

/// Transactional conditional put
#[derive(Debug, Clone)]
pub struct MvccConditionalPutOp {
    /// Writer
    pub writer: ReadWriterId,
    /// Key written
    pub key: Key,
    /// Value written
    pub value: Value,
    /// Value that must currently be present
    pub expected: Value,
    /// Owning transaction
    pub txn: TxnId,
}

impl MvccOp for MvccConditionalPutOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        run_txn_write(state, self.txn, self.writer, |rw, txn| {
            mvcc_conditional_put(
                rw,
                &self.key,
                txn.write_timestamp(),
                &self.value,
                Some(&self.expected),
                true,
                Some(txn),
            )
            .map(|()| vec![self.key.clone()])
        })
    }
}

/// Transactional initializing put
#[derive(Debug, Clone)]
pub struct MvccInitPutOp {
    /// Writer
    pub writer: ReadWriterId,
    /// Key written
    pub key: Key,
    /// Value written
    pub value: Value,
    /// Owning transaction
    pub txn: TxnId,
}

impl MvccOp for MvccInitPutOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        run_txn_write(state, self.txn, self.writer, |rw, txn| {
            mvcc_init_put(rw, &self.key, txn.write_timestamp(), &self.value, false, Some(txn))
                .map(|()| vec![self.key.clone()])
        })
    }
}

/// Transactional delete
#[derive(Debug, Clone)]
pub struct MvccDeleteOp {
    /// Writer
    pub writer: ReadWriterId,
    /// Key deleted
    pub key: Key,
    /// Owning transaction
    pub txn: TxnId,
}

impl MvccOp for MvccDeleteOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        run_txn_write(state, self.txn, self.writer, |rw, txn| {
            mvcc_delete(rw, &self.key, txn.write_timestamp(), Some(txn)).map(|()| vec![self.key.clone()])
        })
    }
}

/// Transactional range delete
#[derive(Debug, Clone)]
pub struct MvccDeleteRangeOp {
    /// Writer
    pub writer: ReadWriterId,
    /// Start key
    pub key: Key,
    /// End key
    pub end_key: Key,
    /// Owning transaction
    pub txn: TxnId,
}

impl MvccOp for MvccDeleteRangeOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        run_txn_write(state, self.txn, self.writer, |rw, txn| {
            mvcc_delete_range(rw, &self.key, &self.end_key, 0, txn.write_timestamp(), Some(txn))
        })
    }
}

/// Non-transactional removal of versions in a time window
#[derive(Debug, Clone)]
pub struct MvccClearTimeRangeOp {
    /// Writer
    pub writer: ReadWriterId,
    /// Start key
    pub key: Key,
    /// End key
    pub end_key: Key,
    /// Exclusive lower time bound
    pub start_time: Timestamp,
    /// Inclusive upper time bound
    pub end_time: Timestamp,
}

impl MvccOp for MvccClearTimeRangeOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let rw = state.read_writer(self.writer)?;
        Ok(
            match mvcc_clear_time_range(rw, &self.key, &self.end_key, self.start_time, self.end_time, 0) {
                Ok(resume) => format!("ok, resume = {}", or_nil(resume, "nil")),
                Err(e) => error_line(e),
            },
        )
    }
}

// ============================================================================
// Transactions and batches
// ============================================================================

/// Start a transaction
#[derive(Debug, Clone)]
pub struct TxnOpenOp {
    /// Transaction id
    pub id: TxnId,
    /// Read and write timestamp
    pub ts: Timestamp,
}

impl MvccOp for TxnOpenOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let txn = Transaction::new(self.id.to_string(), Uuid::from_u128(u128::from(self.id.0)), self.ts);
        let name = txn.name.clone();
        state.insert_txn(self.id, txn);
        Ok(name)
    }
}

/// Commit a transaction and resolve its intents on the engine
#[derive(Debug, Clone)]
pub struct TxnCommitOp {
    /// Transaction id
    pub id: TxnId,
}

impl MvccOp for TxnCommitOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let mut txn = state.remove_txn(self.id)?;
        txn.status = TxnStatus::Committed;
        let engine = state.engine_mut()?;
        for span in &txn.lock_spans {
            let update = LockUpdate::new(&txn, span.clone());
            if let Err(e) = mvcc_resolve_write_intent(engine.as_read_writer(), &update) {
                return Ok(error_line(e));
            }
        }
        Ok(OK.to_string())
    }
}

/// Open a batch over the engine
#[derive(Debug, Clone)]
pub struct BatchOpenOp {
    /// Batch id
    pub id: BatchId,
}

impl MvccOp for BatchOpenOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        state.open_batch(self.id)?;
        Ok(self.id.to_string())
    }
}

/// Commit and close a batch; a no-op for the engine
#[derive(Debug, Clone)]
pub struct BatchCommitOp {
    /// Batch to commit
    pub id: ReadWriterId,
}

impl MvccOp for BatchCommitOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let id = match self.id {
            ReadWriterId::Engine => return Ok("noop".to_string()),
            ReadWriterId::Batch(id) => id,
        };
        let mut batch = state.remove_batch(id)?;
        let result = batch.commit(false);
        batch.close();
        Ok(match result {
            Ok(()) => OK.to_string(),
            Err(e) => error_line(e),
        })
    }
}

// ============================================================================
// Iterators
// ============================================================================

/// Open a bounded iterator over a reader
#[derive(Debug, Clone)]
pub struct IterOpenOp {
    /// Reader iterated
    pub reader: ReadWriterId,
    /// Lower bound, inclusive
    pub key: Key,
    /// Last user key included
    pub end_key: Key,
    /// Iterator id
    pub id: IteratorId,
}

impl MvccOp for IterOpenOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let reader = state.reader(self.reader)?;
        let opts = IterOptions::new(self.key.clone(), self.end_key.next());
        let mut iter = match reader.new_iterator(opts) {
            Ok(iter) => iter,
            Err(e) => return Ok(error_line(e)),
        };
        // Batch iterators start positioned at the lower bound
        if self.reader != ReadWriterId::Engine {
            iter.seek_ge(&MvccKey::metadata(self.key.clone()));
        }
        state.insert_iter(self.id, iter);
        Ok(self.id.to_string())
    }
}

/// Close an iterator
#[derive(Debug, Clone)]
pub struct IterCloseOp {
    /// Iterator id
    pub id: IteratorId,
}

impl MvccOp for IterCloseOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        state.remove_iter(self.id)?.close();
        Ok(OK.to_string())
    }
}

/// Seek direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    /// First entry at or after the key
    Ge,
    /// Last entry before the key
    Lt,
}

/// Reposition an iterator
#[derive(Debug, Clone)]
pub struct IterSeekOp {
    /// Iterator id
    pub iter: IteratorId,
    /// Seek target
    pub key: MvccKey,
    /// Direction
    pub direction: SeekDirection,
}

impl MvccOp for IterSeekOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let iter = state.iter_mut(self.iter)?;
        match self.direction {
            SeekDirection::Ge => iter.seek_ge(&self.key),
            SeekDirection::Lt => iter.seek_lt(&self.key),
        }
        Ok(iter_state(iter))
    }
}

/// Step an iterator forward
///
/// Both `iterator_next` and `iterator_nextkey` bind to this step. An
/// invalid iterator reports its state without moving.
#[derive(Debug, Clone)]
pub struct IterNextOp {
    /// Iterator id
    pub iter: IteratorId,
}

impl MvccOp for IterNextOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let iter = state.iter_mut(self.iter)?;
        if let Ok(true) = iter.valid() {
            iter.next();
        }
        Ok(iter_state(iter))
    }
}

/// Step an iterator backward; an invalid iterator does not move
#[derive(Debug, Clone)]
pub struct IterPrevOp {
    /// Iterator id
    pub iter: IteratorId,
}

impl MvccOp for IterPrevOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let iter = state.iter_mut(self.iter)?;
        if let Ok(true) = iter.valid() {
            iter.prev();
        }
        Ok(iter_state(iter))
    }
}

// ============================================================================
// Engine-level operations
// ============================================================================

/// Raw, non-transactional clear of `[key, end_key)` on the engine
#[derive(Debug, Clone)]
pub struct ClearRangeOp {
    /// Start key
    pub key: Key,
    /// End key
    pub end_key: Key,
}

impl MvccOp for ClearRangeOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let engine = state.engine_mut()?;
        let start = MvccKey::metadata(self.key.clone());
        let end = MvccKey::metadata(self.end_key.clone());
        Ok(match engine.clear_range_raw(&start, &end) {
            Ok(()) => OK.to_string(),
            Err(e) => error_line(e),
        })
    }
}

/// Engine range compaction
#[derive(Debug, Clone)]
pub struct CompactOp {
    /// Start key
    pub key: Key,
    /// End key
    pub end_key: Key,
}

impl MvccOp for CompactOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        Ok(match state.engine_mut()?.compact_range(&self.key, &self.end_key) {
            Ok(()) => OK.to_string(),
            Err(e) => error_line(e),
        })
    }
}

/// Build a sorted file from versioned keys and ingest it
#[derive(Debug, Clone)]
pub struct IngestOp {
    /// Keys, sorted and distinct, none at the zero timestamp
    pub keys: Vec<MvccKey>,
}

impl IngestOp {
    fn build(&self, path: &Path) -> strata_core::Result<()> {
        let value = Value::from_bytes(INGESTED_VALUE).encode();
        let mut writer = SstWriter::for_ingestion(path)?;
        for key in &self.keys {
            writer.put(key, &value)?;
        }
        writer.finish()?;
        Ok(())
    }
}

impl MvccOp for IngestOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        let path = state.dir().join(INGEST_FILE_NAME);
        if let Err(e) = self.build(&path) {
            return Ok(error_line(e));
        }
        Ok(match state.engine_mut()?.ingest_external_files(&[path]) {
            Ok(()) => OK.to_string(),
            Err(e) => error_line(e),
        })
    }
}

/// Restart onto the next engine of the sequence, if restarts are enabled
#[derive(Debug, Clone)]
pub struct RestartOp;

impl MvccOp for RestartOp {
    fn run(&self, state: &mut RunState) -> MetaResult<String> {
        if !state.restarts() {
            state.comment("no-op due to restarts being disabled");
            return Ok(OK.to_string());
        }
        let (old, new) = state.restart()?;
        state.comment(format!("restarting: {} -> {}", old, new));
        Ok(OK.to_string())
    }
}
