//! Operation catalog
//!
//! One [`OpGenerator`] descriptor per operation kind: its name in traces,
//! operand list, deck weight, whether it opens a resource, an optional
//! dependency function, and a constructor binding textual operands to a
//! runnable [`MvccOp`].
//!
//! Constructors run during generation *and* replay, in the same order, and
//! are the only place operand generators' live sets change. That is what
//! keeps the two modes in lockstep.

use std::fmt;

use strata_core::{Key, MvccKey};

use crate::error::{MetaError, MetaResult};
use crate::ids::ReadWriterId;
use crate::operands::{Generators, OperandType};
use crate::operations::{
    BatchCommitOp, BatchOpenOp, ClearRangeOp, CompactOp, IngestOp, IterCloseOp, IterNextOp,
    IterOpenOp, IterPrevOp, IterSeekOp, MvccClearTimeRangeOp, MvccConditionalPutOp,
    MvccDeleteOp, MvccDeleteRangeOp, MvccFindSplitKeyOp, MvccGetOp, MvccInitPutOp, MvccOp,
    MvccPutOp, MvccScanOp, ReadAt, RestartOp, SeekDirection, TxnCommitOp, TxnOpenOp,
};

use crate::operands::OperandType::{
    Iterator as Iter, Key as K, NextTs, PastTs, ReadWriter as Rw, Transaction as Txn, Value as V,
};

/// Target size used by `mvcc_find_split_key`
pub const SPLIT_SIZE: usize = 1024;

/// Constructor binding operand tokens to an operation
pub type GenerateFn = fn(&mut Generators, &[String]) -> MetaResult<Box<dyn MvccOp>>;

/// Operations that must run before the given one
pub type DependentOpsFn = fn(&Generators, &[String]) -> MetaResult<Vec<OpReference>>;

/// Descriptor of one operation kind
pub struct OpGenerator {
    /// Name used in traces
    pub name: &'static str,
    /// Constructor
    pub generate: GenerateFn,
    /// Prerequisite operations, if any
    pub dependent_ops: Option<DependentOpsFn>,
    /// Operand categories, in argument order
    pub operands: &'static [OperandType],
    /// Deck weight
    pub weight: u32,
    /// Whether the last operand is minted fresh
    pub is_opener: bool,
}

impl OpGenerator {
    /// Bind operands, checking their count
    pub fn construct(&self, gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
        if args.len() != self.operands.len() {
            return Err(MetaError::ArgumentCount {
                op: self.name,
                expected: self.operands.len(),
                actual: args.len(),
            });
        }
        (self.generate)(gens, args)
    }

    /// Prerequisites of this operation with the given operands
    pub fn dependencies(&self, gens: &Generators, args: &[String]) -> MetaResult<Vec<OpReference>> {
        match self.dependent_ops {
            Some(deps) => deps(gens, args),
            None => Ok(Vec::new()),
        }
    }
}

impl fmt::Debug for OpGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpGenerator")
            .field("name", &self.name)
            .field("operands", &self.operands)
            .field("weight", &self.weight)
            .field("is_opener", &self.is_opener)
            .finish()
    }
}

/// An operation kind with operands, fixed or still to be resolved
#[derive(Debug, Clone)]
pub struct OpReference {
    /// Operation kind
    pub generator: &'static OpGenerator,
    /// Operands; empty means resolve them from the generators
    pub args: Vec<String>,
}

impl OpReference {
    /// Reference whose operands are resolved at generation time
    pub fn unresolved(generator: &'static OpGenerator) -> Self {
        OpReference {
            generator,
            args: Vec::new(),
        }
    }

    /// Reference with fixed operands
    pub fn with_args(generator: &'static OpGenerator, args: Vec<String>) -> Self {
        OpReference { generator, args }
    }
}

/// Look up an operation kind by name
pub fn op_generator(name: &str) -> Option<&'static OpGenerator> {
    OP_GENERATORS.iter().copied().find(|g| g.name == name)
}

// ============================================================================
// Operand helpers
// ============================================================================

fn user_key(gens: &Generators, token: &str) -> MetaResult<Key> {
    Ok(gens.keys.parse(token)?.key)
}

/// Two user keys, swapped into ascending order
fn key_range(gens: &Generators, start: &str, end: &str) -> MetaResult<(Key, Key)> {
    let key = user_key(gens, start)?;
    let end_key = user_key(gens, end)?;
    Ok(if end_key < key { (end_key, key) } else { (key, end_key) })
}

fn read_writer(gens: &Generators, token: &str) -> MetaResult<ReadWriterId> {
    gens.read_writers.parse(token)
}

// ============================================================================
// Dependencies
// ============================================================================

/// Close every iterator open on the batch named by the first operand
fn close_iters_on_batch(gens: &Generators, args: &[String]) -> MetaResult<Vec<OpReference>> {
    let reader = read_writer(gens, &args[0])?;
    if reader == ReadWriterId::Engine {
        return Ok(Vec::new());
    }
    Ok(gens
        .iterators
        .iters_on(reader)
        .into_iter()
        .map(|iter| OpReference::with_args(&ITERATOR_CLOSE, vec![iter.to_string()]))
        .collect())
}

/// Commit every batch holding writes of the transaction being committed
fn commit_batches_for_txn(gens: &Generators, args: &[String]) -> MetaResult<Vec<OpReference>> {
    let txn = gens.txns.parse(&args[0])?;
    Ok(gens
        .txns
        .batches_for(txn)
        .into_iter()
        .map(|batch| OpReference::with_args(&BATCH_COMMIT, vec![ReadWriterId::Batch(batch).to_string()]))
        .collect())
}

// ============================================================================
// Constructors
// ============================================================================

fn gen_inconsistent_get(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    Ok(Box::new(MvccGetOp {
        reader: read_writer(gens, &args[0])?,
        key: user_key(gens, &args[1])?,
        read: ReadAt::Inconsistent(gens.past_ts.parse(&args[2])?),
    }))
}

fn gen_get(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    Ok(Box::new(MvccGetOp {
        reader: read_writer(gens, &args[0])?,
        key: user_key(gens, &args[1])?,
        read: ReadAt::Txn(gens.txns.parse(&args[2])?),
    }))
}

fn gen_put(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let writer = read_writer(gens, &args[0])?;
    let txn = gens.txns.parse(&args[3])?;
    gens.txns.track_write_on_batch(writer, txn);
    Ok(Box::new(MvccPutOp {
        writer,
        key: user_key(gens, &args[1])?,
        value: gens.values.parse(&args[2])?,
        txn,
    }))
}

fn gen_conditional_put(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let writer = read_writer(gens, &args[0])?;
    let txn = gens.txns.parse(&args[4])?;
    gens.txns.track_write_on_batch(writer, txn);
    Ok(Box::new(MvccConditionalPutOp {
        writer,
        key: user_key(gens, &args[1])?,
        value: gens.values.parse(&args[2])?,
        expected: gens.values.parse(&args[3])?,
        txn,
    }))
}

fn gen_init_put(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let writer = read_writer(gens, &args[0])?;
    let txn = gens.txns.parse(&args[3])?;
    gens.txns.track_write_on_batch(writer, txn);
    Ok(Box::new(MvccInitPutOp {
        writer,
        key: user_key(gens, &args[1])?,
        value: gens.values.parse(&args[2])?,
        txn,
    }))
}

fn gen_delete_range(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let writer = read_writer(gens, &args[0])?;
    let (key, end_key) = key_range(gens, &args[1], &args[2])?;
    let txn = gens.txns.parse(&args[3])?;
    gens.txns.track_write_on_batch(writer, txn);
    Ok(Box::new(MvccDeleteRangeOp {
        writer,
        key,
        end_key,
        txn,
    }))
}

fn gen_clear_time_range(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let writer = read_writer(gens, &args[0])?;
    let (key, end_key) = key_range(gens, &args[1], &args[2])?;
    let a = gens.past_ts.parse(&args[3])?;
    let b = gens.past_ts.parse(&args[4])?;
    let (start_time, end_time) = if b < a { (b, a) } else { (a, b) };
    Ok(Box::new(MvccClearTimeRangeOp {
        writer,
        key,
        end_key,
        start_time,
        end_time,
    }))
}

fn gen_delete(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let writer = read_writer(gens, &args[0])?;
    let txn = gens.txns.parse(&args[2])?;
    gens.txns.track_write_on_batch(writer, txn);
    Ok(Box::new(MvccDeleteOp {
        writer,
        key: user_key(gens, &args[1])?,
        txn,
    }))
}

fn gen_find_split_key(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    Ok(Box::new(MvccFindSplitKeyOp {
        key: user_key(gens, &args[0])?,
        end_key: user_key(gens, &args[1])?,
        split_size: SPLIT_SIZE,
    }))
}

fn scan(gens: &Generators, args: &[String], reverse: bool, inconsistent: bool) -> MetaResult<Box<dyn MvccOp>> {
    let (key, end_key) = key_range(gens, &args[0], &args[1])?;
    let read = if inconsistent {
        ReadAt::Inconsistent(gens.past_ts.parse(&args[2])?)
    } else {
        ReadAt::Txn(gens.txns.parse(&args[2])?)
    };
    Ok(Box::new(MvccScanOp {
        key,
        end_key,
        read,
        reverse,
    }))
}

fn gen_scan(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    scan(gens, args, false, false)
}

fn gen_inconsistent_scan(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    scan(gens, args, false, true)
}

fn gen_reverse_scan(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    scan(gens, args, true, false)
}

fn gen_txn_open(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let ts = gens.next_ts.parse(&args[0])?;
    let id = gens.txns.parse(&args[1])?;
    gens.txns.open(id);
    Ok(Box::new(TxnOpenOp { id, ts }))
}

fn gen_txn_commit(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let id = gens.txns.parse(&args[0])?;
    gens.txns.close(id);
    Ok(Box::new(TxnCommitOp { id }))
}

fn gen_batch_open(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let id = read_writer(gens, &args[0])?
        .batch()
        .ok_or_else(|| MetaError::token("batch", &args[0], "the engine cannot be opened as a batch"))?;
    gens.read_writers.open(id);
    Ok(Box::new(BatchOpenOp { id }))
}

fn gen_batch_commit(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let id = read_writer(gens, &args[0])?;
    if let Some(batch) = id.batch() {
        gens.close_batch(batch);
    }
    Ok(Box::new(BatchCommitOp { id }))
}

fn gen_iterator_open(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let reader = read_writer(gens, &args[0])?;
    let a = gens.keys.parse(&args[1])?;
    let b = gens.keys.parse(&args[2])?;
    let (key, end_key) = if b < a { (b.key, a.key) } else { (a.key, b.key) };
    let id = gens.iterators.parse(&args[3])?;
    gens.iterators.open(reader, id);
    Ok(Box::new(IterOpenOp {
        reader,
        key,
        end_key,
        id,
    }))
}

fn gen_iterator_close(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let id = gens.iterators.parse(&args[0])?;
    gens.iterators.close(id);
    Ok(Box::new(IterCloseOp { id }))
}

fn seek(gens: &Generators, args: &[String], direction: SeekDirection) -> MetaResult<Box<dyn MvccOp>> {
    Ok(Box::new(IterSeekOp {
        iter: gens.iterators.parse(&args[0])?,
        key: gens.keys.parse(&args[1])?,
        direction,
    }))
}

fn gen_iterator_seekge(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    seek(gens, args, SeekDirection::Ge)
}

fn gen_iterator_seeklt(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    seek(gens, args, SeekDirection::Lt)
}

// `iterator_next` and `iterator_nextkey` bind to the same step
fn gen_iterator_next(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    Ok(Box::new(IterNextOp {
        iter: gens.iterators.parse(&args[0])?,
    }))
}

fn gen_iterator_prev(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    Ok(Box::new(IterPrevOp {
        iter: gens.iterators.parse(&args[0])?,
    }))
}

fn gen_delete_range_raw(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let (key, mut end_key) = key_range(gens, &args[0], &args[1])?;
    // An empty range clears the single key
    if key == end_key {
        end_key = key.next();
    }
    Ok(Box::new(ClearRangeOp { key, end_key }))
}

fn gen_compact(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let (key, end_key) = key_range(gens, &args[0], &args[1])?;
    Ok(Box::new(CompactOp { key, end_key }))
}

fn gen_ingest(gens: &mut Generators, args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    let mut keys = args
        .iter()
        .map(|arg| {
            let mut key: MvccKey = gens.keys.parse(arg)?;
            // The zero timestamp is reserved for metadata records
            if key.timestamp.is_zero() {
                key.timestamp = key.timestamp.next();
            }
            Ok(key)
        })
        .collect::<MetaResult<Vec<_>>>()?;
    keys.sort();
    keys.dedup();
    Ok(Box::new(IngestOp { keys }))
}

fn gen_restart(gens: &mut Generators, _args: &[String]) -> MetaResult<Box<dyn MvccOp>> {
    if gens.restarts() {
        gens.close_all();
    }
    Ok(Box::new(RestartOp))
}

// ============================================================================
// Catalog
// ============================================================================

/// `mvcc_inconsistent_get rw key pastTS`
pub static MVCC_INCONSISTENT_GET: OpGenerator = OpGenerator {
    name: "mvcc_inconsistent_get",
    generate: gen_inconsistent_get,
    dependent_ops: None,
    operands: &[Rw, K, PastTs],
    weight: 100,
    is_opener: false,
};

/// `mvcc_get rw key txn`
pub static MVCC_GET: OpGenerator = OpGenerator {
    name: "mvcc_get",
    generate: gen_get,
    dependent_ops: None,
    operands: &[Rw, K, Txn],
    weight: 100,
    is_opener: false,
};

/// `mvcc_put rw key value txn`
pub static MVCC_PUT: OpGenerator = OpGenerator {
    name: "mvcc_put",
    generate: gen_put,
    dependent_ops: None,
    operands: &[Rw, K, V, Txn],
    weight: 500,
    is_opener: false,
};

/// `mvcc_conditional_put rw key value expected txn`
pub static MVCC_CONDITIONAL_PUT: OpGenerator = OpGenerator {
    name: "mvcc_conditional_put",
    generate: gen_conditional_put,
    dependent_ops: None,
    operands: &[Rw, K, V, V, Txn],
    weight: 50,
    is_opener: false,
};

/// `mvcc_init_put rw key value txn`
pub static MVCC_INIT_PUT: OpGenerator = OpGenerator {
    name: "mvcc_init_put",
    generate: gen_init_put,
    dependent_ops: None,
    operands: &[Rw, K, V, Txn],
    weight: 50,
    is_opener: false,
};

/// `mvcc_delete_range rw key endKey txn`
pub static MVCC_DELETE_RANGE: OpGenerator = OpGenerator {
    name: "mvcc_delete_range",
    generate: gen_delete_range,
    dependent_ops: Some(close_iters_on_batch),
    operands: &[Rw, K, K, Txn],
    weight: 20,
    is_opener: false,
};

/// `mvcc_clear_time_range rw key endKey startTS endTS`
pub static MVCC_CLEAR_TIME_RANGE: OpGenerator = OpGenerator {
    name: "mvcc_clear_time_range",
    generate: gen_clear_time_range,
    dependent_ops: Some(close_iters_on_batch),
    operands: &[Rw, K, K, PastTs, PastTs],
    weight: 20,
    is_opener: false,
};

/// `mvcc_delete rw key txn`
pub static MVCC_DELETE: OpGenerator = OpGenerator {
    name: "mvcc_delete",
    generate: gen_delete,
    dependent_ops: None,
    operands: &[Rw, K, Txn],
    weight: 100,
    is_opener: false,
};

/// `mvcc_find_split_key key endKey`
pub static MVCC_FIND_SPLIT_KEY: OpGenerator = OpGenerator {
    name: "mvcc_find_split_key",
    generate: gen_find_split_key,
    dependent_ops: None,
    operands: &[K, K],
    weight: 20,
    is_opener: false,
};

/// `mvcc_scan key endKey txn`
pub static MVCC_SCAN: OpGenerator = OpGenerator {
    name: "mvcc_scan",
    generate: gen_scan,
    dependent_ops: None,
    operands: &[K, K, Txn],
    weight: 100,
    is_opener: false,
};

/// `mvcc_inconsistent_scan key endKey pastTS`
pub static MVCC_INCONSISTENT_SCAN: OpGenerator = OpGenerator {
    name: "mvcc_inconsistent_scan",
    generate: gen_inconsistent_scan,
    dependent_ops: None,
    operands: &[K, K, PastTs],
    weight: 100,
    is_opener: false,
};

/// `mvcc_reverse_scan key endKey txn`
pub static MVCC_REVERSE_SCAN: OpGenerator = OpGenerator {
    name: "mvcc_reverse_scan",
    generate: gen_reverse_scan,
    dependent_ops: None,
    operands: &[K, K, Txn],
    weight: 100,
    is_opener: false,
};

/// `txn_open nextTS txn`
pub static TXN_OPEN: OpGenerator = OpGenerator {
    name: "txn_open",
    generate: gen_txn_open,
    dependent_ops: None,
    operands: &[NextTs, Txn],
    weight: 40,
    is_opener: true,
};

/// `txn_commit txn`
pub static TXN_COMMIT: OpGenerator = OpGenerator {
    name: "txn_commit",
    generate: gen_txn_commit,
    dependent_ops: Some(commit_batches_for_txn),
    operands: &[Txn],
    weight: 100,
    is_opener: false,
};

/// `batch_open batch`
pub static BATCH_OPEN: OpGenerator = OpGenerator {
    name: "batch_open",
    generate: gen_batch_open,
    dependent_ops: None,
    operands: &[Rw],
    weight: 40,
    is_opener: true,
};

/// `batch_commit rw`
pub static BATCH_COMMIT: OpGenerator = OpGenerator {
    name: "batch_commit",
    generate: gen_batch_commit,
    dependent_ops: Some(close_iters_on_batch),
    operands: &[Rw],
    weight: 100,
    is_opener: false,
};

/// `iterator_open rw key endKey iter`
pub static ITERATOR_OPEN: OpGenerator = OpGenerator {
    name: "iterator_open",
    generate: gen_iterator_open,
    dependent_ops: Some(close_iters_on_batch),
    operands: &[Rw, K, K, Iter],
    weight: 20,
    is_opener: true,
};

/// `iterator_close iter`
pub static ITERATOR_CLOSE: OpGenerator = OpGenerator {
    name: "iterator_close",
    generate: gen_iterator_close,
    dependent_ops: None,
    operands: &[Iter],
    weight: 50,
    is_opener: false,
};

/// `iterator_seekge iter key`
pub static ITERATOR_SEEKGE: OpGenerator = OpGenerator {
    name: "iterator_seekge",
    generate: gen_iterator_seekge,
    dependent_ops: None,
    operands: &[Iter, K],
    weight: 50,
    is_opener: false,
};

/// `iterator_seeklt iter key`
pub static ITERATOR_SEEKLT: OpGenerator = OpGenerator {
    name: "iterator_seeklt",
    generate: gen_iterator_seeklt,
    dependent_ops: None,
    operands: &[Iter, K],
    weight: 50,
    is_opener: false,
};

/// `iterator_next iter`
pub static ITERATOR_NEXT: OpGenerator = OpGenerator {
    name: "iterator_next",
    generate: gen_iterator_next,
    dependent_ops: None,
    operands: &[Iter],
    weight: 100,
    is_opener: false,
};

/// `iterator_nextkey iter`
pub static ITERATOR_NEXTKEY: OpGenerator = OpGenerator {
    name: "iterator_nextkey",
    generate: gen_iterator_next,
    dependent_ops: None,
    operands: &[Iter],
    weight: 100,
    is_opener: false,
};

/// `iterator_prev iter`
pub static ITERATOR_PREV: OpGenerator = OpGenerator {
    name: "iterator_prev",
    generate: gen_iterator_prev,
    dependent_ops: None,
    operands: &[Iter],
    weight: 100,
    is_opener: false,
};

/// `delete_range key endKey`: raw clear bypassing transactions
pub static DELETE_RANGE: OpGenerator = OpGenerator {
    name: "delete_range",
    generate: gen_delete_range_raw,
    dependent_ops: None,
    operands: &[K, K],
    weight: 20,
    is_opener: false,
};

/// `compact key endKey`
pub static COMPACT: OpGenerator = OpGenerator {
    name: "compact",
    generate: gen_compact,
    dependent_ops: None,
    operands: &[K, K],
    weight: 10,
    is_opener: false,
};

/// `ingest key key key key key`
pub static INGEST: OpGenerator = OpGenerator {
    name: "ingest",
    generate: gen_ingest,
    dependent_ops: None,
    operands: &[K, K, K, K, K],
    weight: 10,
    is_opener: false,
};

/// `restart`
pub static RESTART: OpGenerator = OpGenerator {
    name: "restart",
    generate: gen_restart,
    dependent_ops: None,
    operands: &[],
    weight: 4,
    is_opener: false,
};

/// Every operation kind, in deck order
pub static OP_GENERATORS: &[&OpGenerator] = &[
    &MVCC_INCONSISTENT_GET,
    &MVCC_GET,
    &MVCC_PUT,
    &MVCC_CONDITIONAL_PUT,
    &MVCC_INIT_PUT,
    &MVCC_DELETE_RANGE,
    &MVCC_CLEAR_TIME_RANGE,
    &MVCC_DELETE,
    &MVCC_FIND_SPLIT_KEY,
    &MVCC_SCAN,
    &MVCC_INCONSISTENT_SCAN,
    &MVCC_REVERSE_SCAN,
    &TXN_OPEN,
    &TXN_COMMIT,
    &BATCH_OPEN,
    &BATCH_COMMIT,
    &ITERATOR_OPEN,
    &ITERATOR_CLOSE,
    &ITERATOR_SEEKGE,
    &ITERATOR_SEEKLT,
    &ITERATOR_NEXT,
    &ITERATOR_NEXTKEY,
    &ITERATOR_PREV,
    &DELETE_RANGE,
    &COMPACT,
    &INGEST,
    &RESTART,
];
