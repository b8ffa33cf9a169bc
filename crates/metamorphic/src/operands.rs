//! Operand generators
//!
//! One generator per operand category. Resource generators (transactions,
//! read/writers, iterators) track which identifiers are live so generated
//! operations never reference a closed resource; value-like generators
//! (keys, values, timestamps) keep pools that bias towards reuse.
//!
//! # Lifecycle
//!
//! - `get_new` mints an identifier that was never handed out before
//! - the opener's constructor calls `open`, the closer's calls `close`
//! - a restart calls [`Generators::close_all`], invalidating every live id
//!
//! Parsing lives on the concrete generators and is shared by generation and
//! replay, so a token means the same thing in both modes.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use strata_core::{Key, MvccKey, Timestamp, Value};

use crate::error::{MetaError, MetaResult};
use crate::ids::{BatchId, IteratorId, ReadWriterId, TxnId};

/// Probability that a key or value draw mints a fresh one instead of reusing
pub const FRESH_PROBABILITY: f64 = 0.3;

/// Letters fresh user keys are built from
pub const KEY_ALPHABET: &[u8] = b"abcdefg";

/// Longest fresh user key
pub const MAX_KEY_LEN: usize = 4;

/// Longest fresh value
pub const MAX_VALUE_LEN: usize = 16;

const VALUE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Operand categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    /// Versioned key `<key>/<ts>`
    Key,
    /// Value bytes
    Value,
    /// Timestamp at or below the high-water mark
    PastTs,
    /// Freshly issued timestamp
    NextTs,
    /// Transaction id
    Transaction,
    /// `engine` or a batch id
    ReadWriter,
    /// Iterator id
    Iterator,
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperandType::Key => "key",
            OperandType::Value => "value",
            OperandType::PastTs => "past timestamp",
            OperandType::NextTs => "next timestamp",
            OperandType::Transaction => "transaction",
            OperandType::ReadWriter => "read/writer",
            OperandType::Iterator => "iterator",
        };
        f.write_str(s)
    }
}

/// Common interface of all operand generators
pub trait OperandGenerator {
    /// Pick an operand; resource domains pick among live ids
    fn get(&mut self, rng: &mut StdRng) -> MetaResult<String>;

    /// Mint an operand never returned before
    fn get_new(&mut self, rng: &mut StdRng) -> String;

    /// Number of live instances
    fn count(&self) -> usize;

    /// Catalog entry that opens this domain, if it has one
    fn opener(&self) -> Option<&'static str> {
        None
    }

    /// Forget every live instance
    fn close_all(&mut self) {}
}

// ============================================================================
// Timestamps
// ============================================================================

/// Timestamp source shared by the generators of one run
///
/// "Next" timestamps are strictly increasing wall times, each issued once.
/// "Past" timestamps are uniform in `[0, high-water]`. Only the generators
/// built together by [`Generators::new`] share a high-water mark.
#[derive(Debug, Default)]
pub struct TsOracle {
    high_water: Rc<Cell<u64>>,
}

impl TsOracle {
    fn share(&self) -> TsOracle {
        TsOracle {
            high_water: Rc::clone(&self.high_water),
        }
    }

    /// Issue a new timestamp above every timestamp seen so far
    pub fn next(&self) -> Timestamp {
        let wall = self.high_water.get() + 1;
        self.high_water.set(wall);
        Timestamp::from_wall(wall)
    }

    /// Draw a timestamp no later than the high-water mark
    pub fn past(&self, rng: &mut StdRng) -> Timestamp {
        Timestamp::from_wall(rng.gen_range(0..=self.high_water()))
    }

    /// Raise the high-water mark to `ts` if it is later
    pub fn observe(&self, ts: Timestamp) {
        if ts.wall_time() > self.high_water.get() {
            self.high_water.set(ts.wall_time());
        }
    }

    /// Current high-water wall time
    pub fn high_water(&self) -> u64 {
        self.high_water.get()
    }
}

fn parse_timestamp(token: &str) -> MetaResult<Timestamp> {
    token
        .parse()
        .map_err(|e| MetaError::token("timestamp", token, e))
}

/// Historical timestamps
#[derive(Debug)]
pub struct PastTsGenerator {
    oracle: TsOracle,
}

impl PastTsGenerator {
    /// Generator drawing from `oracle`
    pub fn new(oracle: TsOracle) -> Self {
        PastTsGenerator { oracle }
    }

    /// Parse a timestamp token
    pub fn parse(&self, token: &str) -> MetaResult<Timestamp> {
        parse_timestamp(token)
    }
}

impl OperandGenerator for PastTsGenerator {
    fn get(&mut self, rng: &mut StdRng) -> MetaResult<String> {
        Ok(self.get_new(rng))
    }

    fn get_new(&mut self, rng: &mut StdRng) -> String {
        self.oracle.past(rng).to_string()
    }

    fn count(&self) -> usize {
        1
    }
}

/// Fresh timestamps for opening transactions
#[derive(Debug)]
pub struct NextTsGenerator {
    oracle: TsOracle,
}

impl NextTsGenerator {
    /// Generator issuing from `oracle`
    pub fn new(oracle: TsOracle) -> Self {
        NextTsGenerator { oracle }
    }

    /// Parse a timestamp token, keeping the oracle ahead of it
    pub fn parse(&self, token: &str) -> MetaResult<Timestamp> {
        let ts = parse_timestamp(token)?;
        self.oracle.observe(ts);
        Ok(ts)
    }
}

impl OperandGenerator for NextTsGenerator {
    fn get(&mut self, rng: &mut StdRng) -> MetaResult<String> {
        Ok(self.get_new(rng))
    }

    fn get_new(&mut self, _rng: &mut StdRng) -> String {
        self.oracle.next().to_string()
    }

    fn count(&self) -> usize {
        1
    }
}

// ============================================================================
// Keys and values
// ============================================================================

/// Versioned keys, biased towards reuse
#[derive(Debug)]
pub struct KeyGenerator {
    pool: Vec<MvccKey>,
    oracle: TsOracle,
}

impl KeyGenerator {
    /// Generator stamping fresh keys with past timestamps from `oracle`
    pub fn new(oracle: TsOracle) -> Self {
        KeyGenerator {
            pool: Vec::new(),
            oracle,
        }
    }

    /// Parse a `<key>/<ts>` token
    pub fn parse(&self, token: &str) -> MetaResult<MvccKey> {
        token.parse().map_err(|e| MetaError::token("key", token, e))
    }
}

impl OperandGenerator for KeyGenerator {
    fn get(&mut self, rng: &mut StdRng) -> MetaResult<String> {
        if self.pool.is_empty() || rng.gen_bool(FRESH_PROBABILITY) {
            return Ok(self.get_new(rng));
        }
        let idx = rng.gen_range(0..self.pool.len());
        Ok(self.pool[idx].to_string())
    }

    fn get_new(&mut self, rng: &mut StdRng) -> String {
        let len = rng.gen_range(1..=MAX_KEY_LEN);
        let bytes: Vec<u8> = (0..len)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())])
            .collect();
        let key = MvccKey::new(Key::new(bytes), self.oracle.past(rng));
        let token = key.to_string();
        self.pool.push(key);
        token
    }

    fn count(&self) -> usize {
        self.pool.len()
    }
}

/// Values, biased towards reuse
#[derive(Debug, Clone, Default)]
pub struct ValueGenerator {
    pool: Vec<Value>,
}

impl ValueGenerator {
    /// Empty generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a value token
    pub fn parse(&self, token: &str) -> MetaResult<Value> {
        token.parse().map_err(|e| MetaError::token("value", token, e))
    }
}

impl OperandGenerator for ValueGenerator {
    fn get(&mut self, rng: &mut StdRng) -> MetaResult<String> {
        if self.pool.is_empty() || rng.gen_bool(FRESH_PROBABILITY) {
            return Ok(self.get_new(rng));
        }
        let idx = rng.gen_range(0..self.pool.len());
        Ok(self.pool[idx].to_string())
    }

    fn get_new(&mut self, rng: &mut StdRng) -> String {
        let len = rng.gen_range(1..=MAX_VALUE_LEN);
        let bytes: Vec<u8> = (0..len)
            .map(|_| VALUE_ALPHABET[rng.gen_range(0..VALUE_ALPHABET.len())])
            .collect();
        let value = Value::from_bytes(bytes);
        let token = value.to_string();
        self.pool.push(value);
        token
    }

    fn count(&self) -> usize {
        self.pool.len()
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Transactions, and the batches holding their unflushed writes
#[derive(Debug, Clone, Default)]
pub struct TxnGenerator {
    counter: u64,
    live: Vec<TxnId>,
    open_batches: BTreeMap<TxnId, BTreeSet<BatchId>>,
}

impl TxnGenerator {
    /// Parse a transaction token
    pub fn parse(&self, token: &str) -> MetaResult<TxnId> {
        token.parse()
    }

    /// Mark `id` live
    pub fn open(&mut self, id: TxnId) {
        self.counter = self.counter.max(id.0);
        if !self.live.contains(&id) {
            self.live.push(id);
        }
    }

    /// Mark `id` closed and forget its batch writes
    pub fn close(&mut self, id: TxnId) {
        self.live.retain(|t| *t != id);
        self.open_batches.remove(&id);
    }

    /// Record that `txn` has unflushed writes on `rw` (ignored for the engine)
    pub fn track_write_on_batch(&mut self, rw: ReadWriterId, txn: TxnId) {
        if let Some(batch) = rw.batch() {
            self.open_batches.entry(txn).or_default().insert(batch);
        }
    }

    /// Batches holding writes of `txn`, in ascending id order
    pub fn batches_for(&self, txn: TxnId) -> Vec<BatchId> {
        self.open_batches
            .get(&txn)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget `batch` in every transaction's record
    pub fn clear_batch(&mut self, batch: BatchId) {
        for batches in self.open_batches.values_mut() {
            batches.remove(&batch);
        }
        self.open_batches.retain(|_, batches| !batches.is_empty());
    }

    /// Live transactions
    pub fn live(&self) -> &[TxnId] {
        &self.live
    }
}

impl OperandGenerator for TxnGenerator {
    fn get(&mut self, rng: &mut StdRng) -> MetaResult<String> {
        self.live
            .choose(rng)
            .map(|t| t.to_string())
            .ok_or(MetaError::EmptyDomain(OperandType::Transaction))
    }

    fn get_new(&mut self, _rng: &mut StdRng) -> String {
        self.counter += 1;
        TxnId(self.counter).to_string()
    }

    fn count(&self) -> usize {
        self.live.len()
    }

    fn opener(&self) -> Option<&'static str> {
        Some("txn_open")
    }

    fn close_all(&mut self) {
        self.live.clear();
        self.open_batches.clear();
    }
}

/// The engine plus open batches
#[derive(Debug, Clone, Default)]
pub struct ReadWriterGenerator {
    counter: u64,
    live: Vec<BatchId>,
}

impl ReadWriterGenerator {
    /// Parse a read/writer token
    pub fn parse(&self, token: &str) -> MetaResult<ReadWriterId> {
        token.parse()
    }

    /// Mark a batch live
    pub fn open(&mut self, id: BatchId) {
        self.counter = self.counter.max(id.0);
        if !self.live.contains(&id) {
            self.live.push(id);
        }
    }

    /// Mark a batch closed
    pub fn close(&mut self, id: BatchId) {
        self.live.retain(|b| *b != id);
    }

    /// Live batches
    pub fn live(&self) -> &[BatchId] {
        &self.live
    }
}

impl OperandGenerator for ReadWriterGenerator {
    fn get(&mut self, rng: &mut StdRng) -> MetaResult<String> {
        let idx = rng.gen_range(0..=self.live.len());
        let id = match idx {
            0 => ReadWriterId::Engine,
            n => ReadWriterId::Batch(self.live[n - 1]),
        };
        Ok(id.to_string())
    }

    fn get_new(&mut self, _rng: &mut StdRng) -> String {
        self.counter += 1;
        BatchId(self.counter).to_string()
    }

    fn count(&self) -> usize {
        self.live.len() + 1
    }

    fn opener(&self) -> Option<&'static str> {
        Some("batch_open")
    }

    fn close_all(&mut self) {
        self.live.clear();
    }
}

/// Iterators, each scoped to one reader
#[derive(Debug, Clone, Default)]
pub struct IteratorGenerator {
    counter: u64,
    live: Vec<IteratorId>,
    reader_to_iter: BTreeMap<ReadWriterId, Vec<IteratorId>>,
    iter_to_reader: BTreeMap<IteratorId, ReadWriterId>,
}

impl IteratorGenerator {
    /// Parse an iterator token
    pub fn parse(&self, token: &str) -> MetaResult<IteratorId> {
        token.parse()
    }

    /// Mark `id` live on `reader`
    pub fn open(&mut self, reader: ReadWriterId, id: IteratorId) {
        self.counter = self.counter.max(id.0);
        if self.iter_to_reader.insert(id, reader).is_none() {
            self.live.push(id);
            self.reader_to_iter.entry(reader).or_default().push(id);
        }
    }

    /// Mark `id` closed
    pub fn close(&mut self, id: IteratorId) {
        self.live.retain(|i| *i != id);
        if let Some(reader) = self.iter_to_reader.remove(&id) {
            if let Some(iters) = self.reader_to_iter.get_mut(&reader) {
                iters.retain(|i| *i != id);
                if iters.is_empty() {
                    self.reader_to_iter.remove(&reader);
                }
            }
        }
    }

    /// Iterators open on `reader`, in opening order
    pub fn iters_on(&self, reader: ReadWriterId) -> Vec<IteratorId> {
        self.reader_to_iter.get(&reader).cloned().unwrap_or_default()
    }

    /// Live iterators
    pub fn live(&self) -> &[IteratorId] {
        &self.live
    }
}

impl OperandGenerator for IteratorGenerator {
    fn get(&mut self, rng: &mut StdRng) -> MetaResult<String> {
        self.live
            .choose(rng)
            .map(|i| i.to_string())
            .ok_or(MetaError::EmptyDomain(OperandType::Iterator))
    }

    fn get_new(&mut self, _rng: &mut StdRng) -> String {
        self.counter += 1;
        IteratorId(self.counter).to_string()
    }

    fn count(&self) -> usize {
        self.live.len()
    }

    fn opener(&self) -> Option<&'static str> {
        Some("iterator_open")
    }

    fn close_all(&mut self) {
        self.live.clear();
        self.reader_to_iter.clear();
        self.iter_to_reader.clear();
    }
}

// ============================================================================
// All generators
// ============================================================================

/// Every operand generator of one run
#[derive(Debug)]
pub struct Generators {
    /// Versioned keys
    pub keys: KeyGenerator,
    /// Values
    pub values: ValueGenerator,
    /// Historical timestamps
    pub past_ts: PastTsGenerator,
    /// Fresh timestamps
    pub next_ts: NextTsGenerator,
    /// Transactions
    pub txns: TxnGenerator,
    /// Engine and batches
    pub read_writers: ReadWriterGenerator,
    /// Iterators
    pub iterators: IteratorGenerator,
    restarts: bool,
}

impl Generators {
    /// Fresh generators sharing one timestamp oracle
    pub fn new(restarts: bool) -> Self {
        let oracle = TsOracle::default();
        Generators {
            keys: KeyGenerator::new(oracle.share()),
            values: ValueGenerator::new(),
            past_ts: PastTsGenerator::new(oracle.share()),
            next_ts: NextTsGenerator::new(oracle),
            txns: TxnGenerator::default(),
            read_writers: ReadWriterGenerator::default(),
            iterators: IteratorGenerator::default(),
            restarts,
        }
    }

    /// Whether restarts are enabled for this run
    pub fn restarts(&self) -> bool {
        self.restarts
    }

    /// Generator for an operand category
    pub fn operand(&mut self, operand: OperandType) -> &mut dyn OperandGenerator {
        match operand {
            OperandType::Key => &mut self.keys,
            OperandType::Value => &mut self.values,
            OperandType::PastTs => &mut self.past_ts,
            OperandType::NextTs => &mut self.next_ts,
            OperandType::Transaction => &mut self.txns,
            OperandType::ReadWriter => &mut self.read_writers,
            OperandType::Iterator => &mut self.iterators,
        }
    }

    /// Close a batch everywhere it is tracked
    pub fn close_batch(&mut self, batch: BatchId) {
        self.read_writers.close(batch);
        self.txns.clear_batch(batch);
    }

    /// Invalidate every live resource, as an engine restart does
    pub fn close_all(&mut self) {
        self.iterators.close_all();
        self.read_writers.close_all();
        self.txns.close_all();
    }
}
