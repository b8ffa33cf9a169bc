//! Storage engine capability set
//!
//! These traits are the whole contract the metamorphic engine relies on.
//! Any engine (the in-memory [`MemEngine`](crate::MemEngine) here, or an
//! external one) is driven exclusively through them, which is what lets the
//! same recorded trace run against different implementations.
//!
//! # Layers
//!
//! - [`Reader`] / [`Writer`]: raw access to `MvccKey -> bytes` records
//! - [`Batch`]: buffered writes over a base engine, committed atomically
//! - [`Engine`]: the base handle; creates batches, compacts, ingests files
//! - [`MvccIterator`]: bounded cursor over a reader
//! - [`EngineFactory`]: opens an engine in a directory (used for restarts)
//!
//! MVCC semantics (intents, versions, conflict checks) live one level up, in
//! [`crate::mvcc`], and are expressed only in terms of these raw operations.

use std::path::{Path, PathBuf};

use strata_core::{Key, MvccKey, Result};

/// Bounds of an iterator, in user-key space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterOptions {
    /// Inclusive lower bound
    pub lower_bound: Key,
    /// Exclusive upper bound
    pub upper_bound: Key,
}

impl IterOptions {
    /// Bounds covering `[lower, upper)`
    pub fn new(lower_bound: Key, upper_bound: Key) -> Self {
        IterOptions {
            lower_bound,
            upper_bound,
        }
    }
}

/// Cursor over raw records in `MvccKey` order
///
/// Positioning methods never fail; failures surface through [`valid`].
///
/// [`valid`]: MvccIterator::valid
pub trait MvccIterator: Send {
    /// Position at the first record `>= key`
    fn seek_ge(&mut self, key: &MvccKey);

    /// Position at the last record `< key`
    fn seek_lt(&mut self, key: &MvccKey);

    /// Step to the next record
    fn next(&mut self);

    /// Step to the first record of the next user key
    fn next_key(&mut self);

    /// Step to the previous record
    fn prev(&mut self);

    /// Whether the iterator is positioned at a record
    fn valid(&self) -> Result<bool>;

    /// Current key, if positioned
    fn key(&self) -> Option<&MvccKey>;

    /// Current raw value, if positioned
    fn value(&self) -> Option<&[u8]>;

    /// Release the iterator; later calls report it closed
    fn close(&mut self);
}

/// Raw read access
pub trait Reader {
    /// Point lookup of a raw record
    fn get_raw(&self, key: &MvccKey) -> Result<Option<Vec<u8>>>;

    /// All records whose user key lies in `[start, end)`, in `MvccKey` order
    ///
    /// Returns nothing when `start >= end`.
    fn scan_raw(&self, start: &Key, end: &Key) -> Result<Vec<(MvccKey, Vec<u8>)>>;

    /// Create a bounded iterator
    fn new_iterator(&self, opts: IterOptions) -> Result<Box<dyn MvccIterator>>;
}

/// Raw write access
pub trait Writer {
    /// Insert or overwrite a raw record
    fn put_raw(&mut self, key: MvccKey, value: Vec<u8>) -> Result<()>;

    /// Remove a raw record
    fn clear_raw(&mut self, key: &MvccKey) -> Result<()>;

    /// Remove every record in `[start, end)` of `MvccKey` order
    fn clear_range_raw(&mut self, start: &MvccKey, end: &MvccKey) -> Result<()>;
}

/// Combined read/write access; implemented by engines and batches
pub trait ReadWriter: Reader + Writer {}

/// Buffered writes over a base engine
pub trait Batch: ReadWriter + Send {
    /// Apply all buffered writes to the base engine atomically
    fn commit(&mut self, sync: bool) -> Result<()>;

    /// Discard the batch; later calls report it closed
    fn close(&mut self);

    /// Number of buffered writes
    fn len(&self) -> usize;

    /// True when nothing is buffered
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View as a read/writer
    fn as_read_writer(&mut self) -> &mut dyn ReadWriter;

    /// View as a reader
    fn as_reader(&self) -> &dyn Reader;
}

/// Base engine handle
pub trait Engine: ReadWriter + Send {
    /// Implementation name (shown in restart comments)
    fn name(&self) -> &str;

    /// Create a batch over this engine
    fn new_batch(&self) -> Result<Box<dyn Batch>>;

    /// Compact records with user key in `[start, end)`
    fn compact_range(&mut self, start: &Key, end: &Key) -> Result<()>;

    /// Ingest sorted files produced by [`SstWriter`](crate::SstWriter)
    fn ingest_external_files(&mut self, paths: &[PathBuf]) -> Result<()>;

    /// Flush and release the engine
    fn close(&mut self) -> Result<()>;

    /// View as a read/writer
    fn as_read_writer(&mut self) -> &mut dyn ReadWriter;

    /// View as a reader
    fn as_reader(&self) -> &dyn Reader;
}

/// Opens engines of one implementation
pub trait EngineFactory: Send + Sync {
    /// Implementation name
    fn name(&self) -> &str;

    /// Open (or reopen) an engine whose files live in `dir`
    fn open(&self, dir: &Path) -> Result<Box<dyn Engine>>;
}
