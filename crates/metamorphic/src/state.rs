//! Runtime state of a run
//!
//! Owns the live engine and every runtime resource the trace refers to:
//! transactions, batches and iterators, keyed by their identifiers. An
//! operation that names a resource missing here gets
//! [`MetaError::MissingResource`]: a generator bug when generating, an
//! `error: ...` output line when replaying a recorded trace.
//!
//! Restarts close everything, then reopen the same directory with the next
//! engine of the configured sequence (wrapping around).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::Transaction;
use strata_storage::{Batch, Engine, EngineFactory, MvccIterator, ReadWriter, Reader};

use crate::error::{MetaError, MetaResult};
use crate::ids::{BatchId, IteratorId, ReadWriterId, TxnId};

/// Engines and resources of one run
pub struct RunState {
    engine: Option<Box<dyn Engine>>,
    engine_sequence: Vec<Arc<dyn EngineFactory>>,
    cur_engine: usize,
    dir: PathBuf,
    restarts: bool,
    open_txns: BTreeMap<TxnId, Transaction>,
    open_batches: BTreeMap<BatchId, Box<dyn Batch>>,
    open_iters: BTreeMap<IteratorId, Box<dyn MvccIterator>>,
    comments: Vec<String>,
}

impl RunState {
    /// Open the first engine of `engine_sequence` in `dir`
    pub fn open(
        dir: &Path,
        engine_sequence: Vec<Arc<dyn EngineFactory>>,
        restarts: bool,
    ) -> MetaResult<Self> {
        let first = engine_sequence
            .first()
            .ok_or_else(|| MetaError::Config("engine sequence is empty".to_string()))?;
        let engine = first.open(dir)?;
        tracing::debug!(engine = first.name(), dir = %dir.display(), "run state opened");
        Ok(RunState {
            engine: Some(engine),
            engine_sequence,
            cur_engine: 0,
            dir: dir.to_path_buf(),
            restarts,
            open_txns: BTreeMap::new(),
            open_batches: BTreeMap::new(),
            open_iters: BTreeMap::new(),
            comments: Vec::new(),
        })
    }

    /// Directory holding engine files and scratch files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether restarts are enabled
    pub fn restarts(&self) -> bool {
        self.restarts
    }

    /// Name of the current engine
    pub fn engine_name(&self) -> &str {
        self.engine_sequence[self.cur_engine].name()
    }

    /// Names of the engines in the sequence
    pub fn engine_names(&self) -> Vec<String> {
        self.engine_sequence
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    /// The live engine
    pub fn engine(&self) -> MetaResult<&dyn Engine> {
        self.engine
            .as_deref()
            .ok_or_else(|| MetaError::missing("engine", "engine"))
    }

    /// The live engine, mutably
    pub fn engine_mut(&mut self) -> MetaResult<&mut dyn Engine> {
        self.engine
            .as_deref_mut()
            .map(|e| e as &mut dyn Engine)
            .ok_or_else(|| MetaError::missing("engine", "engine"))
    }

    /// Reader behind a read/writer id
    pub fn reader(&self, id: ReadWriterId) -> MetaResult<&dyn Reader> {
        match id {
            ReadWriterId::Engine => Ok(self.engine()?.as_reader()),
            ReadWriterId::Batch(batch) => self
                .open_batches
                .get(&batch)
                .map(|b| b.as_reader())
                .ok_or_else(|| MetaError::missing("batch", batch)),
        }
    }

    /// Writer behind a read/writer id
    pub fn read_writer(&mut self, id: ReadWriterId) -> MetaResult<&mut dyn ReadWriter> {
        match id {
            ReadWriterId::Engine => Ok(self.engine_mut()?.as_read_writer()),
            ReadWriterId::Batch(batch) => self
                .open_batches
                .get_mut(&batch)
                .map(|b| b.as_read_writer())
                .ok_or_else(|| MetaError::missing("batch", batch)),
        }
    }

    /// Open transaction
    pub fn txn(&self, id: TxnId) -> MetaResult<&Transaction> {
        self.open_txns
            .get(&id)
            .ok_or_else(|| MetaError::missing("transaction", id))
    }

    /// Open transaction together with a writer, for transactional writes
    pub fn txn_and_writer(
        &mut self,
        txn: TxnId,
        rw: ReadWriterId,
    ) -> MetaResult<(&mut Transaction, &mut dyn ReadWriter)> {
        let txn = self
            .open_txns
            .get_mut(&txn)
            .ok_or_else(|| MetaError::missing("transaction", txn))?;
        let writer = match rw {
            ReadWriterId::Engine => self
                .engine
                .as_deref_mut()
                .ok_or_else(|| MetaError::missing("engine", "engine"))?
                .as_read_writer(),
            ReadWriterId::Batch(batch) => self
                .open_batches
                .get_mut(&batch)
                .ok_or_else(|| MetaError::missing("batch", batch))?
                .as_read_writer(),
        };
        Ok((txn, writer))
    }

    /// Register an opened transaction
    pub fn insert_txn(&mut self, id: TxnId, txn: Transaction) {
        self.open_txns.insert(id, txn);
    }

    /// Remove a transaction
    pub fn remove_txn(&mut self, id: TxnId) -> MetaResult<Transaction> {
        self.open_txns
            .remove(&id)
            .ok_or_else(|| MetaError::missing("transaction", id))
    }

    /// Create and register a batch over the live engine
    pub fn open_batch(&mut self, id: BatchId) -> MetaResult<()> {
        let batch = self.engine()?.new_batch()?;
        self.open_batches.insert(id, batch);
        Ok(())
    }

    /// Remove a batch
    pub fn remove_batch(&mut self, id: BatchId) -> MetaResult<Box<dyn Batch>> {
        self.open_batches
            .remove(&id)
            .ok_or_else(|| MetaError::missing("batch", id))
    }

    /// Register an opened iterator
    pub fn insert_iter(&mut self, id: IteratorId, iter: Box<dyn MvccIterator>) {
        self.open_iters.insert(id, iter);
    }

    /// Open iterator
    pub fn iter_mut(&mut self, id: IteratorId) -> MetaResult<&mut dyn MvccIterator> {
        self.open_iters
            .get_mut(&id)
            .map(|i| i.as_mut() as &mut dyn MvccIterator)
            .ok_or_else(|| MetaError::missing("iterator", id))
    }

    /// Remove an iterator
    pub fn remove_iter(&mut self, id: IteratorId) -> MetaResult<Box<dyn MvccIterator>> {
        self.open_iters
            .remove(&id)
            .ok_or_else(|| MetaError::missing("iterator", id))
    }

    /// Queue a comment line to precede the current operation's output
    pub fn comment(&mut self, text: impl Into<String>) {
        self.comments.push(text.into());
    }

    /// Drain queued comments
    pub fn take_comments(&mut self) -> Vec<String> {
        std::mem::take(&mut self.comments)
    }

    /// Close every resource and the engine
    ///
    /// Open transactions are dropped without resolving their intents.
    pub fn close_all(&mut self) -> MetaResult<()> {
        for (_, mut iter) in std::mem::take(&mut self.open_iters) {
            iter.close();
        }
        for (_, mut batch) in std::mem::take(&mut self.open_batches) {
            batch.close();
        }
        self.open_txns.clear();
        if let Some(mut engine) = self.engine.take() {
            engine.close()?;
        }
        Ok(())
    }

    /// Close everything and reopen with the next engine in the sequence
    ///
    /// Returns the old and new engine names.
    pub fn restart(&mut self) -> MetaResult<(String, String)> {
        let old = self.engine_name().to_string();
        self.close_all()?;
        self.cur_engine = (self.cur_engine + 1) % self.engine_sequence.len();
        let factory = Arc::clone(&self.engine_sequence[self.cur_engine]);
        self.engine = Some(factory.open(&self.dir)?);
        let new = factory.name().to_string();
        tracing::info!(from = %old, to = %new, "restarted engine");
        Ok((old, new))
    }

    /// Number of open transactions, batches and iterators
    pub fn open_resource_counts(&self) -> (usize, usize, usize) {
        (
            self.open_txns.len(),
            self.open_batches.len(),
            self.open_iters.len(),
        )
    }
}
