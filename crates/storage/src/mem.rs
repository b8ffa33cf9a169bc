//! MemEngine: reference engine over an ordered map
//!
//! This module implements the engine capability set using:
//! - `BTreeMap<MvccKey, Vec<u8>>` for ordered raw records
//! - `parking_lot::RwLock` for shared access between the engine and its batches
//! - a sorted-file image (see [`crate::sst`]) for persistence across reopen
//!
//! # Design Notes
//!
//! - **Batches are overlays**: buffered writes shadow the base map until commit
//! - **Iterators are snapshots**: an iterator copies its bounded range at
//!   creation, so later writes never move it
//! - **Durability modes**: `Strict` rewrites the image after every batch
//!   commit, ingestion and compaction; `Buffered` only on close. Either way an
//!   engine reopened on the same directory sees everything written before close.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use strata_core::{Error, Key, MvccKey, Result};

use crate::engine::{
    Batch, Engine, EngineFactory, IterOptions, MvccIterator, ReadWriter, Reader, Writer,
};
use crate::sst::{read_sst, SstWriter};

/// File holding the persisted image inside an engine directory
pub const IMAGE_FILE_NAME: &str = "ENGINE.sst";

type Records = BTreeMap<MvccKey, Vec<u8>>;

/// When the engine image is written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// Persist after batch commits, ingestions and compactions
    #[default]
    Strict,
    /// Persist on close only
    Buffered,
}

/// State shared by an engine and the batches created from it
#[derive(Debug)]
struct Shared {
    records: RwLock<Records>,
    image_path: Option<PathBuf>,
    durability: DurabilityMode,
}

impl Shared {
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.image_path else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        let records = self.records.read();
        let mut writer = SstWriter::create(&tmp)?;
        for (key, value) in records.iter() {
            writer.put(key, value)?;
        }
        let info = writer.finish()?;
        fs::rename(&tmp, path)?;
        tracing::trace!(path = %path.display(), records = info.records, "persisted engine image");
        Ok(())
    }

    fn persist_if_strict(&self) -> Result<()> {
        match self.durability {
            DurabilityMode::Strict => self.persist(),
            DurabilityMode::Buffered => Ok(()),
        }
    }

    fn range(&self, start: &Key, end: &Key) -> Vec<(MvccKey, Vec<u8>)> {
        if start >= end {
            return Vec::new();
        }
        let lo = MvccKey::metadata(start.clone());
        let hi = MvccKey::metadata(end.clone());
        self.records
            .read()
            .range(lo..hi)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// In-memory engine with optional on-disk image
pub struct MemEngine {
    name: String,
    shared: Arc<Shared>,
    closed: bool,
}

impl MemEngine {
    /// Open an engine persisting into `dir`, loading any existing image
    pub fn open(name: impl Into<String>, dir: &Path, durability: DurabilityMode) -> Result<Self> {
        let name = name.into();
        fs::create_dir_all(dir)?;
        let image_path = dir.join(IMAGE_FILE_NAME);
        let mut records = Records::new();
        if image_path.exists() {
            for (key, value) in read_sst(&image_path)? {
                records.insert(key, value);
            }
        }
        tracing::debug!(
            engine = %name,
            dir = %dir.display(),
            records = records.len(),
            ?durability,
            "opened engine"
        );
        Ok(MemEngine {
            name,
            shared: Arc::new(Shared {
                records: RwLock::new(records),
                image_path: Some(image_path),
                durability,
            }),
            closed: false,
        })
    }

    /// Engine with no backing directory; contents are lost on close
    pub fn ephemeral(name: impl Into<String>) -> Self {
        MemEngine {
            name: name.into(),
            shared: Arc::new(Shared {
                records: RwLock::new(Records::new()),
                image_path: None,
                durability: DurabilityMode::Buffered,
            }),
            closed: false,
        }
    }

    /// Number of raw records
    pub fn len(&self) -> usize {
        self.shared.records.read().len()
    }

    /// True when the engine holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed("engine"));
        }
        Ok(())
    }
}

impl Reader for MemEngine {
    fn get_raw(&self, key: &MvccKey) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.shared.records.read().get(key).cloned())
    }

    fn scan_raw(&self, start: &Key, end: &Key) -> Result<Vec<(MvccKey, Vec<u8>)>> {
        self.check_open()?;
        Ok(self.shared.range(start, end))
    }

    fn new_iterator(&self, opts: IterOptions) -> Result<Box<dyn MvccIterator>> {
        self.check_open()?;
        let records = self.shared.range(&opts.lower_bound, &opts.upper_bound);
        Ok(Box::new(MemIterator::new(records)))
    }
}

impl Writer for MemEngine {
    fn put_raw(&mut self, key: MvccKey, value: Vec<u8>) -> Result<()> {
        self.check_open()?;
        self.shared.records.write().insert(key, value);
        Ok(())
    }

    fn clear_raw(&mut self, key: &MvccKey) -> Result<()> {
        self.check_open()?;
        self.shared.records.write().remove(key);
        Ok(())
    }

    fn clear_range_raw(&mut self, start: &MvccKey, end: &MvccKey) -> Result<()> {
        self.check_open()?;
        if start >= end {
            return Ok(());
        }
        {
            let mut records = self.shared.records.write();
            let doomed: Vec<MvccKey> = records
                .range(start.clone()..end.clone())
                .map(|(k, _)| k.clone())
                .collect();
            for key in &doomed {
                records.remove(key);
            }
        }
        Ok(())
    }
}

impl ReadWriter for MemEngine {}

impl Engine for MemEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_batch(&self) -> Result<Box<dyn Batch>> {
        self.check_open()?;
        Ok(Box::new(MemBatch::new(Arc::clone(&self.shared))))
    }

    fn compact_range(&mut self, start: &Key, end: &Key) -> Result<()> {
        self.check_open()?;
        // The map is always compact; only the image needs rewriting.
        let compacted = self.shared.range(start, end).len();
        tracing::debug!(engine = %self.name, %start, %end, records = compacted, "compacted range");
        self.shared.persist_if_strict()
    }

    fn ingest_external_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        self.check_open()?;
        let mut loaded = Vec::new();
        for path in paths {
            loaded.extend(read_sst(path)?);
        }
        let count = loaded.len();
        {
            let mut records = self.shared.records.write();
            for (key, value) in loaded {
                records.insert(key, value);
            }
        }
        tracing::debug!(engine = %self.name, files = paths.len(), records = count, "ingested files");
        self.shared.persist_if_strict()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.shared.persist()?;
        self.closed = true;
        tracing::debug!(engine = %self.name, "closed engine");
        Ok(())
    }

    fn as_read_writer(&mut self) -> &mut dyn ReadWriter {
        self
    }

    fn as_reader(&self) -> &dyn Reader {
        self
    }
}

/// Write overlay over a [`MemEngine`]
///
/// `None` entries are buffered deletions.
pub struct MemBatch {
    shared: Arc<Shared>,
    writes: BTreeMap<MvccKey, Option<Vec<u8>>>,
    closed: bool,
}

impl MemBatch {
    fn new(shared: Arc<Shared>) -> Self {
        MemBatch {
            shared,
            writes: BTreeMap::new(),
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed("batch"));
        }
        Ok(())
    }

    /// Base records in `[start, end)` with buffered writes applied
    fn merged(&self, start: &Key, end: &Key) -> Vec<(MvccKey, Vec<u8>)> {
        if start >= end {
            return Vec::new();
        }
        let mut view: Records = self.shared.range(start, end).into_iter().collect();
        let lo = MvccKey::metadata(start.clone());
        let hi = MvccKey::metadata(end.clone());
        for (key, write) in self.writes.range(lo..hi) {
            match write {
                Some(value) => {
                    view.insert(key.clone(), value.clone());
                }
                None => {
                    view.remove(key);
                }
            }
        }
        view.into_iter().collect()
    }
}

impl Reader for MemBatch {
    fn get_raw(&self, key: &MvccKey) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        match self.writes.get(key) {
            Some(write) => Ok(write.clone()),
            None => Ok(self.shared.records.read().get(key).cloned()),
        }
    }

    fn scan_raw(&self, start: &Key, end: &Key) -> Result<Vec<(MvccKey, Vec<u8>)>> {
        self.check_open()?;
        Ok(self.merged(start, end))
    }

    fn new_iterator(&self, opts: IterOptions) -> Result<Box<dyn MvccIterator>> {
        self.check_open()?;
        let records = self.merged(&opts.lower_bound, &opts.upper_bound);
        Ok(Box::new(MemIterator::new(records)))
    }
}

impl Writer for MemBatch {
    fn put_raw(&mut self, key: MvccKey, value: Vec<u8>) -> Result<()> {
        self.check_open()?;
        self.writes.insert(key, Some(value));
        Ok(())
    }

    fn clear_raw(&mut self, key: &MvccKey) -> Result<()> {
        self.check_open()?;
        self.writes.insert(key.clone(), None);
        Ok(())
    }

    fn clear_range_raw(&mut self, start: &MvccKey, end: &MvccKey) -> Result<()> {
        self.check_open()?;
        if start >= end {
            return Ok(());
        }
        let doomed: Vec<MvccKey> = self
            .merged(&start.key, &end.key.next())
            .into_iter()
            .map(|(k, _)| k)
            .filter(|k| k >= start && k < end)
            .collect();
        for key in doomed {
            self.writes.insert(key, None);
        }
        Ok(())
    }
}

impl ReadWriter for MemBatch {}

impl Batch for MemBatch {
    fn commit(&mut self, sync: bool) -> Result<()> {
        self.check_open()?;
        let writes = std::mem::take(&mut self.writes);
        let count = writes.len();
        {
            let mut records = self.shared.records.write();
            for (key, write) in writes {
                match write {
                    Some(value) => {
                        records.insert(key, value);
                    }
                    None => {
                        records.remove(&key);
                    }
                }
            }
        }
        tracing::trace!(writes = count, sync, "committed batch");
        if sync {
            self.shared.persist()
        } else {
            self.shared.persist_if_strict()
        }
    }

    fn close(&mut self) {
        self.writes.clear();
        self.closed = true;
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    fn as_read_writer(&mut self) -> &mut dyn ReadWriter {
        self
    }

    fn as_reader(&self) -> &dyn Reader {
        self
    }
}

/// Iterator over a snapshot of bounded records
pub struct MemIterator {
    records: Vec<(MvccKey, Vec<u8>)>,
    pos: Option<usize>,
    closed: bool,
}

impl MemIterator {
    fn new(records: Vec<(MvccKey, Vec<u8>)>) -> Self {
        MemIterator {
            records,
            pos: None,
            closed: false,
        }
    }

    fn lower_index(&self, key: &MvccKey) -> usize {
        self.records.partition_point(|(k, _)| k < key)
    }
}

impl MvccIterator for MemIterator {
    fn seek_ge(&mut self, key: &MvccKey) {
        let idx = self.lower_index(key);
        self.pos = (idx < self.records.len()).then_some(idx);
    }

    fn seek_lt(&mut self, key: &MvccKey) {
        let idx = self.lower_index(key);
        self.pos = idx.checked_sub(1);
    }

    fn next(&mut self) {
        self.pos = match self.pos {
            Some(p) if p + 1 < self.records.len() => Some(p + 1),
            _ => None,
        };
    }

    fn next_key(&mut self) {
        let Some(start) = self.pos else {
            return;
        };
        let current = &self.records[start].0.key;
        let skip = self.records[start..]
            .iter()
            .position(|(k, _)| &k.key != current);
        self.pos = skip.map(|offset| start + offset);
    }

    fn prev(&mut self) {
        self.pos = self.pos.and_then(|p| p.checked_sub(1));
    }

    fn valid(&self) -> Result<bool> {
        if self.closed {
            return Err(Error::Closed("iterator"));
        }
        Ok(self.pos.is_some())
    }

    fn key(&self) -> Option<&MvccKey> {
        self.pos.map(|p| &self.records[p].0)
    }

    fn value(&self) -> Option<&[u8]> {
        self.pos.map(|p| self.records[p].1.as_slice())
    }

    fn close(&mut self) {
        self.records.clear();
        self.pos = None;
        self.closed = true;
    }
}

/// Opens [`MemEngine`]s under a fixed name and durability mode
#[derive(Debug, Clone)]
pub struct MemEngineFactory {
    name: String,
    durability: DurabilityMode,
}

impl MemEngineFactory {
    /// Factory producing engines named `name`
    pub fn new(name: impl Into<String>, durability: DurabilityMode) -> Self {
        MemEngineFactory {
            name: name.into(),
            durability,
        }
    }

    /// Durability mode of produced engines
    pub fn durability(&self) -> DurabilityMode {
        self.durability
    }
}

impl EngineFactory for MemEngineFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, dir: &Path) -> Result<Box<dyn Engine>> {
        Ok(Box::new(MemEngine::open(self.name.clone(), dir, self.durability)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Timestamp;
    use tempfile::TempDir;

    fn mk(k: &str, wall: u64) -> MvccKey {
        MvccKey::new(Key::from(k), Timestamp::from_wall(wall))
    }

    fn keys(records: &[(MvccKey, Vec<u8>)]) -> Vec<String> {
        records.iter().map(|(k, _)| k.to_string()).collect()
    }

    #[test]
    fn test_put_get_clear() {
        let mut engine = MemEngine::ephemeral("mem");
        engine.put_raw(mk("a", 1), b"x".to_vec()).unwrap();
        assert_eq!(engine.get_raw(&mk("a", 1)).unwrap(), Some(b"x".to_vec()));
        engine.clear_raw(&mk("a", 1)).unwrap();
        assert_eq!(engine.get_raw(&mk("a", 1)).unwrap(), None);
    }

    #[test]
    fn test_scan_order_and_bounds() {
        let mut engine = MemEngine::ephemeral("mem");
        engine.put_raw(mk("b", 1), vec![]).unwrap();
        engine.put_raw(mk("a", 1), vec![]).unwrap();
        engine.put_raw(mk("a", 3), vec![]).unwrap();
        engine.put_raw(MvccKey::metadata(Key::from("a")), vec![]).unwrap();
        engine.put_raw(mk("c", 1), vec![]).unwrap();

        let got = engine.scan_raw(&Key::from("a"), &Key::from("c")).unwrap();
        assert_eq!(keys(&got), vec!["a/0", "a/3", "a/1", "b/1"]);
        assert!(engine.scan_raw(&Key::from("c"), &Key::from("a")).unwrap().is_empty());
    }

    #[test]
    fn test_batch_overlay_and_commit() {
        let mut engine = MemEngine::ephemeral("mem");
        engine.put_raw(mk("a", 1), b"base".to_vec()).unwrap();

        let mut batch = engine.new_batch().unwrap();
        batch.put_raw(mk("b", 1), b"new".to_vec()).unwrap();
        batch.clear_raw(&mk("a", 1)).unwrap();

        // Batch sees its own writes, engine does not
        assert_eq!(batch.get_raw(&mk("a", 1)).unwrap(), None);
        assert_eq!(engine.get_raw(&mk("a", 1)).unwrap(), Some(b"base".to_vec()));
        assert_eq!(keys(&batch.scan_raw(&Key::from("a"), &Key::from("z")).unwrap()), vec!["b/1"]);

        batch.commit(false).unwrap();
        assert_eq!(engine.get_raw(&mk("a", 1)).unwrap(), None);
        assert_eq!(engine.get_raw(&mk("b", 1)).unwrap(), Some(b"new".to_vec()));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_batch_clear_range_hides_base_records() {
        let mut engine = MemEngine::ephemeral("mem");
        engine.put_raw(mk("a", 1), vec![1]).unwrap();
        engine.put_raw(mk("b", 1), vec![2]).unwrap();
        let mut batch = engine.new_batch().unwrap();
        batch
            .clear_range_raw(&MvccKey::metadata(Key::from("a")), &MvccKey::metadata(Key::from("b")))
            .unwrap();
        assert_eq!(keys(&batch.scan_raw(&Key::MIN, &Key::from("z")).unwrap()), vec!["b/1"]);
    }

    #[test]
    fn test_closed_batch_rejects_use() {
        let engine = MemEngine::ephemeral("mem");
        let mut batch = engine.new_batch().unwrap();
        batch.close();
        assert!(matches!(batch.put_raw(mk("a", 1), vec![]), Err(Error::Closed("batch"))));
        assert!(batch.commit(false).is_err());
    }

    #[test]
    fn test_iterator_navigation() {
        let mut engine = MemEngine::ephemeral("mem");
        for (k, ts) in [("a", 2), ("a", 1), ("b", 5), ("c", 1)] {
            engine.put_raw(mk(k, ts), vec![]).unwrap();
        }
        let mut iter = engine
            .new_iterator(IterOptions::new(Key::from("a"), Key::from("c")))
            .unwrap();
        assert!(!iter.valid().unwrap());

        iter.seek_ge(&MvccKey::metadata(Key::from("a")));
        assert_eq!(iter.key().unwrap().to_string(), "a/2");
        iter.next_key();
        assert_eq!(iter.key().unwrap().to_string(), "b/5");
        iter.prev();
        assert_eq!(iter.key().unwrap().to_string(), "a/1");
        iter.next();
        iter.next();
        // "c" is outside the upper bound
        assert!(!iter.valid().unwrap());

        iter.seek_lt(&MvccKey::metadata(Key::from("b")));
        assert_eq!(iter.key().unwrap().to_string(), "a/1");
        iter.seek_lt(&MvccKey::metadata(Key::from("a")));
        assert!(!iter.valid().unwrap());

        iter.close();
        assert!(iter.valid().is_err());
    }

    #[test]
    fn test_iterator_is_a_snapshot() {
        let mut engine = MemEngine::ephemeral("mem");
        engine.put_raw(mk("a", 1), vec![]).unwrap();
        let mut iter = engine
            .new_iterator(IterOptions::new(Key::MIN, Key::from("z")))
            .unwrap();
        engine.put_raw(mk("b", 1), vec![]).unwrap();
        iter.seek_ge(&MvccKey::metadata(Key::from("b")));
        assert!(!iter.valid().unwrap());
    }

    #[test]
    fn test_reopen_restores_image() {
        let dir = TempDir::new().unwrap();
        for durability in [DurabilityMode::Strict, DurabilityMode::Buffered] {
            let path = dir.path().join(format!("{:?}", durability));
            let mut engine = MemEngine::open("mem", &path, durability).unwrap();
            engine.put_raw(mk("k", 3), b"v".to_vec()).unwrap();
            engine.put_raw(MvccKey::metadata(Key::from("k")), b"m".to_vec()).unwrap();
            engine.close().unwrap();
            assert!(engine.get_raw(&mk("k", 3)).is_err());

            let engine = MemEngine::open("mem", &path, durability).unwrap();
            assert_eq!(engine.len(), 2);
            assert_eq!(engine.get_raw(&mk("k", 3)).unwrap(), Some(b"v".to_vec()));
        }
    }

    #[test]
    fn test_ingest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.sst");
        let mut w = SstWriter::for_ingestion(&path).unwrap();
        w.put(&mk("a", 4), b"i".to_vec().as_slice()).unwrap();
        w.put(&mk("b", 2), b"j").unwrap();
        w.finish().unwrap();

        let mut engine = MemEngine::ephemeral("mem");
        engine.ingest_external_files(&[path]).unwrap();
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.get_raw(&mk("b", 2)).unwrap(), Some(b"j".to_vec()));
    }

    #[test]
    fn test_factory_opens_named_engines() {
        let dir = TempDir::new().unwrap();
        let factory = MemEngineFactory::new("mem-strict", DurabilityMode::Strict);
        let mut engine = factory.open(dir.path()).unwrap();
        assert_eq!(engine.name(), "mem-strict");
        engine.compact_range(&Key::MIN, &Key::from("z")).unwrap();
        engine.close().unwrap();
    }
}
