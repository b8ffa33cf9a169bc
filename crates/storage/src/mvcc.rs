//! Multi-version reads and writes over a raw engine
//!
//! Every user key owns a sequence of versions `key@ts` (newest first) and at
//! most one metadata record `key@0`. The metadata record exists only while a
//! transaction holds an intent on the key; it names the transaction and the
//! timestamp of its provisional version.
//!
//! ## Visibility
//!
//! A read at `ts` returns the newest version at or below `ts`, with these
//! adjustments for an intent on the key:
//!
//! - owned by the reading transaction: the provisional version is visible
//! - owned by another transaction at or below `ts`: conflict, unless the read
//!   is inconsistent, in which case the provisional version is skipped and the
//!   intent is reported alongside the result
//! - owned by another transaction above `ts`: ignored
//!
//! All functions are generic over [`Reader`] / [`ReadWriter`] so they run
//! unchanged against an engine or a batch.

use serde::{Deserialize, Serialize};
use std::fmt;

use strata_core::{
    Error, Intent, Key, LockUpdate, MvccKey, Result, Span, Timestamp, Transaction, TxnMeta,
    TxnStatus, Value,
};

use crate::engine::{ReadWriter, Reader};

/// Metadata record of a key holding an intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccMetadata {
    /// Owning transaction
    pub txn: TxnMeta,
    /// Timestamp of the provisional version
    pub timestamp: Timestamp,
}

impl MvccMetadata {
    fn decode(raw: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(raw)?)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// A value as seen by a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadValue {
    /// Live value
    Live(Value),
    /// Deletion marker (returned only when tombstones are requested)
    Tombstone,
}

impl ReadValue {
    /// Live value, if any
    pub fn live(&self) -> Option<&Value> {
        match self {
            ReadValue::Live(v) => Some(v),
            ReadValue::Tombstone => None,
        }
    }
}

impl fmt::Display for ReadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadValue::Live(v) => write!(f, "{}", v),
            ReadValue::Tombstone => f.write_str("<tombstone>"),
        }
    }
}

/// Options for [`mvcc_get`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MvccGetOptions<'a> {
    /// Skip conflicting intents instead of failing
    pub inconsistent: bool,
    /// Return deletion markers
    pub tombstones: bool,
    /// Reading transaction
    pub txn: Option<&'a Transaction>,
}

/// Options for [`mvcc_scan`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MvccScanOptions<'a> {
    /// Skip conflicting intents instead of failing
    pub inconsistent: bool,
    /// Return deletion markers
    pub tombstones: bool,
    /// Return results in descending key order
    pub reverse: bool,
    /// Reading transaction
    pub txn: Option<&'a Transaction>,
}

/// Result of a point read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MvccGetResult {
    /// Visible value
    pub value: Option<ReadValue>,
    /// Intent skipped by an inconsistent read
    pub intent: Option<Intent>,
}

/// Result of a range read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MvccScanResult {
    /// Visible key/value pairs
    pub kvs: Vec<(Key, ReadValue)>,
    /// Intents skipped by an inconsistent read
    pub intents: Vec<Intent>,
}

/// Outcome of reading one user key's records
struct KeyRead {
    value: Option<ReadValue>,
    intent: Option<Intent>,
    conflict: bool,
}

fn split_metadata(records: &[(MvccKey, Vec<u8>)]) -> Result<(Option<MvccMetadata>, &[(MvccKey, Vec<u8>)])> {
    match records.split_first() {
        Some(((key, raw), rest)) if !key.is_value() => Ok((Some(MvccMetadata::decode(raw)?), rest)),
        _ => Ok((None, records)),
    }
}

/// Apply visibility rules to the records of a single user key
fn read_key(
    key: &Key,
    records: &[(MvccKey, Vec<u8>)],
    ts: Timestamp,
    inconsistent: bool,
    tombstones: bool,
    txn: Option<&Transaction>,
) -> Result<KeyRead> {
    let (meta, versions) = split_metadata(records)?;
    let mut read_ts = ts;
    let mut skip_ts = None;
    let mut intent = None;
    let mut conflict = false;

    if let Some(meta) = meta {
        let own = txn.map_or(false, |t| t.meta.id == meta.txn.id);
        if own {
            read_ts.forward(meta.timestamp);
        } else {
            skip_ts = Some(meta.timestamp);
            if meta.timestamp <= ts {
                intent = Some(Intent {
                    key: key.clone(),
                    txn: meta.txn,
                });
                conflict = !inconsistent;
            }
        }
    }

    let mut value = None;
    for (version, raw) in versions {
        if version.timestamp > read_ts || Some(version.timestamp) == skip_ts {
            continue;
        }
        value = match Value::decode(raw)? {
            Some(v) => Some(ReadValue::Live(v)),
            None if tombstones => Some(ReadValue::Tombstone),
            None => None,
        };
        break;
    }
    Ok(KeyRead {
        value,
        intent,
        conflict,
    })
}

/// Read `key` at `ts`
pub fn mvcc_get<R: Reader + ?Sized>(
    reader: &R,
    key: &Key,
    ts: Timestamp,
    opts: MvccGetOptions<'_>,
) -> Result<MvccGetResult> {
    let records = reader.scan_raw(key, &key.next())?;
    let read = read_key(key, &records, ts, opts.inconsistent, opts.tombstones, opts.txn)?;
    if read.conflict {
        return Err(Error::WriteIntent(read.intent.into_iter().collect()));
    }
    Ok(MvccGetResult {
        value: read.value,
        intent: read.intent,
    })
}

/// Read every key in `[key, end_key)` at `ts`
///
/// An empty or inverted range yields an empty result.
pub fn mvcc_scan<R: Reader + ?Sized>(
    reader: &R,
    key: &Key,
    end_key: &Key,
    ts: Timestamp,
    opts: MvccScanOptions<'_>,
) -> Result<MvccScanResult> {
    let records = reader.scan_raw(key, end_key)?;
    let mut result = MvccScanResult::default();
    let mut conflicts = Vec::new();

    for group in records.chunk_by_user_key() {
        let user_key = &group[0].0.key;
        let read = read_key(user_key, group, ts, opts.inconsistent, opts.tombstones, opts.txn)?;
        if let Some(intent) = read.intent {
            if read.conflict {
                conflicts.push(intent);
            } else {
                result.intents.push(intent);
            }
        }
        if let Some(value) = read.value {
            result.kvs.push((user_key.clone(), value));
        }
    }

    if !conflicts.is_empty() {
        return Err(Error::WriteIntent(conflicts));
    }
    if opts.reverse {
        result.kvs.reverse();
        result.intents.reverse();
    }
    Ok(result)
}

/// Grouping of `MvccKey`-ordered records by user key
trait ChunkByUserKey {
    fn chunk_by_user_key(&self) -> Vec<&[(MvccKey, Vec<u8>)]>;
}

impl ChunkByUserKey for Vec<(MvccKey, Vec<u8>)> {
    fn chunk_by_user_key(&self) -> Vec<&[(MvccKey, Vec<u8>)]> {
        let mut groups = Vec::new();
        let mut start = 0;
        for i in 1..=self.len() {
            if i == self.len() || self[i].0.key != self[start].0.key {
                groups.push(&self[start..i]);
                start = i;
            }
        }
        groups
    }
}

/// Write a version (live value or tombstone) of `key` at `ts`
fn write_version<RW: ReadWriter + ?Sized>(
    rw: &mut RW,
    key: &Key,
    ts: Timestamp,
    raw: Vec<u8>,
    txn: Option<&Transaction>,
) -> Result<()> {
    if ts.is_zero() {
        return Err(Error::InvalidArgument(format!(
            "cannot write {} at the zero timestamp",
            key
        )));
    }
    let records = rw.scan_raw(key, &key.next())?;
    let (meta, versions) = split_metadata(&records)?;

    let mut own_provisional = None;
    if let Some(meta) = meta {
        match txn {
            Some(t) if t.meta.id == meta.txn.id => own_provisional = Some(meta.timestamp),
            _ => {
                return Err(Error::WriteIntent(vec![Intent {
                    key: key.clone(),
                    txn: meta.txn,
                }]))
            }
        }
    }

    let newest_committed = versions
        .iter()
        .map(|(k, _)| k.timestamp)
        .find(|v| Some(*v) != own_provisional);
    if let Some(existing) = newest_committed {
        if existing >= ts {
            return Err(Error::WriteTooOld {
                requested: ts,
                existing,
            });
        }
    }

    if let Some(old) = own_provisional {
        if old != ts {
            rw.clear_raw(&MvccKey::new(key.clone(), old))?;
        }
    }
    if let Some(t) = txn {
        let meta = MvccMetadata {
            txn: t.meta.clone(),
            timestamp: ts,
        };
        rw.put_raw(MvccKey::metadata(key.clone()), meta.encode()?)?;
    }
    rw.put_raw(MvccKey::new(key.clone(), ts), raw)
}

/// Write `value` to `key` at `ts`
pub fn mvcc_put<RW: ReadWriter + ?Sized>(
    rw: &mut RW,
    key: &Key,
    ts: Timestamp,
    value: &Value,
    txn: Option<&Transaction>,
) -> Result<()> {
    write_version(rw, key, ts, value.encode(), txn)
}

/// Write a deletion marker to `key` at `ts`
pub fn mvcc_delete<RW: ReadWriter + ?Sized>(
    rw: &mut RW,
    key: &Key,
    ts: Timestamp,
    txn: Option<&Transaction>,
) -> Result<()> {
    write_version(rw, key, ts, Value::tombstone(), txn)
}

fn current_live<RW: ReadWriter + ?Sized>(
    rw: &RW,
    key: &Key,
    ts: Timestamp,
    txn: Option<&Transaction>,
) -> Result<Option<ReadValue>> {
    let opts = MvccGetOptions {
        inconsistent: false,
        tombstones: true,
        txn,
    };
    Ok(mvcc_get(rw, key, ts, opts)?.value)
}

/// Write `value` only if the current value equals `expected`
///
/// A missing (or deleted) key satisfies the condition when
/// `allow_if_does_not_exist` is set or `expected` is `None`.
pub fn mvcc_conditional_put<RW: ReadWriter + ?Sized>(
    rw: &mut RW,
    key: &Key,
    ts: Timestamp,
    value: &Value,
    expected: Option<&Value>,
    allow_if_does_not_exist: bool,
    txn: Option<&Transaction>,
) -> Result<()> {
    let existing = current_live(&*rw, key, ts, txn)?;
    let actual = existing.as_ref().and_then(ReadValue::live);
    let matches = match (actual, expected) {
        (Some(a), Some(e)) => a == e,
        (None, None) => true,
        (None, Some(_)) => allow_if_does_not_exist,
        (Some(_), None) => false,
    };
    if !matches {
        return Err(Error::ConditionFailed {
            actual: actual.cloned(),
        });
    }
    mvcc_put(rw, key, ts, value, txn)
}

/// Write `value` only if the key is absent or already holds `value`
///
/// With `fail_on_tombstones`, a deleted key also fails the condition.
pub fn mvcc_init_put<RW: ReadWriter + ?Sized>(
    rw: &mut RW,
    key: &Key,
    ts: Timestamp,
    value: &Value,
    fail_on_tombstones: bool,
    txn: Option<&Transaction>,
) -> Result<()> {
    match current_live(&*rw, key, ts, txn)? {
        Some(ReadValue::Live(existing)) if &existing == value => Ok(()),
        Some(ReadValue::Live(existing)) => Err(Error::ConditionFailed {
            actual: Some(existing),
        }),
        Some(ReadValue::Tombstone) if fail_on_tombstones => {
            Err(Error::ConditionFailed { actual: None })
        }
        _ => mvcc_put(rw, key, ts, value, txn),
    }
}

/// Delete every live key in `[key, end_key)` at `ts`
///
/// `max_keys == 0` means unlimited. Returns the deleted keys.
pub fn mvcc_delete_range<RW: ReadWriter + ?Sized>(
    rw: &mut RW,
    key: &Key,
    end_key: &Key,
    max_keys: usize,
    ts: Timestamp,
    txn: Option<&Transaction>,
) -> Result<Vec<Key>> {
    let opts = MvccScanOptions {
        txn,
        ..MvccScanOptions::default()
    };
    let live = mvcc_scan(&*rw, key, end_key, ts, opts)?;
    let limit = if max_keys == 0 { usize::MAX } else { max_keys };
    let mut deleted = Vec::new();
    for (k, _) in live.kvs.into_iter().take(limit) {
        mvcc_delete(rw, &k, ts, txn)?;
        deleted.push(k);
    }
    Ok(deleted)
}

/// Remove versions with `start_time < ts <= end_time` in `[key, end_key)`
///
/// Removal stops after `max_batch_size` versions; the remaining span is
/// returned so the caller can resume. Intents inside the time window are a
/// conflict.
pub fn mvcc_clear_time_range<RW: ReadWriter + ?Sized>(
    rw: &mut RW,
    key: &Key,
    end_key: &Key,
    start_time: Timestamp,
    end_time: Timestamp,
    max_batch_size: usize,
) -> Result<Option<Span>> {
    let records = rw.scan_raw(key, end_key)?;
    let in_window = |ts: Timestamp| start_time < ts && ts <= end_time;

    let mut intents = Vec::new();
    for (k, raw) in &records {
        if !k.is_value() {
            let meta = MvccMetadata::decode(raw)?;
            if in_window(meta.timestamp) {
                intents.push(Intent {
                    key: k.key.clone(),
                    txn: meta.txn,
                });
            }
        }
    }
    if !intents.is_empty() {
        return Err(Error::WriteIntent(intents));
    }

    let mut cleared = 0;
    for (k, _) in records.iter().filter(|(k, _)| k.is_value() && in_window(k.timestamp)) {
        if max_batch_size > 0 && cleared == max_batch_size {
            return Ok(Some(Span::range(k.key.clone(), end_key.clone())));
        }
        rw.clear_raw(k)?;
        cleared += 1;
    }
    Ok(None)
}

/// Find a key splitting `[key, end_key)` so the left side holds at least
/// `target_size` bytes
///
/// The first key of the range is never returned. `None` when no key
/// qualifies.
pub fn mvcc_find_split_key<R: Reader + ?Sized>(
    reader: &R,
    key: &Key,
    end_key: &Key,
    target_size: usize,
) -> Result<Option<Key>> {
    let records = reader.scan_raw(key, end_key)?;
    let mut left_size = 0;
    for (i, group) in records.chunk_by_user_key().into_iter().enumerate() {
        if i > 0 && left_size >= target_size {
            return Ok(Some(group[0].0.key.clone()));
        }
        left_size += group
            .iter()
            .map(|(k, v)| k.encoded_size() + v.len())
            .sum::<usize>();
    }
    Ok(None)
}

/// Resolve the intents of `update.txn` within `update.span`
///
/// Committed intents become regular versions at the transaction's write
/// timestamp; aborted ones are removed; pending ones are pushed to a newer
/// write timestamp. Returns whether any intent was touched.
pub fn mvcc_resolve_write_intent<RW: ReadWriter + ?Sized>(
    rw: &mut RW,
    update: &LockUpdate,
) -> Result<bool> {
    let end = match &update.span.end_key {
        Some(end) => end.clone(),
        None => update.span.key.next(),
    };
    let records = rw.scan_raw(&update.span.key, &end)?;
    let mut owned = Vec::new();
    for (k, raw) in &records {
        if !k.is_value() {
            let meta = MvccMetadata::decode(raw)?;
            if meta.txn.id == update.txn.id {
                owned.push((k.key.clone(), meta));
            }
        }
    }

    let mut resolved = false;
    for (key, meta) in owned {
        resolved |= resolve_key(rw, &key, meta, update)?;
    }
    Ok(resolved)
}

fn resolve_key<RW: ReadWriter + ?Sized>(
    rw: &mut RW,
    key: &Key,
    meta: MvccMetadata,
    update: &LockUpdate,
) -> Result<bool> {
    let provisional = MvccKey::new(key.clone(), meta.timestamp);
    let target_ts = update.txn.write_timestamp;
    match update.status {
        TxnStatus::Committed => {
            if target_ts != meta.timestamp {
                move_version(rw, &provisional, target_ts)?;
            }
            rw.clear_raw(&MvccKey::metadata(key.clone()))?;
            Ok(true)
        }
        TxnStatus::Aborted => {
            rw.clear_raw(&provisional)?;
            rw.clear_raw(&MvccKey::metadata(key.clone()))?;
            Ok(true)
        }
        TxnStatus::Pending => {
            if target_ts <= meta.timestamp {
                return Ok(false);
            }
            move_version(rw, &provisional, target_ts)?;
            let pushed = MvccMetadata {
                txn: update.txn.clone(),
                timestamp: target_ts,
            };
            rw.put_raw(MvccKey::metadata(key.clone()), pushed.encode()?)?;
            Ok(true)
        }
    }
}

fn move_version<RW: ReadWriter + ?Sized>(rw: &mut RW, from: &MvccKey, to: Timestamp) -> Result<()> {
    let raw = rw.get_raw(from)?.ok_or_else(|| {
        Error::Corruption(format!("intent metadata without provisional version at {}", from))
    })?;
    rw.clear_raw(from)?;
    rw.put_raw(MvccKey::new(from.key.clone(), to), raw)
}
