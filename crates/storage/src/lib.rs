//! Storage layer for the metamorphic harness
//!
//! This crate provides:
//! - The engine capability set ([`Engine`], [`Batch`], [`MvccIterator`], ...)
//! - MemEngine: reference engine over a `BTreeMap` with an on-disk image
//! - Sorted record files for ingestion and persistence
//! - MVCC reads, writes and intent resolution over any engine or batch
//!
//! # Layering
//!
//! Engines know nothing about versions or transactions; they store ordered
//! `MvccKey -> bytes` records. The [`mvcc`] module layers multi-version
//! semantics on top, so two engines that agree on raw records agree on every
//! MVCC result.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod mem;
pub mod mvcc;
pub mod sst;

pub use engine::{Batch, Engine, EngineFactory, IterOptions, MvccIterator, ReadWriter, Reader, Writer};
pub use mem::{DurabilityMode, MemBatch, MemEngine, MemEngineFactory, MemIterator, IMAGE_FILE_NAME};
pub use mvcc::{
    mvcc_clear_time_range, mvcc_conditional_put, mvcc_delete, mvcc_delete_range,
    mvcc_find_split_key, mvcc_get, mvcc_init_put, mvcc_put, mvcc_resolve_write_intent, mvcc_scan,
    MvccGetOptions, MvccGetResult, MvccMetadata, MvccScanOptions, MvccScanResult, ReadValue,
};
pub use sst::{read_sst, SstInfo, SstWriter, SST_FORMAT_VERSION, SST_MAGIC};
