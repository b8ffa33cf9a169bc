//! StrataDB metamorphic - equivalence testing for MVCC storage engines
//!
//! Generates seeded sequences of MVCC operations, runs them against one
//! engine while recording a trace, then replays the trace on other engines
//! and engine sequences (swapped by restarts) to detect divergent behavior.
//!
//! # Quick Start
//!
//! ```no_run
//! use stratadb_metamorphic::{MetaTest, MetaTestConfig};
//!
//! let config = MetaTestConfig {
//!     seed: Some(7),
//!     num_ops: 500,
//!     ..MetaTestConfig::default()
//! };
//! let outcome = MetaTest::new(config)?.run()?;
//! for report in &outcome.reports {
//!     println!("{}", report);
//! }
//! # Ok::<(), stratadb_metamorphic::MetaError>(())
//! ```
//!
//! # Architecture
//!
//! - `strata-core`: keys, timestamps, values, transaction records
//! - `strata-storage`: engine capability set, the reference engine and MVCC
//!   functions over any engine or batch
//! - `strata-metamorphic`: operand generators, operation catalog, runner and
//!   multi-engine driver

pub use strata_metamorphic::*;

/// Keys, timestamps, values and transaction records
pub use strata_core as types;

/// Engines and MVCC functions
pub use strata_storage as storage;
