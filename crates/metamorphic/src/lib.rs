//! Metamorphic testing for MVCC storage engines
//!
//! This crate generates random but valid sequences of MVCC operations from a
//! seed, runs them against an engine and records every result in a plain text
//! trace. The same trace replayed on a different engine, or on a sequence of
//! engines swapped by restarts, must produce identical output.
//!
//! # Architecture
//!
//! - [`operands`]: per-kind operand generators tracking which keys,
//!   timestamps, transactions, batches and iterators are live
//! - [`catalog`]: the table of operation kinds with their weights, operand
//!   lists and prerequisite rules
//! - [`generator`]: weighted drawing and recursive dependency resolution
//! - [`operations`]: runnable operations and their output formats
//! - [`state`]: the engine and live resources of a running sequence
//! - [`runner`]: generate-and-run and parse-and-run over a trace
//! - [`meta_test`]: multi-engine equivalence driver, serial or parallel
//!
//! # Example
//!
//! ```no_run
//! use strata_metamorphic::{MetaTest, MetaTestConfig};
//!
//! let config = MetaTestConfig {
//!     seed: Some(42),
//!     restarts: true,
//!     ..MetaTestConfig::default()
//! };
//! let outcome = MetaTest::new(config)?.run()?;
//! assert!(outcome.is_clean());
//! # Ok::<(), strata_metamorphic::MetaError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod deck;
pub mod error;
pub mod generator;
pub mod ids;
pub mod meta_test;
pub mod operands;
pub mod operations;
pub mod report;
pub mod runner;
pub mod state;
pub mod trace;

pub use catalog::{op_generator, OpGenerator, OpReference, OP_GENERATORS};
pub use config::{EngineConfig, MetaTestConfig, CONFIG_FILE_NAME};
pub use deck::Deck;
pub use error::{MetaError, MetaResult};
pub use generator::{OpRun, SequenceGenerator};
pub use ids::{BatchId, IteratorId, ReadWriterId, TxnId};
pub use meta_test::{MetaTest, SeedOutcome};
pub use operands::{Generators, OperandGenerator, OperandType};
pub use operations::MvccOp;
pub use report::{outputs_match, CheckReport, Divergence};
pub use runner::{MetaTestRunner, RunnerOptions};
pub use state::RunState;
pub use trace::{parse_trace, TraceLine};
