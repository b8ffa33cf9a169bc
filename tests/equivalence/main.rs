//! Cross-engine equivalence tests
//!
//! Seeds are generated on one engine sequence and replayed on others; every
//! replay must reproduce the recorded trace.

mod common;

mod config_files;
mod replay;
mod restarts;
