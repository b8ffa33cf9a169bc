//! Shared helpers for the equivalence suite

#![allow(dead_code)]

use std::sync::Once;

use stratadb_metamorphic::{MetaTest, MetaTestConfig};

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness, once per binary
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
            .try_init();
    });
}

/// Config with the given sequences over the default profiles
pub fn config(num_ops: usize, restarts: bool, sequences: &[&[&str]]) -> MetaTestConfig {
    MetaTestConfig {
        num_ops,
        restarts,
        engine_sequences: sequences
            .iter()
            .map(|s| s.iter().map(|n| n.to_string()).collect())
            .collect(),
        ..MetaTestConfig::default()
    }
}

/// Driver over `config`, with tracing routed to the harness
pub fn meta_test(config: MetaTestConfig) -> MetaTest {
    init_tracing();
    MetaTest::new(config).unwrap()
}

/// Operation lines of a trace, comments and blanks dropped
pub fn op_lines(trace: &str) -> Vec<&str> {
    trace
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect()
}
