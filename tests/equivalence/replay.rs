//! Replay idempotence across engines and seeds

use std::io::Write;
use std::sync::Arc;

use tempfile::TempDir;

use stratadb_metamorphic::storage::{DurabilityMode, EngineFactory, MemEngineFactory};
use stratadb_metamorphic::{MetaTestRunner, RunnerOptions};

use crate::common::{config, meta_test, op_lines};

#[test]
fn replay_reproduces_generated_trace() {
    let test = meta_test(config(500, false, &[&["mem-strict"], &["mem-buffered"], &["mem-strict"]]));
    for seed in [1, 2, 3, 42] {
        let outcome = test.run_seed(seed).unwrap();
        assert_eq!(outcome.reports.len(), 2);
        for report in &outcome.reports {
            assert!(report.is_clean(), "seed {}: {}", seed, report);
            assert_eq!(report.ops_checked, op_lines(&outcome.trace).len());
        }
    }
}

#[test]
fn replayed_trace_is_byte_identical_without_restarts() {
    let dir = TempDir::new().unwrap();
    let engines = |name: &str| RunnerOptions {
        seed: 12,
        restarts: false,
        engine_sequence: vec![Arc::new(MemEngineFactory::new(name, DurabilityMode::Strict)) as Arc<dyn EngineFactory>],
    };

    let gen_dir = dir.path().join("gen");
    std::fs::create_dir_all(&gen_dir).unwrap();
    let mut runner = MetaTestRunner::new(&gen_dir, engines("first"), Vec::new()).unwrap();
    runner.generate_and_run(400).unwrap();
    let trace = String::from_utf8(runner.finish().unwrap()).unwrap();

    let replay_dir = dir.path().join("replay");
    std::fs::create_dir_all(&replay_dir).unwrap();
    let mut runner = MetaTestRunner::new(&replay_dir, engines("second"), Vec::new()).unwrap();
    assert!(runner.parse_and_run(trace.as_bytes()).unwrap().is_clean());
    let replayed = String::from_utf8(runner.finish().unwrap()).unwrap();

    // The replay carries everything but the seed header
    let (header, body) = trace.split_once('\n').unwrap();
    assert_eq!(header, "# seed: 12");
    assert_eq!(replayed, body);
}

#[test]
fn parallel_seeds_match_serial_runs() {
    let test = meta_test(config(250, true, &[&["mem-strict", "mem-buffered"], &["mem-buffered"]]));
    let seeds = [5, 6, 7, 8];
    let parallel = test.run_parallel(&seeds).unwrap();
    for (seed, outcome) in seeds.iter().zip(&parallel) {
        assert_eq!(outcome.seed, *seed);
        assert!(outcome.is_clean());
        assert_eq!(outcome.trace, test.run_seed(*seed).unwrap().trace);
    }
}

#[test]
fn tampered_trace_reports_each_divergence() {
    let test = meta_test(config(300, false, &[&["mem-strict"], &["mem-buffered"]]));
    let outcome = test.run_seed(99).unwrap();

    let mut tampered = Vec::new();
    let mut changed = Vec::new();
    for (i, line) in outcome.trace.lines().enumerate() {
        if line.ends_with("# ok") && line.starts_with("mvcc_put") && changed.len() < 3 {
            writeln!(tampered, "{}", line.replace("# ok", "# okay")).unwrap();
            changed.push(i + 1);
        } else {
            writeln!(tampered, "{}", line).unwrap();
        }
    }
    assert!(!changed.is_empty());

    let reports = test.check(tampered.as_slice()).unwrap();
    assert_eq!(reports.len(), 2);
    for report in reports {
        let lines: Vec<usize> = report.divergences.iter().map(|d| d.line).collect();
        assert_eq!(lines, changed);
        assert!(report.divergences.iter().all(|d| d.expected == "okay" && d.actual == "ok"));
    }
}
