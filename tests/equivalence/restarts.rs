//! Restarts cycling through engine sequences

use stratadb_metamorphic::{MetaTestRunner, RunnerOptions};

use crate::common::{config, meta_test, op_lines};

#[test]
fn restarts_replay_on_single_engine() {
    // More draws than the deck holds, so every restart card comes up
    let test = meta_test(config(
        2100,
        true,
        &[&["mem-strict", "mem-buffered"], &["mem-buffered"], &["mem-buffered", "mem-strict", "mem-strict"]],
    ));
    let outcome = test.run_seed(2024).unwrap();
    assert!(outcome.trace.contains("# restarting: mem-strict -> mem-buffered"));
    assert!(outcome.is_clean(), "{:?}", outcome.reports);
}

#[test]
fn restart_comments_name_the_engine_cycle() {
    let test = meta_test(config(10, true, &[&["mem-strict", "mem-buffered"]]));
    let trace = "txn_open 1 t1 # t1\n\
                 restart # ok\n\
                 restart # ok\n\
                 restart # ok\n";
    let dir = tempfile::TempDir::new().unwrap();
    let opts = RunnerOptions {
        seed: 0,
        restarts: true,
        engine_sequence: test
            .config()
            .engines
            .iter()
            .map(|e| e.factory())
            .collect(),
    };
    let mut runner = MetaTestRunner::new(dir.path(), opts, Vec::new()).unwrap();
    assert!(runner.parse_and_run(trace.as_bytes()).unwrap().is_clean());
    let out = String::from_utf8(runner.finish().unwrap()).unwrap();
    let comments: Vec<&str> = out.lines().filter(|l| l.starts_with('#')).collect();
    assert_eq!(
        comments,
        vec![
            "# restarting: mem-strict -> mem-buffered",
            "# restarting: mem-buffered -> mem-strict",
            "# restarting: mem-strict -> mem-buffered",
        ]
    );
    assert_eq!(op_lines(&out).len(), 4);
}

#[test]
fn data_survives_restarts() {
    let test = meta_test(config(10, true, &[&["mem-buffered", "mem-strict"]]));
    let trace = "txn_open 1 t1 # t1\n\
                 mvcc_put engine a/0 v1 t1 # ok\n\
                 txn_commit t1 # ok\n\
                 txn_open 2 t2 # t2\n\
                 mvcc_put engine b/0 v2 t2 # ok\n\
                 restart # ok\n\
                 mvcc_inconsistent_get engine a/0 9 # val = v1, intent = false\n\
                 mvcc_inconsistent_get engine b/0 9 # val = nil, intent = {b txn=00000002 ts=2}\n\
                 restart # ok\n\
                 mvcc_inconsistent_get engine a/0 9 # val = v1, intent = false\n";
    let reports = test.check(trace.as_bytes()).unwrap();
    assert!(reports[0].is_clean(), "{}", reports[0]);
}
