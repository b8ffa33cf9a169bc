//! Driving runs from `metamorphic.toml`

use tempfile::TempDir;

use stratadb_metamorphic::{CheckReport, MetaTest, MetaTestConfig, CONFIG_FILE_NAME};

use crate::common::init_tracing;

#[test]
fn default_config_file_runs_clean() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    MetaTestConfig::write_default_if_missing(&path).unwrap();

    let test = MetaTest::from_file(&path).unwrap();
    assert_eq!(test.config().num_ops, 1000);
    let outcome = test.run_seed(31).unwrap();
    assert!(outcome.is_clean());
}

#[test]
fn output_dir_reproduces_the_run() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        format!(
            "seed = 4\nnum_ops = 150\nrestarts = true\noutput_dir = {:?}\n\
             engine_sequences = [[\"mem-strict\", \"mem-buffered\"], [\"mem-buffered\"]]\n",
            dir.path().join("out").display().to_string()
        ),
    )
    .unwrap();

    let first = MetaTest::from_file(&path).unwrap().run().unwrap();
    let seed_dir = dir.path().join("out").join("seed-4");
    let report = std::fs::read_to_string(seed_dir.join("run-1.report.json")).unwrap();
    assert!(CheckReport::from_json(&report).unwrap().is_clean());

    // The saved config pins the seed and regenerates the same trace
    let saved = MetaTestConfig::from_file(&seed_dir.join(CONFIG_FILE_NAME)).unwrap();
    let second = MetaTest::new(MetaTestConfig {
        output_dir: None,
        ..saved
    })
    .unwrap()
    .run()
    .unwrap();
    assert_eq!(first.trace, second.trace);
}
