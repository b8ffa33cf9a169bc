//! Equivalence test driver
//!
//! [`MetaTest`] runs one seed end to end: the first engine sequence
//! generates and records a trace, every other sequence replays it and
//! reports divergences. Independent seeds can run on parallel threads,
//! each with its own directories and generators.

use std::collections::BTreeMap;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use strata_storage::EngineFactory;
use tempfile::TempDir;

use crate::config::{MetaTestConfig, CONFIG_FILE_NAME};
use crate::error::{MetaError, MetaResult};
use crate::report::CheckReport;
use crate::runner::{MetaTestRunner, RunnerOptions};

/// Trace file written for each run in the output directory
const TRACE_EXTENSION: &str = "meta";

/// Result of one seed across all engine sequences
#[derive(Debug, Clone)]
pub struct SeedOutcome {
    /// Seed the trace was generated from
    pub seed: u64,
    /// Trace recorded by the first engine sequence
    pub trace: String,
    /// One report per replaying sequence, in configuration order
    pub reports: Vec<CheckReport>,
}

impl SeedOutcome {
    /// True when every replay matched the recorded trace
    pub fn is_clean(&self) -> bool {
        self.reports.iter().all(CheckReport::is_clean)
    }

    /// Total divergences across replays
    pub fn divergence_count(&self) -> usize {
        self.reports.iter().map(|r| r.divergences.len()).sum()
    }
}

/// Driver for generate-then-replay equivalence runs
pub struct MetaTest {
    config: MetaTestConfig,
    profiles: BTreeMap<String, Arc<dyn EngineFactory>>,
}

impl std::fmt::Debug for MetaTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaTest")
            .field("config", &self.config)
            .field("profiles", &self.profiles.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MetaTest {
    /// Validate `config` and build a factory for each engine profile
    pub fn new(config: MetaTestConfig) -> MetaResult<Self> {
        config.validate()?;
        let profiles = config
            .engines
            .iter()
            .map(|e| (e.name.clone(), e.factory()))
            .collect();
        Ok(MetaTest { config, profiles })
    }

    /// Load the config file at `path` and build a driver from it
    pub fn from_file(path: &Path) -> MetaResult<Self> {
        Self::new(MetaTestConfig::from_file(path)?)
    }

    /// Use `factory` for the profile of the same name
    pub fn with_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.profiles.insert(factory.name().to_string(), factory);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &MetaTestConfig {
        &self.config
    }

    fn sequence(&self, index: usize) -> MetaResult<Vec<Arc<dyn EngineFactory>>> {
        let names = self
            .config
            .engine_sequences
            .get(index)
            .ok_or_else(|| MetaError::Config(format!("no engine sequence {}", index)))?;
        names
            .iter()
            .map(|name| {
                self.profiles
                    .get(name)
                    .cloned()
                    .ok_or_else(|| MetaError::Config(format!("unknown engine profile '{}'", name)))
            })
            .collect()
    }

    fn options(&self, seed: u64, index: usize) -> MetaResult<RunnerOptions> {
        Ok(RunnerOptions {
            seed,
            restarts: self.config.restarts,
            engine_sequence: self.sequence(index)?,
        })
    }

    /// Run the configured seed, or a clock-derived one
    pub fn run(&self) -> MetaResult<SeedOutcome> {
        self.run_seed(self.config.resolved_seed())
    }

    /// Generate a trace for `seed` and replay it on every other sequence
    pub fn run_seed(&self, seed: u64) -> MetaResult<SeedOutcome> {
        let scratch = TempDir::new()?;
        let out_dir = self.seed_output_dir(seed)?;

        let dir = engine_dir(scratch.path(), 0)?;
        let mut runner = MetaTestRunner::new(&dir, self.options(seed, 0)?, Vec::new())?;
        runner.generate_and_run(self.config.num_ops)?;
        let trace = String::from_utf8_lossy(&runner.finish()?).into_owned();
        if let Some(out) = &out_dir {
            fs::write(out.join(trace_file_name(0)), &trace)?;
        }

        let mut reports = Vec::with_capacity(self.config.engine_sequences.len().saturating_sub(1));
        for index in 1..self.config.engine_sequences.len() {
            let dir = engine_dir(scratch.path(), index)?;
            let mut runner = MetaTestRunner::new(&dir, self.options(seed, index)?, Vec::new())?;
            let report = runner.parse_and_run(trace.as_bytes())?;
            let replayed = runner.finish()?;

            if report.is_clean() {
                tracing::info!(seed, engines = ?report.engines, ops = report.ops_checked, "replay matched");
            } else {
                tracing::warn!(
                    seed,
                    engines = ?report.engines,
                    divergences = report.divergences.len(),
                    "replay diverged"
                );
            }
            if let Some(out) = &out_dir {
                fs::write(out.join(trace_file_name(index)), &replayed)?;
                report.write_json(&out.join(format!("run-{}.report.json", index)))?;
            }
            reports.push(report);
        }

        Ok(SeedOutcome {
            seed,
            trace,
            reports,
        })
    }

    /// Run several seeds on parallel threads
    ///
    /// Outcomes are returned in the order of `seeds`. The first failing
    /// seed's error is returned.
    pub fn run_parallel(&self, seeds: &[u64]) -> MetaResult<Vec<SeedOutcome>> {
        thread::scope(|scope| {
            let handles: Vec<_> = seeds
                .iter()
                .map(|&seed| (seed, scope.spawn(move || self.run_seed(seed))))
                .collect();
            handles
                .into_iter()
                .map(|(seed, handle)| {
                    handle
                        .join()
                        .map_err(|_| MetaError::WorkerPanicked { seed })
                        .and_then(|result| result)
                })
                .collect()
        })
    }

    /// Replay an existing trace on every configured sequence
    pub fn check<R: BufRead>(&self, mut input: R) -> MetaResult<Vec<CheckReport>> {
        let mut trace = String::new();
        input.read_to_string(&mut trace)?;
        let scratch = TempDir::new()?;

        let mut reports = Vec::with_capacity(self.config.engine_sequences.len());
        for index in 0..self.config.engine_sequences.len() {
            let dir = engine_dir(scratch.path(), index)?;
            let mut runner = MetaTestRunner::new(&dir, self.options(0, index)?, std::io::sink())?;
            let report = runner.parse_and_run(trace.as_bytes())?;
            runner.finish()?;
            reports.push(report);
        }
        Ok(reports)
    }

    fn seed_output_dir(&self, seed: u64) -> MetaResult<Option<PathBuf>> {
        let Some(root) = &self.config.output_dir else {
            return Ok(None);
        };
        let dir = root.join(format!("seed-{}", seed));
        fs::create_dir_all(&dir)?;
        let config = MetaTestConfig {
            seed: Some(seed),
            ..self.config.clone()
        };
        config.write_to_file(&dir.join(CONFIG_FILE_NAME))?;
        Ok(Some(dir))
    }
}

fn engine_dir(root: &Path, index: usize) -> MetaResult<PathBuf> {
    let dir = root.join(format!("engine-{}", index));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn trace_file_name(index: usize) -> String {
    format!("run-{}.{}", index, TRACE_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_ops: usize, restarts: bool, sequences: &[&[&str]]) -> MetaTestConfig {
        MetaTestConfig {
            seed: Some(17),
            num_ops,
            restarts,
            engine_sequences: sequences
                .iter()
                .map(|s| s.iter().map(|n| n.to_string()).collect())
                .collect(),
            ..MetaTestConfig::default()
        }
    }

    #[test]
    fn test_run_default_sequences() {
        let test = MetaTest::new(config(200, false, &[&["mem-strict"], &["mem-buffered"]])).unwrap();
        let outcome = test.run().unwrap();
        assert_eq!(outcome.seed, 17);
        assert!(outcome.trace.starts_with("# seed: 17\n"));
        assert_eq!(outcome.reports.len(), 1);
        assert!(outcome.is_clean(), "{}", outcome.reports[0]);
        assert_eq!(outcome.divergence_count(), 0);
    }

    #[test]
    fn test_single_sequence_has_no_reports() {
        let test = MetaTest::new(config(20, false, &[&["mem-strict"]])).unwrap();
        let outcome = test.run_seed(3).unwrap();
        assert!(outcome.reports.is_empty());
        assert!(outcome.is_clean());
    }

    #[test]
    fn test_restarts_across_engines() {
        let sequences: &[&[&str]] = &[&["mem-strict", "mem-buffered"], &["mem-buffered"], &["mem-strict"]];
        let test = MetaTest::new(config(400, true, sequences)).unwrap();
        let outcome = test.run_seed(8).unwrap();
        assert_eq!(outcome.reports.len(), 2);
        assert!(outcome.is_clean());
    }

    #[test]
    fn test_output_dir_keeps_artifacts() {
        let out = TempDir::new().unwrap();
        let mut cfg = config(50, false, &[&["mem-strict"], &["mem-buffered"]]);
        cfg.output_dir = Some(out.path().to_path_buf());
        let outcome = MetaTest::new(cfg).unwrap().run_seed(5).unwrap();

        let seed_dir = out.path().join("seed-5");
        assert_eq!(fs::read_to_string(seed_dir.join("run-0.meta")).unwrap(), outcome.trace);
        assert!(seed_dir.join("run-1.meta").exists());
        let report = fs::read_to_string(seed_dir.join("run-1.report.json")).unwrap();
        assert!(CheckReport::from_json(&report).unwrap().is_clean());
        let saved = MetaTestConfig::from_file(&seed_dir.join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(saved.seed, Some(5));
    }

    #[test]
    fn test_run_parallel_matches_serial() {
        let test = MetaTest::new(config(100, false, &[&["mem-strict"], &["mem-buffered"]])).unwrap();
        let outcomes = test.run_parallel(&[1, 2, 3]).unwrap();
        assert_eq!(outcomes.iter().map(|o| o.seed).collect::<Vec<_>>(), vec![1, 2, 3]);
        for outcome in &outcomes {
            assert!(outcome.is_clean());
            assert_eq!(outcome.trace, test.run_seed(outcome.seed).unwrap().trace);
        }
    }

    #[test]
    fn test_check_existing_trace() {
        let test = MetaTest::new(config(10, false, &[&["mem-strict"], &["mem-buffered"]])).unwrap();
        let trace = "txn_open 1 t1 # t1\nmvcc_put engine a/0 v t1 # ok\ntxn_commit t1 # ok\n";
        let reports = test.check(trace.as_bytes()).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.is_clean() && r.ops_checked == 3));
    }

    #[test]
    fn test_unknown_profile_rejected() {
        let err = MetaTest::new(config(10, false, &[&["rocks"]])).unwrap_err();
        assert!(matches!(err, MetaError::Config(_)));
    }
}
