//! Test runner
//!
//! [`MetaTestRunner`] ties the operand generators, the operation sequence
//! and the run state together. It has two modes:
//!
//! - [`generate_and_run`](MetaTestRunner::generate_and_run): draw a fresh
//!   sequence from the seed, run it, write the trace
//! - [`parse_and_run`](MetaTestRunner::parse_and_run): bind a recorded
//!   trace, run it, and compare every output with the recorded one
//!
//! Both modes bind every operation before running any of them. While
//! replaying, an operation naming a resource that is not open records
//! `error: ...` as its output and the replay continues; any other runtime
//! failure aborts with the line number of the operation.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use strata_storage::EngineFactory;

use crate::catalog::op_generator;
use crate::error::{MetaError, MetaResult};
use crate::generator::{OpRun, SequenceGenerator};
use crate::operands::Generators;
use crate::report::{outputs_match, CheckReport, Divergence};
use crate::state::RunState;
use crate::trace::{format_comment, format_line, parse_trace};

/// Settings of one runner
#[derive(Clone)]
pub struct RunnerOptions {
    /// Seed for operation generation
    pub seed: u64,
    /// Whether `restart` operations swap engines
    pub restarts: bool,
    /// Engines to run on; restarts cycle through them
    pub engine_sequence: Vec<Arc<dyn EngineFactory>>,
}

impl std::fmt::Debug for RunnerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engines: Vec<&str> = self.engine_sequence.iter().map(|e| e.name()).collect();
        f.debug_struct("RunnerOptions")
            .field("seed", &self.seed)
            .field("restarts", &self.restarts)
            .field("engine_sequence", &engines)
            .finish()
    }
}

/// Runs operation sequences against an engine sequence, writing a trace
pub struct MetaTestRunner<W: Write> {
    seed: u64,
    generators: Generators,
    sequence: SequenceGenerator,
    state: RunState,
    out: W,
}

impl<W: Write> MetaTestRunner<W> {
    /// Open the first engine in `dir` and prepare to write the trace to `out`
    pub fn new(dir: &Path, opts: RunnerOptions, out: W) -> MetaResult<Self> {
        let state = RunState::open(dir, opts.engine_sequence, opts.restarts)?;
        Ok(MetaTestRunner {
            seed: opts.seed,
            generators: Generators::new(opts.restarts),
            sequence: SequenceGenerator::new(opts.seed),
            state,
            out,
        })
    }

    /// Generation seed
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Run state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Operand generators
    pub fn generators(&self) -> &Generators {
        &self.generators
    }

    /// Generate `n` operations (plus prerequisites) and run them
    ///
    /// Returns the number of operations run.
    pub fn generate_and_run(&mut self, n: usize) -> MetaResult<usize> {
        writeln!(self.out, "{}", format_comment(&format!("seed: {}", self.seed)))?;
        let ops = self.sequence.generate(&mut self.generators, n)?;
        tracing::info!(
            seed = self.seed,
            ops = ops.len(),
            engine = self.state.engine_name(),
            "running generated operations"
        );
        for op in &ops {
            let output = self.run_op(op)?;
            writeln!(self.out, "{}", format_line(&op.command(), &output))?;
        }
        self.out.flush()?;
        Ok(ops.len())
    }

    /// Replay a recorded trace and compare outputs
    pub fn parse_and_run<R: BufRead>(&mut self, input: R) -> MetaResult<CheckReport> {
        let mut ops = Vec::new();
        for line in parse_trace(input)? {
            let generator = op_generator(&line.name).ok_or_else(|| MetaError::UnknownOperation {
                line: line.line,
                name: line.name.clone(),
            })?;
            let op = generator
                .construct(&mut self.generators, &line.args)
                .map_err(|e| MetaError::Parse {
                    line: line.line,
                    message: e.to_string(),
                })?;
            ops.push(OpRun {
                generator,
                args: line.args,
                op,
                line: Some(line.line),
                expected: Some(line.output),
            });
        }
        tracing::info!(
            ops = ops.len(),
            engine = self.state.engine_name(),
            "replaying trace"
        );

        let mut report = CheckReport {
            engines: self.state.engine_names(),
            ..CheckReport::default()
        };
        for op in &ops {
            let actual = match self.run_op(op) {
                Ok(output) => output,
                // A recorded trace may name a resource this run never opened
                Err(e @ MetaError::MissingResource { .. }) => {
                    for comment in self.state.take_comments() {
                        writeln!(self.out, "{}", format_comment(&comment))?;
                    }
                    format!("error: {}", e)
                }
                Err(e) => {
                    return Err(MetaError::Parse {
                        line: op.line.unwrap_or_default(),
                        message: e.to_string(),
                    })
                }
            };
            writeln!(self.out, "{}", format_line(&op.command(), &actual))?;
            report.ops_checked += 1;

            let expected = op.expected.as_deref().unwrap_or_default();
            if !outputs_match(expected, &actual) {
                let divergence = Divergence {
                    line: op.line.unwrap_or_default(),
                    op: op.command(),
                    expected: expected.trim().to_string(),
                    actual: actual.trim().to_string(),
                };
                tracing::warn!(
                    line = divergence.line,
                    op = %divergence.op,
                    expected = %divergence.expected,
                    actual = %divergence.actual,
                    "output diverged"
                );
                report.divergences.push(divergence);
            }
        }
        self.out.flush()?;
        Ok(report)
    }

    fn run_op(&mut self, op: &OpRun) -> MetaResult<String> {
        let output = op.op.run(&mut self.state)?;
        for comment in self.state.take_comments() {
            writeln!(self.out, "{}", format_comment(&comment))?;
        }
        Ok(output)
    }

    /// Close every resource and the engine, returning the trace sink
    pub fn finish(mut self) -> MetaResult<W> {
        self.state.close_all()?;
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::{DurabilityMode, MemEngineFactory};
    use tempfile::TempDir;

    fn options(seed: u64, restarts: bool, names: &[&str]) -> RunnerOptions {
        RunnerOptions {
            seed,
            restarts,
            engine_sequence: names
                .iter()
                .map(|n| Arc::new(MemEngineFactory::new(*n, DurabilityMode::Strict)) as Arc<dyn EngineFactory>)
                .collect(),
        }
    }

    fn generate(seed: u64, n: usize) -> String {
        let dir = TempDir::new().unwrap();
        let mut runner = MetaTestRunner::new(dir.path(), options(seed, false, &["a"]), Vec::new()).unwrap();
        runner.generate_and_run(n).unwrap();
        String::from_utf8(runner.finish().unwrap()).unwrap()
    }

    fn replay(trace: &str, names: &[&str], restarts: bool) -> CheckReport {
        let dir = TempDir::new().unwrap();
        let mut runner = MetaTestRunner::new(dir.path(), options(0, restarts, names), Vec::new()).unwrap();
        let report = runner.parse_and_run(trace.as_bytes()).unwrap();
        runner.finish().unwrap();
        report
    }

    #[test]
    fn test_trace_starts_with_seed() {
        let trace = generate(9, 5);
        assert_eq!(trace.lines().next(), Some("# seed: 9"));
    }

    #[test]
    fn test_same_seed_same_trace() {
        assert_eq!(generate(21, 200), generate(21, 200));
    }

    #[test]
    fn test_replay_is_clean() {
        let trace = generate(33, 300);
        let report = replay(&trace, &["b"], false);
        assert!(report.is_clean(), "{}", report);
        assert!(report.ops_checked >= 300);
    }

    #[test]
    fn test_tampered_output_is_reported() {
        let trace = "txn_open 1 t1 # t1\n\
                     mvcc_put engine a/0 v t1 # ok\n\
                     txn_commit t1 # ok\n\
                     mvcc_inconsistent_get engine a/0 2 # val = w, intent = false\n";
        let report = replay(trace, &["a"], false);
        assert_eq!(report.ops_checked, 4);
        assert_eq!(report.divergences.len(), 1);
        let d = &report.divergences[0];
        assert_eq!(d.line, 4);
        assert_eq!(d.op, "mvcc_inconsistent_get engine a/0 2");
        assert_eq!(d.actual, "val = v, intent = false");
    }

    #[test]
    fn test_error_outputs_match_loosely() {
        let trace = "txn_open 1 t1 # t1\n\
                     txn_open 2 t2 # t2\n\
                     mvcc_put engine a/0 v t1 # ok\n\
                     mvcc_get engine a/0 t2 # error: some other engine's wording\n";
        assert!(replay(trace, &["a"], false).is_clean());
    }

    #[test]
    fn test_unknown_operation_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut runner = MetaTestRunner::new(dir.path(), options(0, false, &["a"]), Vec::new()).unwrap();
        let err = runner
            .parse_and_run("txn_open 1 t1 # t1\nmvcc_frobnicate a # ok\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, MetaError::UnknownOperation { line: 2, .. }));
    }

    #[test]
    fn test_missing_resource_becomes_error_output() {
        let report = replay("txn_commit t4 # ok\n", &["a"], false);
        assert_eq!(report.ops_checked, 1);
        assert_eq!(report.divergences.len(), 1);
        assert_eq!(report.divergences[0].line, 1);
        assert_eq!(report.divergences[0].actual, "error: transaction t4 is not open");
    }

    #[test]
    fn test_missing_resource_matches_recorded_error() {
        assert!(replay("txn_commit t4 # error: txn not found\n", &["a"], false).is_clean());
    }

    #[test]
    fn test_restart_comments_in_trace() {
        let trace = "txn_open 1 t1 # t1\nrestart # ok\n";
        let dir = TempDir::new().unwrap();
        let mut runner = MetaTestRunner::new(dir.path(), options(0, true, &["a", "b"]), Vec::new()).unwrap();
        assert!(runner.parse_and_run(trace.as_bytes()).unwrap().is_clean());
        let out = String::from_utf8(runner.finish().unwrap()).unwrap();
        assert_eq!(out, "txn_open 1 t1 # t1\n# restarting: a -> b\nrestart # ok\n");
    }
}
