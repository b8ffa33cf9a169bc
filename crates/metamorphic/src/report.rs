//! Replay check results
//!
//! A [`CheckReport`] lists every operation whose replayed output differs
//! from the recorded one. Reports serialize to JSON for archiving next to
//! the trace that produced them.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MetaResult;

/// Whether a replayed output matches the recorded one
///
/// Outputs are compared after trimming. Two outputs that both report an
/// error match regardless of wording, since engines phrase errors
/// differently.
pub fn outputs_match(expected: &str, actual: &str) -> bool {
    let expected = expected.trim();
    let actual = actual.trim();
    expected == actual || (expected.contains("error") && actual.contains("error"))
}

/// One operation whose output differed on replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    /// 1-based trace line
    pub line: usize,
    /// Operation with its operands
    pub op: String,
    /// Recorded output
    pub expected: String,
    /// Replayed output
    pub actual: String,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {}: expected {:?}, got {:?}",
            self.line, self.op, self.expected, self.actual
        )
    }
}

/// Outcome of replaying one trace on one engine sequence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    /// Engine sequence the trace was replayed on
    pub engines: Vec<String>,
    /// Operations replayed
    pub ops_checked: usize,
    /// Mismatches, in trace order
    pub divergences: Vec<Divergence>,
}

impl CheckReport {
    /// True when every output matched
    pub fn is_clean(&self) -> bool {
        self.divergences.is_empty()
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> MetaResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a report written by [`CheckReport::to_json`]
    pub fn from_json(json: &str) -> MetaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the JSON report to `path`
    pub fn write_json(&self, path: &Path) -> MetaResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ops checked on [{}], {} divergences",
            self.ops_checked,
            self.engines.join(", "),
            self.divergences.len()
        )?;
        for d in &self.divergences {
            write!(f, "\n  {}", d)?;
        }
        Ok(())
    }
}
