//! Test configuration via `metamorphic.toml`
//!
//! A run is described by a seed, an operation count, whether restarts are
//! enabled, a set of named engine profiles and the engine sequences to run.
//! The first sequence generates the trace; every other sequence replays it.
//! A default, commented `metamorphic.toml` can be written next to a test's
//! output so runs are reproducible by editing the file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use strata_storage::{DurabilityMode, EngineFactory, MemEngineFactory};

use crate::error::{MetaError, MetaResult};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "metamorphic.toml";

/// Default number of drawn operations per run
pub const DEFAULT_NUM_OPS: usize = 1000;

/// A named engine profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Profile name, referenced by engine sequences
    pub name: String,
    /// When the engine persists its image
    #[serde(default)]
    pub durability: DurabilityMode,
}

impl EngineConfig {
    /// Profile with the given name and durability
    pub fn new(name: impl Into<String>, durability: DurabilityMode) -> Self {
        EngineConfig {
            name: name.into(),
            durability,
        }
    }

    /// Factory opening engines of this profile
    pub fn factory(&self) -> Arc<dyn EngineFactory> {
        Arc::new(MemEngineFactory::new(self.name.clone(), self.durability))
    }
}

fn default_num_ops() -> usize {
    DEFAULT_NUM_OPS
}

fn default_engines() -> Vec<EngineConfig> {
    vec![
        EngineConfig::new("mem-strict", DurabilityMode::Strict),
        EngineConfig::new("mem-buffered", DurabilityMode::Buffered),
    ]
}

fn default_engine_sequences() -> Vec<Vec<String>> {
    vec![vec!["mem-strict".to_string()], vec!["mem-buffered".to_string()]]
}

/// Configuration loaded from `metamorphic.toml`
///
/// # Example
///
/// ```toml
/// seed = 42
/// num_ops = 1000
/// restarts = true
/// engine_sequences = [["mem-strict", "mem-buffered"], ["mem-buffered"]]
///
/// [[engines]]
/// name = "mem-strict"
/// durability = "strict"
///
/// [[engines]]
/// name = "mem-buffered"
/// durability = "buffered"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaTestConfig {
    /// Generation seed; drawn from the clock when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Operations drawn from the deck, prerequisites not counted
    #[serde(default = "default_num_ops")]
    pub num_ops: usize,
    /// Whether `restart` operations swap engines
    #[serde(default)]
    pub restarts: bool,
    /// Directory keeping traces and reports; a temporary directory otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Engine sequences by profile name; the first one generates
    #[serde(default = "default_engine_sequences")]
    pub engine_sequences: Vec<Vec<String>>,
    /// Engine profiles
    #[serde(default = "default_engines")]
    pub engines: Vec<EngineConfig>,
}

impl Default for MetaTestConfig {
    fn default() -> Self {
        Self {
            seed: None,
            num_ops: DEFAULT_NUM_OPS,
            restarts: false,
            output_dir: None,
            engine_sequences: default_engine_sequences(),
            engines: default_engines(),
        }
    }
}

impl MetaTestConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Metamorphic test configuration
#
# Seed for operation generation. Omit to draw one from the clock; the seed
# in use is always written at the top of the trace.
# seed = 42

# Operations drawn per run (prerequisite operations are added on top)
num_ops = 1000

# Whether "restart" operations close the engine and reopen the same
# directory with the next engine of the sequence
restarts = false

# Keep traces and reports here instead of a temporary directory
# output_dir = "target/metamorphic"

# Engine sequences, by profile name. The first sequence generates the
# trace; every other one replays it and must produce identical output.
engine_sequences = [["mem-strict"], ["mem-buffered"]]

# Engine profiles
#   "strict"   = persist the engine image after every commit, ingestion and compaction
#   "buffered" = persist only on close
[[engines]]
name = "mem-strict"
durability = "strict"

[[engines]]
name = "mem-buffered"
durability = "buffered"
"#
    }

    /// Parse and validate TOML content
    pub fn from_toml(content: &str) -> MetaResult<Self> {
        let config: MetaTestConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn from_file(path: &Path) -> MetaResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MetaError::Config(format!("failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> MetaResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> MetaResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MetaError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check that sequences are non-empty and name known, unique profiles
    pub fn validate(&self) -> MetaResult<()> {
        let mut names = BTreeSet::new();
        for engine in &self.engines {
            if !names.insert(engine.name.as_str()) {
                return Err(MetaError::Config(format!("duplicate engine profile '{}'", engine.name)));
            }
        }
        if self.engine_sequences.is_empty() {
            return Err(MetaError::Config("no engine sequences".to_string()));
        }
        for (i, sequence) in self.engine_sequences.iter().enumerate() {
            if sequence.is_empty() {
                return Err(MetaError::Config(format!("engine sequence {} is empty", i)));
            }
            if let Some(unknown) = sequence.iter().find(|n| !names.contains(n.as_str())) {
                return Err(MetaError::Config(format!("unknown engine profile '{}'", unknown)));
            }
        }
        Ok(())
    }

    /// Configured seed, or one derived from the clock
    pub fn resolved_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default()
        })
    }

    /// Engine profile by name
    pub fn engine(&self, name: &str) -> MetaResult<&EngineConfig> {
        self.engines
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| MetaError::Config(format!("unknown engine profile '{}'", name)))
    }
}
