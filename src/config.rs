//! Profiler configuration
//!
//! Configurations are built in code with the `with_*` methods or loaded from
//! a TOML file:
//!
//! ```toml
//! log_path = "trace.txt"
//! min_interval_ms = 500.0
//!
//! [target]
//! name = "handle_request"
//! path = "src/server.rs"
//! line = 0
//! ```

use crate::buffer::DEFAULT_CAPACITY;
use crate::error::{Result, TraceError};
use crate::function::FunctionIdentity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default log file, shared with existing tooling that reads these traces
pub const DEFAULT_LOG_PATH: &str = "pyprofiler.txt";

/// The function to trace line by line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Function name
    pub name: String,
    /// Defining source path, as the instrumentation reports it
    pub path: String,
    /// Line number; 0 matches the function on any line
    #[serde(default)]
    pub line: u32,
}

impl TargetSpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            line,
        }
    }

    pub fn identity(&self) -> FunctionIdentity {
        FunctionIdentity::new(self.name.clone(), self.path.clone(), self.line)
    }
}

/// Settings for a profiler and the trace sink behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Detail-traced function; `None` traces calls and returns only
    pub target: Option<TargetSpec>,
    /// File that committed traces are appended to
    pub log_path: PathBuf,
    /// Invocations faster than this are discarded instead of committed
    pub min_interval_ms: f64,
    /// Maximum number of threads buffered at once
    pub capacity: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            target: None,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            min_interval_ms: 0.0,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ProfilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: TargetSpec) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn with_min_interval_ms(mut self, interval: f64) -> Self {
        self.min_interval_ms = interval;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ProfilerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(TraceError::Config("capacity must be > 0".to_string()));
        }
        if !self.min_interval_ms.is_finite() || self.min_interval_ms < 0.0 {
            return Err(TraceError::Config(format!(
                "min_interval_ms must be a non-negative number, got {}",
                self.min_interval_ms
            )));
        }
        if self.log_path.as_os_str().is_empty() {
            return Err(TraceError::Config("log_path must not be empty".to_string()));
        }
        if let Some(target) = &self.target {
            if target.name.is_empty() {
                return Err(TraceError::Config("target name must not be empty".to_string()));
            }
        }
        Ok(())
    }
}
