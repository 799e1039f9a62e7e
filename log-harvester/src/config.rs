//! Configuration for a harvested directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_with::{
    DeserializeFromStr, DurationMilliSeconds, DurationSeconds, SerializeDisplay, serde_as,
};

use crate::error::{HarvestError, Result};

/// Directory watched when none is configured.
pub const DEFAULT_DIR: &str = "./logs";

/// Matches any path ending in `.log`.
pub const DEFAULT_FILE_PATTERN: &str = r".+\.log$";

/// Line that marks the end of a harvested file.
pub const DEFAULT_COMPLETE_MARKER: &str = "LOG_COMPLETE";

/// How long a file may go without writes before its harvest is abandoned.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Upper bound on how long read lines wait before being flushed.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Lines per batch before a flush is forced.
pub const DEFAULT_MAX_BATCH_LINES: usize = 1000;

/// Records buffered in the output queue before producers block.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Configuration for a harvested directory tree.
///
/// Built once before the monitor starts and shared read-only afterwards.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Root of the watched tree.
    pub dir: PathBuf,

    /// Pattern a file's full path must match to be harvested.
    pub pattern: FilePattern,

    /// Line marking the logical end of a file.
    pub complete_marker: String,

    /// Delete the file and its cursor once the marker has been delivered.
    pub remove_after_complete: bool,

    /// Inactivity after which a harvest is ended.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "stall_timeout_secs")]
    pub stall_timeout: Duration,

    /// Interval at which pending lines are flushed regardless of batch size.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "flush_interval_ms")]
    pub flush_interval: Duration,

    /// Maximum number of lines in one emitted batch.
    pub max_batch_lines: usize,

    /// Capacity of the output queue.
    pub queue_capacity: usize,
}

impl HarvestConfig {
    /// Create a config for `dir` with default settings.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the watched directory.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the filename pattern.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.pattern = FilePattern::new(pattern)?;
        Ok(self)
    }

    /// Set the completion marker.
    pub fn with_complete_marker(mut self, marker: impl Into<String>) -> Self {
        self.complete_marker = marker.into();
        self
    }

    /// Delete completed files and their cursors.
    pub fn remove_after_complete(mut self, remove: bool) -> Self {
        self.remove_after_complete = remove;
        self
    }

    /// Set the stall timeout.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the batch line limit.
    pub fn with_max_batch_lines(mut self, lines: usize) -> Self {
        self.max_batch_lines = lines;
        self
    }

    /// Set the output queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Reject settings the harvester cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.complete_marker.is_empty() {
            return Err(HarvestError::Config("complete marker must not be empty".into()));
        }
        if self.complete_marker.contains('\n') {
            return Err(HarvestError::Config(
                "complete marker must be a single line".into(),
            ));
        }
        if self.stall_timeout.is_zero() {
            return Err(HarvestError::Config("stall timeout must be positive".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(HarvestError::Config("flush interval must be positive".into()));
        }
        if self.max_batch_lines == 0 {
            return Err(HarvestError::Config("max batch lines must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(HarvestError::Config("queue capacity must be positive".into()));
        }
        Ok(())
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            pattern: FilePattern::default(),
            complete_marker: DEFAULT_COMPLETE_MARKER.to_string(),
            remove_after_complete: false,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_batch_lines: DEFAULT_MAX_BATCH_LINES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// A filename pattern compiled once at configuration time.
#[derive(Clone, SerializeDisplay, DeserializeFromStr)]
pub struct FilePattern {
    regex: Regex,
}

impl FilePattern {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| HarvestError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { regex })
    }

    /// Check a path against the pattern. The whole path is matched, not just
    /// the file name.
    pub fn matches(&self, path: &Path) -> bool {
        self.regex.is_match(&path.to_string_lossy())
    }

    /// The pattern source.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl Default for FilePattern {
    fn default() -> Self {
        #[allow(clippy::expect_used)]
        Self::new(DEFAULT_FILE_PATTERN).expect("default file pattern compiles")
    }
}

impl FromStr for FilePattern {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilePattern").field(&self.as_str()).finish()
    }
}
