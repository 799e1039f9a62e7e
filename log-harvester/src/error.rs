//! Error types for the log harvester.

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Errors that can occur while watching or harvesting.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Watched root does not exist or is not a directory.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// Filename pattern failed to compile.
    #[error("invalid file pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Configuration rejected by validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// The notification backend dropped events and asked for a rescan.
    #[error("notification queue overflowed for {0}")]
    Overflow(String),

    /// The notification backend stopped delivering events.
    #[error("notification stream closed")]
    NotifierClosed,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed.
    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Nobody is draining the output queue anymore.
    #[error("output queue closed")]
    OutputClosed,
}
