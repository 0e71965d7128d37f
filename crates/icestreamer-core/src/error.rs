//! Error types for IceStreamer core.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration error raised while interpreting a group.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Missing key '{key}' in group '{group}'")]
    MissingKey { group: String, key: String },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Unknown encoder '{value}' for stream '{group}'")]
    UnknownEncoder { group: String, value: String },

    #[error("Unknown container '{value}' for stream '{group}'")]
    UnknownContainer { group: String, value: String },

    #[error("Invalid value '{value}' for key '{key}' in group '{group}': {reason}")]
    InvalidValue { group: String, key: String, value: String, reason: String },

    #[error("Duplicate group: {0}")]
    DuplicateGroup(String),
}

/// Result type alias for IceStreamer core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to set up live metadata support.
///
/// These only disable metadata updates; streaming continues without them.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("No metadata file provided")]
    NotConfigured,

    #[error("Provided metadata file doesn't exist: {0}")]
    Missing(PathBuf),

    #[error("Could not initialize metadata file monitor: {0}")]
    Watch(#[from] std::io::Error),
}

/// Reason a metadata update was discarded.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MalformedMetadata {
    #[error("metadata is empty")]
    Empty,

    #[error("metadata is not valid text")]
    NotText,

    #[error("metadata has no line separator")]
    NoSeparator,

    #[error("metadata has {0} lines, expected artist and title")]
    LineCount(usize),
}
