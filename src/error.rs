//! Error types for the trace sink, profiler and analyzer

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while recording or flushing traces
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Trace sink is not initialized")]
    NotInitialized,

    #[error("Failed to commit trace to {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profiler configuration: {0}")]
    Config(String),

    #[error("Failed to parse profiler configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tracing operations
pub type Result<T> = std::result::Result<T, TraceError>;
