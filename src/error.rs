//! Engine Error Taxonomy
//!
//! Every fallible operation in the crate reports one of these kinds.
//! Per-file scan errors (`Unreadable`, `TooLarge`) are absorbed by bulk
//! scans as skips; the rest surface to the caller.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The file could not be opened or read.
    #[error("unreadable file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exceeds the configured maximum scan size.
    #[error("file {path} exceeds max scan size ({size} > {limit} bytes)")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    /// The signature database is corrupt or truncated.
    #[error("malformed signature database: {0}")]
    MalformedDb(String),

    /// Moving a payload into or out of the quarantine root failed.
    #[error("quarantine I/O failure for {path}: {source}")]
    IoQuarantine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cancellation was requested and honored mid-scan.
    #[error("scan cancelled")]
    ScanCancelled,

    /// An async scan is already running.
    #[error("a scan is already in progress")]
    ScanInProgress,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The named entity (path, quarantine entry) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl EngineError {
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unreadable { path: path.into(), source }
    }

    pub fn io_quarantine(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoQuarantine { path: path.into(), source }
    }

    /// True for the per-file kinds a bulk scan counts as skipped
    /// instead of failing the whole operation.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Unreadable { .. } | Self::TooLarge { .. } | Self::NotFound(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
