//! Error types for the action cache

use crate::entry::RecordError;
use crate::hash::{ActionId, OutputId};
use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Why a lookup was treated as a miss.
///
/// A missing, truncated, or corrupt index record is never a hard failure;
/// it is reported as [`Error::NotFound`] carrying one of these reasons so
/// that callers (and logs) can still tell the cases apart.
#[derive(Error, Debug)]
pub enum MissReason {
    /// The index file could not be opened or read
    #[error("reading index record")]
    Read(#[source] std::io::Error),

    /// The index file existed but did not hold a valid record
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Verify mode forces every lookup to miss
    #[error("verify mode rejects cache reads")]
    VerifyMode,
}

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(recache::cache::io),
        help("Check file permissions and free disk space")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Cache entry not found (or unreadable, which is the same thing)
    #[error("cache entry not found: {action}")]
    #[diagnostic(
        code(recache::cache::not_found),
        help("A miss is normal: recompute and store the result with put")
    )]
    NotFound {
        /// The action key that missed
        action: ActionId,
        /// Why the lookup missed
        #[source]
        reason: MissReason,
    },

    /// Stored bytes no longer match their recorded output identity
    #[error("integrity check failed for output {output}: content hashed to {actual}")]
    #[diagnostic(
        code(recache::cache::integrity),
        help("The blob was corrupted on disk; treat as a miss and re-put")
    )]
    Integrity {
        /// The output identity the bytes were stored under
        output: OutputId,
        /// What the bytes actually hash to now
        actual: OutputId,
    },

    /// The cache root is unusable; the cache cannot guarantee its layout
    #[error("cache initialization failed at {}: {message}", path.display())]
    #[diagnostic(
        code(recache::cache::init),
        help("The cache root must be an existing, writable directory")
    )]
    Init {
        /// Offending root path
        path: Box<Path>,
        /// What was wrong with it
        message: String,
        /// Underlying I/O error, if any
        #[source]
        source: Option<std::io::Error>,
    },

    /// Verify mode caught a non-reproducible computation
    #[error(
        "cache verify failed: action {action} changed: old output {old_output} ({old_size} bytes), new output {new_output} ({new_size} bytes)"
    )]
    #[diagnostic(
        code(recache::cache::verify),
        help(
            "The same action produced different output bytes across runs; the computation is not deterministic"
        )
    )]
    Verify {
        /// The action whose output changed between runs
        action: ActionId,
        /// Previously recorded output identity
        old_output: OutputId,
        /// Previously recorded size
        old_size: u64,
        /// Newly computed output identity
        new_output: OutputId,
        /// Newly computed size
        new_size: u64,
        /// The exact bytes hashed to produce the action key, when a
        /// [`HashRecorder`](crate::hash::HashRecorder) was attached
        hashed_input: Option<String>,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create an initialization error
    #[must_use]
    pub fn init(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Init {
            path: path.as_ref().into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an initialization error wrapping an I/O failure
    #[must_use]
    pub fn init_io(path: impl AsRef<Path>, message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Init {
            path: path.as_ref().into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether this error is an ordinary miss rather than a real failure
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
