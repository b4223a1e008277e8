//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Nothing is stored at this path; callers usually treat it as a miss.
    #[display("blob not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The path is not a canonical relative blob path. Never retry.
    #[display("invalid blob path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    #[display("I/O error on {}", path.display())]
    Io { path: PathBuf, source: IoError },
    /// The store refused the operation as a whole.
    #[display("storage unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
}

impl ErrorKind {
    /// Classify an I/O failure on `path`, folding "no such file" into
    /// [`NotFound`](Self::NotFound).
    pub(crate) fn io(path: impl Into<PathBuf>, source: IoError) -> Self {
        match source.kind() {
            IoErrorKind::NotFound => Self::NotFound(path.into()),
            _ => Self::Io {
                path: path.into(),
                source,
            },
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Unavailable(_))
    }

    /// Returns `true` if the error means the blob simply isn't there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
