//! Gateway Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Request handling never surfaces these to the caller;
//! they only escape from construction and lifecycle operations.

use derive_more::{Display, Error};

/// A gateway error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The network layer could not produce a response at all.
    #[display("network unreachable: {_0}")]
    Unreachable(#[error(not(source))] String),
    /// The versioned cache or its blob store failed underneath the gateway.
    #[display("cache error")]
    Cache,
    /// The configuration handed to the gateway is unusable.
    #[display("invalid gateway configuration")]
    Config,
    /// The offline placeholder template failed to compile.
    #[display("offline template error")]
    Template,
    /// A lifecycle operation was requested in the wrong state.
    #[display("cannot {_0} while {_1}")]
    Lifecycle(#[error(not(source))] &'static str, #[error(not(source))] crate::WorkerState),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Cache)
    }
}
