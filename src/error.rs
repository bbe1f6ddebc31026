//! Canonical error and result types for the crate.
//!
//! [`ReportError`] is the taxonomy surfaced by every lifecycle operation.
//! [`BackendError`] describes a single failed interaction with the reporting
//! backend and decides whether [`crate::retry::RetryPolicy`] may try again.

use std::time::Duration;

use crate::{config::ConfigError, identity::Level};

/// Errors raised by the reporting layer.
///
/// None of these ever escape [`crate::Reporter`]; they exist so callers of
/// [`crate::lifecycle::LifecycleCoordinator`] and tests can assert on
/// outcomes without parsing log output.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The reporter configuration is unusable; reporting is disabled.
    #[error("reporting disabled by configuration error: {0}")]
    Configuration(#[from] ConfigError),
    /// A backend call failed after the retry budget was spent.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Connectivity {
        /// Operation that was attempted.
        operation: &'static str,
        /// Number of attempts made, including the first.
        attempts: u32,
        /// Error returned by the final attempt.
        #[source]
        source: BackendError,
    },
    /// An operation targeted a level with no recorded identifier.
    #[error("{operation} skipped: no active {level} item")]
    Consistency {
        /// Operation that was skipped.
        operation: &'static str,
        /// Level whose identifier was missing.
        level: Level,
    },
    /// Neither the queue flush nor the direct fallback confirmed the run.
    #[error("run {run_id} may be incomplete: queue flush and direct finish both failed")]
    Finalization {
        /// Identifier of the run that could not be confirmed.
        run_id: String,
    },
    /// The reporter was disabled at startup; the call was ignored.
    #[error("reporting is disabled")]
    Disabled,
}

impl ReportError {
    /// Build a [`ReportError::Consistency`] for `operation` at `level`.
    #[must_use]
    pub fn missing(operation: &'static str, level: Level) -> Self {
        Self::Consistency { operation, level }
    }

    /// Returns true if this error is a skipped call rather than a failure.
    #[must_use]
    pub fn is_consistency(&self) -> bool { matches!(self, Self::Consistency { .. }) }
}

/// Failure of a single backend interaction.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },
    /// The delivery queue no longer accepts work.
    #[error("delivery queue closed")]
    Closed,
    /// The delivery queue did not drain within the allotted time.
    #[error("delivery queue did not drain within {0:?}")]
    FlushTimeout(Duration),
    /// The backend rejected or could not interpret the payload.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Whether retrying the same request may succeed.
    ///
    /// ```
    /// use reportwire::error::BackendError;
    ///
    /// assert!(BackendError::Transport("reset".into()).is_retryable());
    /// assert!(
    ///     BackendError::Status {
    ///         status: 503,
    ///         body: String::new()
    ///     }
    ///     .is_retryable()
    /// );
    /// assert!(!BackendError::Closed.is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Closed | Self::FlushTimeout(_) | Self::Rejected(_) => false,
        }
    }
}

/// Canonical result alias used by lifecycle operations.
pub type ReportResult<T> = std::result::Result<T, ReportError>;
