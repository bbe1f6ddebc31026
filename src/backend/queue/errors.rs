//! Error types for delivery queue construction.

use thiserror::Error;

use super::MAX_QUEUE_RATE;

/// Errors returned when spawning a [`super::QueuedBackend`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum QueueConfigError {
    /// The provided rate was zero or exceeded [`MAX_QUEUE_RATE`].
    #[error("invalid rate {0}; must be between 1 and {max}", max = MAX_QUEUE_RATE)]
    InvalidRate(usize),
    /// The batch size was zero.
    #[error("invalid batch size; must be >= 1")]
    InvalidBatchSize,
    /// The worker thread could not be started.
    #[error("failed to spawn delivery worker: {0}")]
    Spawn(#[from] std::io::Error),
}
