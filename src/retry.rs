//! Bounded retry for individual backend operations.
//!
//! [`RetryPolicy`] wraps a single start/finish call: it makes up to
//! `max_attempts` attempts, sleeps a fixed or exponentially growing delay
//! between them, and hands back the last error once the budget is spent.

use std::{future::Future, thread, time::Duration};

use log::debug;
use serde::Deserialize;

use crate::error::BackendError;

/// Delay schedule between attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Wait `delay` between every attempt.
    #[default]
    Fixed,
    /// Double the delay after each failure, capped at `max_delay`.
    Exponential,
}

/// Outcome of a retried operation when every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Error returned by the last attempt.
    pub error: BackendError,
}

/// Retry configuration for backend calls.
///
/// # Default Values
/// - `max_attempts`: 3
/// - `delay`: 500 milliseconds
/// - `max_delay`: 5 seconds
/// - `backoff`: [`Backoff::Fixed`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first; never less than one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub delay: Duration,
    /// Upper bound for exponential delays.
    pub max_delay: Duration,
    /// Delay schedule.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Clamp values to sane bounds.
    ///
    /// Guarantees at least one attempt and `delay <= max_delay`.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use reportwire::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 0,
    ///     delay: Duration::from_secs(9),
    ///     max_delay: Duration::from_secs(1),
    ///     ..RetryPolicy::default()
    /// }
    /// .normalized();
    /// assert_eq!(policy.max_attempts, 1);
    /// assert_eq!(policy.max_delay, Duration::from_secs(9));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.max_delay = self.max_delay.max(self.delay);
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2_u32.saturating_pow(attempt.max(1) - 1);
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// Blocks the calling thread between attempts.
    ///
    /// # Errors
    ///
    /// Returns [`Exhausted`] carrying the last error and the number of
    /// attempts made.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> Result<T, BackendError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    debug!(
                        "{operation} attempt {attempt}/{max_attempts} failed: {error}; retrying in \
                         {delay:?}"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(error) => return Err(Exhausted { attempts: attempt, error }),
            }
        }
    }

    /// Async counterpart of [`RetryPolicy::run`] used by the delivery worker.
    ///
    /// # Errors
    ///
    /// Returns [`Exhausted`] carrying the last error and the number of
    /// attempts made.
    pub async fn run_async<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    debug!(
                        "{operation} attempt {attempt}/{max_attempts} failed: {error}; retrying in \
                         {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(Exhausted { attempts: attempt, error }),
            }
        }
    }
}
