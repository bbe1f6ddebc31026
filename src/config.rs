//! Reporter configuration.
//!
//! [`ReporterConfig`] is deserialisable from any `serde` format so the
//! embedding application can load it from YAML, environment, or a CLI. Every
//! section has defaults; [`ReporterConfig::validate`] checks the few values
//! that have none.

use std::{fmt, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    model::{Attribute, StepLayout, normalize_tags, parse_attributes},
    retry::{Backoff, RetryPolicy},
};

/// Highest accepted value for [`QueueConfig::rate`].
pub const MAX_QUEUE_RATE: usize = 10_000;

/// Configuration problems detected at startup.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required option was not supplied.
    #[error("missing required option `{0}`")]
    Missing(&'static str),
    /// The endpoint is not an http(s) URL.
    #[error("endpoint `{0}` must start with http:// or https://")]
    InvalidEndpoint(String),
    /// `retry.max_attempts` was zero.
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    /// `queue.batch_size` was zero.
    #[error("queue.batch_size must be at least 1")]
    ZeroBatchSize,
    /// `queue.rate` was zero or above [`MAX_QUEUE_RATE`].
    #[error("invalid queue.rate {0}; must be between 1 and {max}", max = MAX_QUEUE_RATE)]
    InvalidRate(usize),
    /// A duration option was negative or not finite.
    #[error("`{0}` must be a finite, non-negative number of seconds")]
    InvalidDuration(&'static str),
    /// The TLS client configuration could not be built.
    #[error("TLS configuration failed: {0}")]
    Tls(String),
    /// The delivery worker could not be started.
    #[error("delivery worker failed to start: {0}")]
    Worker(String),
}

/// A string that never appears in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Reveal the secret for use in a request header.
    #[must_use]
    pub fn expose(&self) -> &str { &self.0 }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Secret(**redacted**)") }
}

/// Run-level options.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run name; derived from the first suite when absent.
    pub name: Option<String>,
    /// Run description; derived from the first suite when absent.
    pub description: Option<String>,
    /// `key:value` tags converted to run attributes.
    pub attributes: Vec<String>,
    /// Identifier of an externally owned run to report into.
    pub id: Option<String>,
}

/// Retry options for start/finish calls.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts including the first.
    pub max_attempts: u32,
    /// Delay between attempts in seconds.
    pub delay_seconds: f64,
    /// Delay schedule.
    pub backoff: Backoff,
    /// Cap for exponential delays in seconds.
    pub max_delay_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_seconds: 0.5,
            backoff: Backoff::Fixed,
            max_delay_seconds: 5.0,
        }
    }
}

/// Delivery queue options.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Operations drained per worker wake-up.
    pub batch_size: usize,
    /// Optional cap on requests per second.
    pub rate: Option<usize>,
    /// Upper bound for the final flush in seconds.
    pub flush_timeout_seconds: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            rate: None,
            flush_timeout_seconds: 30.0,
        }
    }
}

/// Step reporting options.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// How steps appear in the report.
    pub layout_mode: StepLayout,
}

/// Finalization options.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FinalizeConfig {
    /// Wait before flushing so late logs can enqueue, in seconds.
    pub settle_delay_seconds: f64,
    /// Wait after flushing, in seconds.
    pub post_flush_delay_seconds: f64,
    /// File shared with other processes holding the run identifier.
    pub shared_slot: Option<PathBuf>,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            settle_delay_seconds: 0.5,
            post_flush_delay_seconds: 0.5,
            shared_slot: None,
        }
    }
}

/// HTTP client options.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_seconds: f64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30.0,
        }
    }
}

/// Complete reporter configuration.
///
/// # Examples
///
/// ```
/// use reportwire::config::ReporterConfig;
///
/// let config: ReporterConfig = serde_json::from_str(
///     r#"{
///         "endpoint": "https://reports.example.test",
///         "project": "shop",
///         "api_key": "token",
///         "retry": { "max_attempts": 2 },
///         "step": { "layout_mode": "INLINE_LOG" }
///     }"#,
/// )
/// .expect("valid config");
/// let settings = config.validate().expect("complete config");
/// assert_eq!(settings.retry.max_attempts, 2);
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Master switch; `false` turns every call into a no-op.
    pub enabled: bool,
    /// Backend base URL.
    pub endpoint: Option<String>,
    /// Backend project or namespace.
    pub project: Option<String>,
    /// API key sent as a bearer token.
    pub api_key: Option<Secret>,
    /// Run options.
    pub run: RunConfig,
    /// Retry options.
    pub retry: RetryConfig,
    /// Queue options.
    pub queue: QueueConfig,
    /// Step options.
    pub step: StepConfig,
    /// Whether skipped items need investigation.
    pub skipped_is_issue: bool,
    /// Whether TLS certificates are verified.
    pub verify_tls: bool,
    /// Finalization options.
    pub finalize: FinalizeConfig,
    /// HTTP client options.
    pub http: HttpConfig,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            project: None,
            api_key: None,
            run: RunConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            step: StepConfig::default(),
            skipped_is_issue: true,
            verify_tls: true,
            finalize: FinalizeConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl ReporterConfig {
    /// Configuration pointing at `endpoint` with every other option defaulted.
    pub fn new(
        endpoint: impl Into<String>,
        project: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            project: Some(project.into()),
            api_key: Some(Secret::new(api_key)),
            ..Self::default()
        }
    }

    /// Check the configuration and resolve it into [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let endpoint = required(self.endpoint.as_deref(), "endpoint")?;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint(endpoint.to_owned()));
        }
        let project = required(self.project.as_deref(), "project")?;
        let api_key = self
            .api_key
            .clone()
            .filter(|key| !key.expose().trim().is_empty())
            .ok_or(ConfigError::Missing("api_key"))?;

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.queue.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if let Some(rate) = self.queue.rate
            && (rate == 0 || rate > MAX_QUEUE_RATE)
        {
            return Err(ConfigError::InvalidRate(rate));
        }

        let retry = RetryPolicy {
            max_attempts: self.retry.max_attempts,
            delay: seconds(self.retry.delay_seconds, "retry.delay_seconds")?,
            max_delay: seconds(self.retry.max_delay_seconds, "retry.max_delay_seconds")?,
            backoff: self.retry.backoff,
        }
        .normalized();

        let tags = normalize_tags(&self.run.attributes);
        Ok(Settings {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            project: project.to_owned(),
            api_key,
            run_name: self.run.name.clone(),
            run_description: self.run.description.clone(),
            run_attributes: parse_attributes(&tags),
            explicit_run_id: self.run.id.clone().filter(|id| !id.trim().is_empty()),
            retry,
            batch_size: self.queue.batch_size,
            rate: self.queue.rate,
            flush_timeout: seconds(
                self.queue.flush_timeout_seconds,
                "queue.flush_timeout_seconds",
            )?,
            step_layout: self.step.layout_mode,
            skipped_is_issue: self.skipped_is_issue,
            verify_tls: self.verify_tls,
            settle_delay: seconds(
                self.finalize.settle_delay_seconds,
                "finalize.settle_delay_seconds",
            )?,
            post_flush_delay: seconds(
                self.finalize.post_flush_delay_seconds,
                "finalize.post_flush_delay_seconds",
            )?,
            shared_slot: self.finalize.shared_slot.clone(),
            http_timeout: seconds(self.http.timeout_seconds, "http.timeout_seconds")?,
        })
    }
}

/// Validated configuration consumed by the reporter components.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Backend base URL without a trailing slash.
    pub endpoint: String,
    /// Backend project.
    pub project: String,
    /// API key.
    pub api_key: Secret,
    /// Configured run name.
    pub run_name: Option<String>,
    /// Configured run description.
    pub run_description: Option<String>,
    /// Run attributes from configuration.
    pub run_attributes: Vec<Attribute>,
    /// Externally owned run to join.
    pub explicit_run_id: Option<String>,
    /// Retry policy for start/finish calls.
    pub retry: RetryPolicy,
    /// Worker batch size.
    pub batch_size: usize,
    /// Optional request rate cap.
    pub rate: Option<usize>,
    /// Flush timeout.
    pub flush_timeout: Duration,
    /// Step layout.
    pub step_layout: StepLayout,
    /// Whether skipped items need investigation.
    pub skipped_is_issue: bool,
    /// Whether TLS certificates are verified.
    pub verify_tls: bool,
    /// Pre-flush settle delay.
    pub settle_delay: Duration,
    /// Post-flush delay.
    pub post_flush_delay: Duration,
    /// Shared run slot path.
    pub shared_slot: Option<PathBuf>,
    /// HTTP request timeout.
    pub http_timeout: Duration,
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, ConfigError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn seconds(value: f64, name: &'static str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration(name))
}
