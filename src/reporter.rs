//! Boundary between the test engine and the reporting layer.
//!
//! [`Reporter`] exposes one method per engine hook. Nothing it does can fail
//! the test run: every error from the layers below is logged and dropped
//! here, and a configuration error at startup turns the whole reporter into a
//! no-op. Tags are normalised before they reach the coordinator.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use log::{debug, error, info, trace, warn};

use crate::{
    backend::{DirectApi, HttpApi, QueuedBackend, ReportBackend},
    config::{ConfigError, ReporterConfig, Settings},
    delivery::DeliveryClient,
    error::{ReportError, ReportResult},
    finalize::{FinalizationGuard, FinalizationReport},
    lifecycle::{LifecycleCoordinator, LifecycleOptions},
    model::{CallerStatus, ItemId, LogLevel, normalize_tags},
    slot::FileRunSlot,
};

struct Inner {
    coordinator: Arc<Mutex<LifecycleCoordinator>>,
    guard: Arc<FinalizationGuard>,
}

/// Reporting entry point used by test-engine hooks.
///
/// Dropping the reporter finalizes the run if [`Reporter::shutdown`] was not
/// called.
///
/// # Examples
///
/// ```rust,no_run
/// use reportwire::{Reporter, config::ReporterConfig, model::LogLevel};
///
/// let reporter = Reporter::from_config(&ReporterConfig::new(
///     "https://reports.example.test",
///     "shop",
///     "token",
/// ));
/// reporter.on_suite_start("Checkout", ["@critical:true"], None);
/// reporter.on_case_start("Pay by card", Vec::<String>::new(), Some("TC-12"));
/// reporter.log_message("card accepted", LogLevel::Info);
/// reporter.on_case_finish("passed");
/// reporter.on_suite_finish("passed");
/// reporter.on_run_finish();
/// if let Some(url) = reporter.run_url() {
///     println!("report: {url}");
/// }
/// reporter.shutdown();
/// ```
pub struct Reporter {
    inner: Option<Inner>,
}

impl Reporter {
    /// Build a reporter that delivers over HTTP through a background queue.
    ///
    /// Any configuration problem is logged once and yields a disabled
    /// reporter.
    #[must_use]
    pub fn from_config(config: &ReporterConfig) -> Self {
        if !config.enabled {
            info!("reporting disabled by configuration");
            return Self::disabled();
        }
        match Self::connect(config) {
            Ok(reporter) => reporter,
            Err(err) => {
                error!("{}", ReportError::from(err));
                Self::disabled()
            }
        }
    }

    fn connect(config: &ReporterConfig) -> Result<Self, ConfigError> {
        let settings = config.validate()?;
        let api = HttpApi::new(&settings)?;
        let backend = QueuedBackend::builder(Arc::new(api.clone()))
            .settings(&settings)
            .spawn()
            .map_err(|err| ConfigError::Worker(err.to_string()))?;
        Ok(Self::with_backend(&settings, Arc::new(backend), Arc::new(api)))
    }

    /// Build a reporter over any backend client and direct API.
    #[must_use]
    pub fn with_backend(
        settings: &Settings,
        backend: Arc<dyn ReportBackend>,
        direct: Arc<dyn DirectApi>,
    ) -> Self {
        let delivery = DeliveryClient::new(backend, settings.retry);
        let mut coordinator = LifecycleCoordinator::new(LifecycleOptions::from(settings), delivery);
        if let Some(path) = &settings.shared_slot {
            coordinator = coordinator.with_slot(Arc::new(FileRunSlot::new(path)));
        }
        let coordinator = Arc::new(Mutex::new(coordinator));
        let guard = FinalizationGuard::new(Arc::clone(&coordinator), direct).settings(settings);
        Self {
            inner: Some(Inner {
                coordinator,
                guard: Arc::new(guard),
            }),
        }
    }

    /// A reporter that ignores every call.
    #[must_use]
    pub fn disabled() -> Self { Self { inner: None } }

    /// Whether reporting is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool { self.inner.is_some() }

    /// Finalize the run with `INTERRUPTED` status on Ctrl-C.
    pub fn install_interrupt_handler(&self) {
        if let Some(inner) = &self.inner
            && let Err(err) = inner.guard.install_interrupt_handler()
        {
            warn!("could not install the interrupt handler: {err}");
        }
    }

    /// The engine started a session.
    pub fn on_run_start(&self) { self.call("run start", |c| c.start_run(None, None)); }

    /// The engine entered a suite.
    pub fn on_suite_start<I, S>(&self, name: &str, tags: I, description: Option<&str>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        self.call("suite start", |c| c.start_suite(name, &tags, description));
    }

    /// The engine entered a case.
    pub fn on_case_start<I, S>(&self, name: &str, tags: I, test_case_id: Option<&str>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        self.call("case start", |c| c.start_case(name, &tags, test_case_id));
    }

    /// The engine started a step.
    pub fn on_step_start(&self, name: &str) { self.call("step start", |c| c.start_step(name)); }

    /// The engine finished a step.
    pub fn on_step_finish(&self, status: impl Into<CallerStatus>) {
        let status = status.into();
        self.call("step finish", |c| c.finish_step(status));
    }

    /// The engine finished a case.
    pub fn on_case_finish(&self, status: impl Into<CallerStatus>) {
        let status = status.into();
        self.call("case finish", |c| c.finish_case(status));
    }

    /// The engine finished a suite.
    pub fn on_suite_finish(&self, status: impl Into<CallerStatus>) {
        let status = status.into();
        self.call("suite finish", |c| c.finish_suite(status));
    }

    /// The engine finished the session.
    ///
    /// Issues the logical run finish; delivery is confirmed by
    /// [`Reporter::shutdown`].
    pub fn on_run_finish(&self) { self.call("run finish", |c| c.finish_run(None)); }

    /// Attach a file to the innermost active item.
    pub fn attach_file(&self, data: impl Into<Bytes>, name: &str, mime_type: &str) {
        let data = data.into();
        self.call("attach file", |c| c.attach(data, name, mime_type));
    }

    /// Log a message against the innermost active item.
    pub fn log_message(&self, text: &str, level: LogLevel) {
        self.call("log message", |c| c.log(text, level));
    }

    /// Log an error with its source chain.
    pub fn log_exception(&self, error: &(dyn std::error::Error + 'static), context: &str) {
        self.call("log exception", |c| c.log_exception(error, context));
    }

    /// Identifier of the current run, or of the run just finished.
    #[must_use]
    pub fn run_id(&self) -> Option<ItemId> {
        self.call("run id", |c| Ok(c.last_run_id().cloned())).flatten()
    }

    /// Link to the current run in the backend UI.
    #[must_use]
    pub fn run_url(&self) -> Option<String> {
        self.call("run url", |c| Ok(c.run_url())).flatten()
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.call("is active", |c| Ok(c.is_active()))
            .unwrap_or(false)
    }

    /// Run finalization now.
    ///
    /// Returns `None` when reporting is disabled.
    pub fn shutdown(&self) -> Option<FinalizationReport> {
        let inner = self.inner.as_ref()?;
        let report = inner.guard.finalize(None);
        if report.is_incomplete() {
            warn!("the remote report may be incomplete");
        }
        Some(report)
    }

    fn call<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut LifecycleCoordinator) -> ReportResult<T>,
    ) -> Option<T> {
        let result = match &self.inner {
            Some(inner) => f(&mut lock(&inner.coordinator)),
            None => Err(ReportError::Disabled),
        };
        match result {
            Ok(value) => Some(value),
            Err(ReportError::Disabled) => {
                trace!("{operation} ignored: reporting is disabled");
                None
            }
            Err(err) => {
                debug!("{operation} not reported: {err}");
                None
            }
        }
    }
}

fn lock(coordinator: &Mutex<LifecycleCoordinator>) -> MutexGuard<'_, LifecycleCoordinator> {
    coordinator.lock().unwrap_or_else(PoisonError::into_inner)
}
