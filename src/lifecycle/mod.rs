//! Run, suite, case and step lifecycle.
//!
//! [`LifecycleCoordinator`] mirrors the test engine's hook sequence onto the
//! backend. Each level moves `NotStarted → Active → Finished`; a child may
//! only start while its parent is active, a second start of an active item
//! returns the existing handle, and a second finish is a no-op. The run is
//! started lazily by the first suite and its identifier stays in the
//! [`IdentityStore`] after the logical finish so late logs can still target
//! it. Only [`crate::finalize::FinalizationGuard`] clears it.
//!
//! The coordinator trusts the statuses it is given; it never recomputes a
//! parent's status from its children.

use std::{fmt::Write as _, sync::Arc};

use bytes::Bytes;
use chrono::Utc;
use log::{debug, info, warn};

use crate::{
    config::Settings,
    delivery::DeliveryClient,
    error::{ReportError, ReportResult},
    identity::{IdentityStore, Level},
    metrics,
    model::{
        Attachment,
        Attribute,
        CallerStatus,
        FinishRequest,
        Issue,
        IssueType,
        ItemId,
        ItemKind,
        ItemStatus,
        LogLevel,
        LogRequest,
        StartItemRequest,
        StartRunRequest,
        StepLayout,
        parse_attributes,
    },
    slot::RunSlot,
};

pub use crate::model::ItemState;

/// Run name used when neither configuration nor the first suite provide one.
pub const DEFAULT_RUN_NAME: &str = "Test run";

/// Coordinator options, usually derived from validated [`Settings`].
#[derive(Clone, Debug)]
pub struct LifecycleOptions {
    /// Backend base URL, used for run links.
    pub endpoint: String,
    /// Backend project, used for run links.
    pub project: String,
    /// Configured run name.
    pub run_name: Option<String>,
    /// Configured run description.
    pub run_description: Option<String>,
    /// Attributes attached to the run.
    pub run_attributes: Vec<Attribute>,
    /// Externally owned run to join instead of starting one.
    pub explicit_run_id: Option<ItemId>,
    /// How steps are reported.
    pub step_layout: StepLayout,
    /// Whether skipped items need investigation.
    pub skipped_is_issue: bool,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            project: String::new(),
            run_name: None,
            run_description: None,
            run_attributes: Vec::new(),
            explicit_run_id: None,
            step_layout: StepLayout::default(),
            skipped_is_issue: true,
        }
    }
}

impl From<&Settings> for LifecycleOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            project: settings.project.clone(),
            run_name: settings.run_name.clone(),
            run_description: settings.run_description.clone(),
            run_attributes: settings.run_attributes.clone(),
            explicit_run_id: settings.explicit_run_id.clone().map(ItemId::from),
            step_layout: settings.step_layout,
            skipped_is_issue: settings.skipped_is_issue,
        }
    }
}

/// Result of a successful start call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemHandle {
    /// Level of the item.
    pub level: Level,
    /// Backend identifier; `None` for steps reported as log lines.
    pub id: Option<ItemId>,
    /// Set when the item was already active and no request was sent.
    pub reused: bool,
}

/// Result of a successful finish call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishOutcome {
    /// A finish request was issued.
    Finished,
    /// The item had already finished; nothing was sent.
    AlreadyFinished,
}

/// Link to `run` in the backend UI.
///
/// ```
/// use reportwire::{lifecycle::run_url, model::ItemId};
///
/// assert_eq!(
///     run_url("https://reports.example.test/", "shop", &ItemId::from("42")),
///     "https://reports.example.test/ui/#shop/launches/all/42"
/// );
/// ```
#[must_use]
pub fn run_url(endpoint: &str, project: &str, run: &ItemId) -> String {
    format!(
        "{}/ui/#{project}/launches/all/{run}",
        endpoint.trim_end_matches('/')
    )
}

fn finish_operation(level: Level) -> &'static str {
    match level {
        Level::Run => "finish run",
        Level::Suite => "finish suite",
        Level::Case => "finish case",
        Level::Step => "finish step",
    }
}

fn item_request(
    run: ItemId,
    parent: Option<ItemId>,
    name: &str,
    kind: ItemKind,
    tags: &[String],
) -> StartItemRequest {
    StartItemRequest {
        uuid: None,
        launch_uuid: run,
        parent,
        name: name.to_owned(),
        kind,
        description: None,
        attributes: parse_attributes(tags),
        test_case_id: None,
        has_stats: true,
        start_time: Utc::now(),
    }
}

/// Drives start/finish transitions for every level.
pub struct LifecycleCoordinator {
    options: LifecycleOptions,
    identity: IdentityStore,
    delivery: DeliveryClient,
    slot: Option<Arc<dyn RunSlot>>,
    states: [ItemState; 4],
    inline_step: Option<String>,
    joined: bool,
    run_finish_sent: bool,
}

impl LifecycleCoordinator {
    /// Create a coordinator with an empty identity store.
    #[must_use]
    pub fn new(options: LifecycleOptions, delivery: DeliveryClient) -> Self {
        Self {
            options,
            identity: IdentityStore::new(),
            delivery,
            slot: None,
            states: [ItemState::NotStarted; 4],
            inline_step: None,
            joined: false,
            run_finish_sent: false,
        }
    }

    /// Publish the run identifier to `slot` when the run starts.
    #[must_use]
    pub fn with_slot(mut self, slot: Arc<dyn RunSlot>) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Current state of the item at `level`.
    #[must_use]
    pub fn state(&self, level: Level) -> ItemState { self.states[level.index()] }

    /// Identifiers of the active items.
    #[must_use]
    pub fn identity(&self) -> &IdentityStore { &self.identity }

    /// Options the coordinator was built with.
    #[must_use]
    pub fn options(&self) -> &LifecycleOptions { &self.options }

    /// Whether the run is owned by someone else and must not be finished here.
    #[must_use]
    pub fn is_joined(&self) -> bool { self.joined }

    pub(crate) fn delivery(&self) -> &DeliveryClient { &self.delivery }

    pub(crate) fn slot(&self) -> Option<&Arc<dyn RunSlot>> { self.slot.as_ref() }

    /// Whether the backend client accepted a finish request for the run.
    pub(crate) fn run_finish_sent(&self) -> bool { self.run_finish_sent }

    /// Identifier of the run in progress.
    #[must_use]
    pub fn run_id(&self) -> Option<&ItemId> { self.identity.get(Level::Run) }

    /// Identifier of the run in progress, or else of the run this coordinator
    /// last finished.
    #[must_use]
    pub fn last_run_id(&self) -> Option<&ItemId> {
        self.run_id().or(self.identity.last_finished_run())
    }

    /// Link to the run in the backend UI.
    #[must_use]
    pub fn run_url(&self) -> Option<String> {
        self.last_run_id()
            .map(|id| run_url(&self.options.endpoint, &self.options.project, id))
    }

    /// Whether the run has started and not yet finished.
    #[must_use]
    pub fn is_active(&self) -> bool { self.state(Level::Run) == ItemState::Active }

    /// Start the run, or return the active one.
    ///
    /// Configured name and description take precedence over the arguments.
    /// With an explicit run id the run is joined and no request is sent.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if the run already finished and
    /// [`ReportError::Connectivity`] if the backend could not be reached.
    pub fn start_run(
        &mut self,
        name: Option<&str>,
        description: Option<&str>,
    ) -> ReportResult<ItemHandle> {
        match self.state(Level::Run) {
            ItemState::Active => return Ok(self.existing(Level::Run)),
            ItemState::Finished => {
                warn!("start run skipped: the run already finished");
                return Err(ReportError::missing("start run", Level::Run));
            }
            ItemState::NotStarted => {}
        }

        if let Some(id) = self.options.explicit_run_id.clone() {
            info!("joining externally owned run {id}");
            self.joined = true;
            return Ok(self.activate(Level::Run, id));
        }

        let mut attributes = self.options.run_attributes.clone();
        attributes.push(Attribute::system(
            "skippedIssue",
            self.options.skipped_is_issue.to_string(),
        ));
        let request = StartRunRequest {
            uuid: None,
            name: self
                .options
                .run_name
                .clone()
                .or_else(|| name.map(str::to_owned))
                .unwrap_or_else(|| DEFAULT_RUN_NAME.to_owned()),
            description: self
                .options
                .run_description
                .clone()
                .or_else(|| description.map(str::to_owned)),
            attributes,
            start_time: Utc::now(),
        };
        let id = self.delivery.start_run(&request)?;
        info!("run {id} started: {}", request.name);
        let handle = self.activate(Level::Run, id.clone());
        self.note_reported_run(&id);
        self.publish(&id);
        Ok(handle)
    }

    /// Start a suite, starting the run first if needed.
    ///
    /// `tags` must already be normalised; `key:value` tags become attributes
    /// and anything else is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if the run already finished and
    /// [`ReportError::Connectivity`] if the backend could not be reached.
    pub fn start_suite(
        &mut self,
        name: &str,
        tags: &[String],
        description: Option<&str>,
    ) -> ReportResult<ItemHandle> {
        if self.state(Level::Suite) == ItemState::Active {
            return Ok(self.existing(Level::Suite));
        }
        self.reset(Level::Suite);
        if self.state(Level::Run) == ItemState::NotStarted {
            self.start_run(Some(name), description)?;
        }
        let Some(run) = self.active_id(Level::Run) else {
            return Err(self.skip("start suite", Level::Run));
        };

        let mut request = item_request(run, None, name, ItemKind::Suite, tags);
        request.description = description.map(str::to_owned);
        let id = self.delivery.start_item(&request)?;
        Ok(self.activate(Level::Suite, id))
    }

    /// Start a case under the active suite.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if no suite is active and
    /// [`ReportError::Connectivity`] if the backend could not be reached.
    pub fn start_case(
        &mut self,
        name: &str,
        tags: &[String],
        test_case_id: Option<&str>,
    ) -> ReportResult<ItemHandle> {
        if self.state(Level::Case) == ItemState::Active {
            return Ok(self.existing(Level::Case));
        }
        self.reset(Level::Case);
        let (Some(run), Some(suite)) = (self.active_id(Level::Run), self.active_id(Level::Suite))
        else {
            return Err(self.skip("start case", Level::Suite));
        };

        let mut request = item_request(run, Some(suite), name, ItemKind::Scenario, tags);
        request.test_case_id = test_case_id.map(str::to_owned);
        let id = self.delivery.start_item(&request)?;
        Ok(self.activate(Level::Case, id))
    }

    /// Start a step under the active case.
    ///
    /// With [`StepLayout::InlineLog`] no item is created; the step is written
    /// as a log line under its case when it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if no case is active and
    /// [`ReportError::Connectivity`] if the backend could not be reached.
    pub fn start_step(&mut self, name: &str) -> ReportResult<ItemHandle> {
        if self.state(Level::Step) == ItemState::Active {
            return Ok(self.existing(Level::Step));
        }
        self.reset(Level::Step);
        let (Some(run), Some(case)) = (self.active_id(Level::Run), self.active_id(Level::Case)) else {
            return Err(self.skip("start step", Level::Case));
        };

        let layout = self.options.step_layout;
        if layout == StepLayout::InlineLog {
            self.inline_step = Some(name.to_owned());
            self.set_state(Level::Step, ItemState::Active);
            return Ok(ItemHandle {
                level: Level::Step,
                id: None,
                reused: false,
            });
        }

        let mut request = item_request(run, Some(case), name, ItemKind::Step, &[]);
        request.has_stats = layout == StepLayout::FlatItem;
        let id = self.delivery.start_item(&request)?;
        Ok(self.activate(Level::Step, id))
    }

    /// Finish the active suite, interrupting any unfinished case or step.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if no suite was started and
    /// [`ReportError::Connectivity`] if the backend could not be reached.
    pub fn finish_suite(&mut self, status: impl Into<CallerStatus>) -> ReportResult<FinishOutcome> {
        self.finish_level(Level::Suite, status.into().to_item_status())
    }

    /// Finish the active case, interrupting any unfinished step.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if no case was started and
    /// [`ReportError::Connectivity`] if the backend could not be reached.
    pub fn finish_case(&mut self, status: impl Into<CallerStatus>) -> ReportResult<FinishOutcome> {
        self.finish_level(Level::Case, status.into().to_item_status())
    }

    /// Finish the active step.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if no step was started and
    /// [`ReportError::Connectivity`] if the backend could not be reached.
    pub fn finish_step(&mut self, status: impl Into<CallerStatus>) -> ReportResult<FinishOutcome> {
        self.finish_level(Level::Step, status.into().to_item_status())
    }

    /// Issue the logical finish of the run.
    ///
    /// Unfinished suites, cases and steps are finished as interrupted first.
    /// The run identifier moves to the finished-run cache, where late logs and
    /// finalization still find it. A joined run is left open for its owner.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if the run never started and
    /// [`ReportError::Connectivity`] if the backend could not be reached.
    pub fn finish_run(&mut self, status: Option<ItemStatus>) -> ReportResult<FinishOutcome> {
        match self.state(Level::Run) {
            ItemState::Finished => {
                debug!("finish run ignored: run already finished");
                return Ok(FinishOutcome::AlreadyFinished);
            }
            ItemState::NotStarted => return Err(self.skip("finish run", Level::Run)),
            ItemState::Active => {}
        }
        self.interrupt_children(Level::Run);
        let Some(id) = self.identity.get(Level::Run).cloned() else {
            self.set_state(Level::Run, ItemState::Finished);
            return Err(self.skip("finish run", Level::Run));
        };
        self.set_state(Level::Run, ItemState::Finished);

        if self.joined {
            info!("run {id} is owned externally; leaving it open");
            return Ok(FinishOutcome::Finished);
        }
        let result = self.delivery.finish_run(&id, &FinishRequest::now(status));
        self.identity.clear(Level::Run);
        self.identity.remember_finished_run(id.clone());
        if result.is_ok() {
            self.run_finish_sent = true;
            info!("run {id} finish requested");
        }
        result.map(|()| FinishOutcome::Finished)
    }

    /// Log a message against the innermost active item.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if there is no run and
    /// [`ReportError::Connectivity`] if the backend refused the entry.
    pub fn log(&self, message: &str, level: LogLevel) -> ReportResult<()> {
        self.send_log("log message", message.to_owned(), level, None)
    }

    /// Attach a file to the innermost active item.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if there is no run and
    /// [`ReportError::Connectivity`] if the backend refused the entry.
    pub fn attach(&self, data: Bytes, name: &str, mime_type: &str) -> ReportResult<()> {
        let attachment = Attachment {
            name: name.to_owned(),
            mime_type: mime_type.to_owned(),
            data,
        };
        self.send_log("attach file", name.to_owned(), LogLevel::Info, Some(attachment))
    }

    /// Log an error and its source chain at error level.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Consistency`] if there is no run and
    /// [`ReportError::Connectivity`] if the backend refused the entry.
    pub fn log_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        context: &str,
    ) -> ReportResult<()> {
        let mut message = if context.is_empty() {
            error.to_string()
        } else {
            format!("{context}: {error}")
        };
        let mut source = error.source();
        while let Some(cause) = source {
            let _ = write!(message, "\ncaused by: {cause}");
            source = cause.source();
        }
        self.send_log("log exception", message, LogLevel::Error, None)
    }

    /// Forget the run once finalization is done with it.
    pub(crate) fn clear_run(&mut self) {
        self.identity.teardown();
        self.inline_step = None;
        if self.state(Level::Run) == ItemState::Active {
            self.set_state(Level::Run, ItemState::Finished);
        }
    }

    fn finish_level(&mut self, level: Level, status: ItemStatus) -> ReportResult<FinishOutcome> {
        let operation = finish_operation(level);
        match self.state(level) {
            ItemState::Finished => {
                debug!("{operation} ignored: {level} already finished");
                return Ok(FinishOutcome::AlreadyFinished);
            }
            ItemState::NotStarted => return Err(self.skip(operation, level)),
            ItemState::Active => {}
        }
        self.interrupt_children(level);

        if level == Level::Step
            && let Some(name) = self.inline_step.take()
        {
            self.set_state(Level::Step, ItemState::Finished);
            let severity = if status == ItemStatus::Failed {
                LogLevel::Error
            } else {
                LogLevel::Info
            };
            return self
                .log(&format!("[{status}] {name}"), severity)
                .map(|()| FinishOutcome::Finished);
        }

        let Some(id) = self.identity.get(level).cloned() else {
            self.set_state(level, ItemState::Finished);
            return Err(self.skip(operation, level));
        };
        let request = self.finish_request(status);
        let result = self.delivery.finish_item(&id, &request);
        // Cleared whatever the outcome: the retry budget is already spent.
        self.identity.clear(level);
        self.set_state(level, ItemState::Finished);
        debug!("{level} {id} finished as {status}");
        result.map(|()| FinishOutcome::Finished)
    }

    /// Finish active descendants of `level` as interrupted, deepest first.
    fn interrupt_children(&mut self, level: Level) {
        for child in [Level::Step, Level::Case, Level::Suite] {
            if child.index() <= level.index() || self.state(child) != ItemState::Active {
                continue;
            }
            warn!("{child} still active while finishing the {level}; finishing it as INTERRUPTED");
            if let Err(err) = self.finish_level(child, ItemStatus::Interrupted) {
                debug!("interrupting {child} failed: {err}");
            }
        }
    }

    fn finish_request(&self, status: ItemStatus) -> FinishRequest {
        let mut request = FinishRequest::now(Some(status));
        request.launch_uuid = self.identity.get(Level::Run).cloned();
        if status == ItemStatus::Skipped && !self.options.skipped_is_issue {
            request.issue = Some(Issue {
                issue_type: IssueType::NotIssue,
            });
        }
        request
    }

    fn send_log(
        &self,
        operation: &'static str,
        message: String,
        level: LogLevel,
        attachment: Option<Attachment>,
    ) -> ReportResult<()> {
        let Some(run) = self.last_run_id().cloned() else {
            return Err(self.skip(operation, Level::Run));
        };
        let request = LogRequest {
            launch_uuid: run,
            item: self.innermost_item(),
            level,
            message,
            attachment,
            time: Utc::now(),
        };
        self.delivery.log(&request)
    }

    fn innermost_item(&self) -> Option<ItemId> {
        [Level::Step, Level::Case, Level::Suite]
            .into_iter()
            .find_map(|level| self.active_id(level))
    }

    fn active_id(&self, level: Level) -> Option<ItemId> {
        if self.state(level) == ItemState::Active {
            self.identity.get(level).cloned()
        } else {
            None
        }
    }

    fn existing(&self, level: Level) -> ItemHandle {
        ItemHandle {
            level,
            id: self.identity.get(level).cloned(),
            reused: true,
        }
    }

    fn activate(&mut self, level: Level, id: ItemId) -> ItemHandle {
        self.identity.set(level, id.clone());
        self.set_state(level, ItemState::Active);
        if level != Level::Run {
            debug!("{level} {id} started");
        }
        ItemHandle {
            level,
            id: Some(id),
            reused: false,
        }
    }

    /// A finished suite, case or step makes room for the next one.
    fn reset(&mut self, level: Level) {
        if self.state(level) == ItemState::Finished {
            self.states[level.index()] = ItemState::NotStarted;
        }
    }

    fn set_state(&mut self, level: Level, state: ItemState) {
        let previous = std::mem::replace(&mut self.states[level.index()], state);
        if level == Level::Run || previous == state {
            return;
        }
        if state == ItemState::Active {
            metrics::inc_items();
        } else if previous == ItemState::Active {
            metrics::dec_items();
        }
    }

    fn skip(&self, operation: &'static str, level: Level) -> ReportError {
        warn!("{operation} skipped: no active {level}");
        ReportError::missing(operation, level)
    }

    fn note_reported_run(&mut self, tracked: &ItemId) {
        let Some(reported) = self.delivery.reported_run_id() else {
            return;
        };
        if &reported != tracked {
            debug!("backend client reports run {reported}; keeping {tracked}");
        }
        self.identity.note_reported_run(reported);
    }

    fn publish(&self, run: &ItemId) {
        if let Some(slot) = &self.slot
            && let Err(err) = slot.publish(run)
        {
            warn!("could not publish run {run} to the shared slot: {err}");
        }
    }
}

#[cfg(test)]
mod tests;
