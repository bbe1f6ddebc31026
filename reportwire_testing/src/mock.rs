//! Scriptable in-memory reporting backend.
//!
//! [`MockServer`] plays the remote backend. It hands out a [`MockBackend`]
//! (the client SDK surface, delivering synchronously) and a
//! [`MockDirectApi`] (the queue-free finish endpoint), records every accepted
//! request, counts every attempt, and fails attempts on demand. Finishing a
//! run is idempotent on the server, as on a real backend: repeated finish
//! requests are recorded but the run transitions once.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use reportwire::{
    backend::{DirectApi, FlushOutcome, ReportBackend},
    error::BackendError,
    model::{FinishRequest, ItemId, LogRequest, StartItemRequest, StartRunRequest},
};

/// Operations the mock can count and fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// `ReportBackend::start_run`.
    StartRun,
    /// `ReportBackend::finish_run`.
    FinishRun,
    /// `ReportBackend::start_item`.
    StartItem,
    /// `ReportBackend::finish_item`.
    FinishItem,
    /// `ReportBackend::log`.
    Log,
    /// `ReportBackend::terminate`.
    Terminate,
    /// `DirectApi::finish_run`.
    DirectFinish,
}

/// A request the server accepted.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// A run was started.
    StartRun(StartRunRequest),
    /// A run finish arrived, through the queue or directly.
    FinishRun {
        /// Run being finished.
        run: ItemId,
        /// Payload.
        request: FinishRequest,
        /// Whether it came through [`MockDirectApi`].
        direct: bool,
    },
    /// An item was started.
    StartItem(StartItemRequest),
    /// An item was finished.
    FinishItem {
        /// Item being finished.
        item: ItemId,
        /// Payload.
        request: FinishRequest,
    },
    /// A log entry arrived.
    Log(LogRequest),
}

#[derive(Default)]
struct ServerState {
    requests: Vec<Request>,
    attempts: HashMap<Op, usize>,
    failures: HashMap<Op, (usize, Option<BackendError>)>,
    finished_runs: Vec<ItemId>,
    next_id: usize,
    last_run: Option<ItemId>,
    reported_run: Option<Option<ItemId>>,
    flush_outcome: Option<FlushOutcome>,
    closed: bool,
}

impl ServerState {
    /// Count an attempt and consume a scripted failure if one is pending.
    fn attempt(&mut self, op: Op) -> Result<(), BackendError> {
        *self.attempts.entry(op).or_default() += 1;
        if op != Op::DirectFinish && op != Op::Terminate && self.closed {
            return Err(BackendError::Closed);
        }
        match self.failures.get_mut(&op) {
            Some((remaining, error)) if *remaining > 0 => {
                *remaining -= 1;
                Err(error
                    .clone()
                    .unwrap_or_else(|| BackendError::Transport("scripted failure".into())))
            }
            _ => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: &str) -> ItemId {
        self.next_id += 1;
        ItemId::from(format!("{prefix}-{}", self.next_id))
    }

    fn finish_run(&mut self, run: &ItemId, request: &FinishRequest, direct: bool) {
        self.requests.push(Request::FinishRun {
            run: run.clone(),
            request: request.clone(),
            direct,
        });
        if !self.finished_runs.contains(run) {
            self.finished_runs.push(run.clone());
        }
    }
}

/// In-memory backend shared by a [`MockBackend`] and a [`MockDirectApi`].
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    /// Create an empty server.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Client SDK surface talking to this server.
    #[must_use]
    pub fn backend(&self) -> Arc<MockBackend> { Arc::new(MockBackend(self.clone())) }

    /// Direct finish endpoint of this server.
    #[must_use]
    pub fn direct_api(&self) -> Arc<MockDirectApi> { Arc::new(MockDirectApi(self.clone())) }

    /// Fail the next `times` attempts of `op` with a retryable transport
    /// error.
    pub fn fail_next(&self, op: Op, times: usize) { self.state().failures.insert(op, (times, None)); }

    /// Fail the next `times` attempts of `op` with `error`.
    pub fn fail_next_with(&self, op: Op, times: usize, error: BackendError) {
        self.state().failures.insert(op, (times, Some(error)));
    }

    /// Make `terminate` succeed with `outcome`.
    pub fn flush_outcome(&self, outcome: FlushOutcome) { self.state().flush_outcome = Some(outcome); }

    /// Override what the client reports as the current run.
    pub fn report_run_id(&self, id: Option<ItemId>) { self.state().reported_run = Some(id); }

    /// Attempts made for `op`, failed ones included.
    #[must_use]
    pub fn attempts(&self, op: Op) -> usize { self.state().attempts.get(&op).copied().unwrap_or(0) }

    /// Every accepted request in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> { self.state().requests.clone() }

    /// Accepted run starts.
    #[must_use]
    pub fn started_runs(&self) -> Vec<StartRunRequest> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::StartRun(run) => Some(run),
                _ => None,
            })
            .collect()
    }

    /// Accepted item starts.
    #[must_use]
    pub fn started_items(&self) -> Vec<StartItemRequest> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::StartItem(item) => Some(item),
                _ => None,
            })
            .collect()
    }

    /// Accepted item finishes.
    #[must_use]
    pub fn finished_items(&self) -> Vec<(ItemId, FinishRequest)> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::FinishItem { item, request } => Some((item, request)),
                _ => None,
            })
            .collect()
    }

    /// Accepted log entries.
    #[must_use]
    pub fn logs(&self) -> Vec<LogRequest> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::Log(log) => Some(log),
                _ => None,
            })
            .collect()
    }

    /// Accepted run finish requests, queued and direct.
    #[must_use]
    pub fn run_finish_requests(&self) -> Vec<(ItemId, bool)> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::FinishRun { run, direct, .. } => Some((run, direct)),
                _ => None,
            })
            .collect()
    }

    /// Runs that transitioned to finished, each listed once.
    #[must_use]
    pub fn finished_runs(&self) -> Vec<ItemId> { self.state().finished_runs.clone() }
}

/// [`ReportBackend`] delivering straight into a [`MockServer`].
pub struct MockBackend(MockServer);

impl ReportBackend for MockBackend {
    fn start_run(&self, request: &StartRunRequest) -> Result<ItemId, BackendError> {
        let mut state = self.0.state();
        state.attempt(Op::StartRun)?;
        state.requests.push(Request::StartRun(request.clone()));
        let id = request.uuid.clone().unwrap_or_else(|| state.next_id("run"));
        state.last_run = Some(id.clone());
        Ok(id)
    }

    fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        let mut state = self.0.state();
        state.attempt(Op::FinishRun)?;
        state.finish_run(run, request, false);
        Ok(())
    }

    fn start_item(&self, request: &StartItemRequest) -> Result<ItemId, BackendError> {
        let mut state = self.0.state();
        state.attempt(Op::StartItem)?;
        state.requests.push(Request::StartItem(request.clone()));
        Ok(request.uuid.clone().unwrap_or_else(|| state.next_id("item")))
    }

    fn finish_item(&self, item: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        let mut state = self.0.state();
        state.attempt(Op::FinishItem)?;
        state.requests.push(Request::FinishItem {
            item: item.clone(),
            request: request.clone(),
        });
        Ok(())
    }

    fn log(&self, request: &LogRequest) -> Result<(), BackendError> {
        let mut state = self.0.state();
        state.attempt(Op::Log)?;
        state.requests.push(Request::Log(request.clone()));
        Ok(())
    }

    fn reported_run_id(&self) -> Option<ItemId> {
        let state = self.0.state();
        match &state.reported_run {
            Some(reported) => reported.clone(),
            None => state.last_run.clone(),
        }
    }

    fn terminate(&self) -> Result<FlushOutcome, BackendError> {
        let mut state = self.0.state();
        state.attempt(Op::Terminate)?;
        if state.closed {
            return Err(BackendError::Closed);
        }
        state.closed = true;
        Ok(state.flush_outcome.unwrap_or(FlushOutcome::Confirmed))
    }

    fn is_healthy(&self) -> bool { !self.0.state().closed }
}

/// [`DirectApi`] finishing runs straight on a [`MockServer`].
pub struct MockDirectApi(MockServer);

impl DirectApi for MockDirectApi {
    fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        let mut state = self.0.state();
        state.attempt(Op::DirectFinish)?;
        state.finish_run(run, request, true);
        Ok(())
    }
}
