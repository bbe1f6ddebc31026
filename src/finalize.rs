//! End-of-process run finalization.
//!
//! [`FinalizationGuard::finalize`] closes the run in a fixed order:
//!
//! 1. resolve the run id from the coordinator, then the shared slot, then the
//!    last-finished cache;
//! 2. issue the logical finish through the coordinator;
//! 3. wait the settle delay so late logs can enqueue;
//! 4. flush the delivery queue;
//! 5. wait the post-flush delay;
//! 6. if the flush could not confirm delivery, finish the run directly,
//!    bypassing the queue;
//! 7. clear the run id and the shared slot.
//!
//! Every step runs even when an earlier one failed. A second call for the
//! same run does nothing, including for a joined run whose id still sits in
//! the shared slot.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{DirectApi, FlushOutcome},
    config::Settings,
    delivery::DeliveryClient,
    error::ReportError,
    lifecycle::LifecycleCoordinator,
    metrics,
    model::{FinishRequest, ItemId, ItemStatus},
    slot::RunSlot,
};

/// Exit code used after finalizing on an interrupt.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// Where finalization found the run id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunSource {
    /// The coordinator's identity store.
    Tracked,
    /// The cross-process shared slot.
    SharedSlot,
    /// The last run a finish was requested for.
    Cached,
}

/// What the direct finish fallback did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Fallback {
    /// The queue flush confirmed delivery.
    #[default]
    NotNeeded,
    /// The run is owned elsewhere and was left open.
    Skipped,
    /// The direct finish was acknowledged.
    Delivered,
    /// The direct finish failed as well.
    Failed,
}

/// Summary of one finalization pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizationReport {
    /// Run that was finalized; `None` when there was nothing to do.
    pub run_id: Option<ItemId>,
    /// Where the run id came from.
    pub source: Option<RunSource>,
    /// Whether the queue flush confirmed every request.
    pub flush_confirmed: bool,
    /// Outcome of the direct fallback.
    pub fallback: Fallback,
}

impl FinalizationReport {
    /// Whether there was no run to finalize.
    #[must_use]
    pub fn is_noop(&self) -> bool { self.run_id.is_none() }

    /// Whether the remote report may be missing data.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        !self.flush_confirmed && self.fallback == Fallback::Failed
    }
}

/// Runs the closing sequence exactly once per run.
///
/// The guard also finalizes when dropped, so a run is closed even if the
/// embedding application never calls [`FinalizationGuard::finalize`].
pub struct FinalizationGuard {
    coordinator: Arc<Mutex<LifecycleCoordinator>>,
    delivery: DeliveryClient,
    direct: Arc<dyn DirectApi>,
    slot: Option<Arc<dyn RunSlot>>,
    settle_delay: Duration,
    post_flush_delay: Duration,
    finalized: Mutex<Option<ItemId>>,
    shutdown: CancellationToken,
}

impl FinalizationGuard {
    /// Guard the run tracked by `coordinator`, using `direct` for the fallback.
    ///
    /// Both delays default to 500 milliseconds.
    #[must_use]
    pub fn new(coordinator: Arc<Mutex<LifecycleCoordinator>>, direct: Arc<dyn DirectApi>) -> Self {
        let (delivery, slot) = {
            let locked = coordinator.lock().unwrap_or_else(PoisonError::into_inner);
            (locked.delivery().clone(), locked.slot().cloned())
        };
        Self {
            coordinator,
            delivery,
            direct,
            slot,
            settle_delay: Duration::from_millis(500),
            post_flush_delay: Duration::from_millis(500),
            finalized: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Read the two waits from validated settings.
    #[must_use]
    pub fn settings(self, settings: &Settings) -> Self {
        self.delays(settings.settle_delay, settings.post_flush_delay)
    }

    /// Set the waits before and after the queue flush.
    #[must_use]
    pub fn delays(mut self, settle: Duration, post_flush: Duration) -> Self {
        self.settle_delay = settle;
        self.post_flush_delay = post_flush;
        self
    }

    /// Spawn a thread that finalizes with [`ItemStatus::Interrupted`] on
    /// Ctrl-C and then exits the process with [`INTERRUPT_EXIT_CODE`].
    ///
    /// The thread holds only a weak reference and stops when the guard drops.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread could not be spawned.
    pub fn install_interrupt_handler(self: &Arc<Self>) -> io::Result<()> {
        let guard = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        thread::Builder::new()
            .name("reportwire-interrupt".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        warn!("interrupt handler unavailable: {err}");
                        return;
                    }
                };
                let interrupted = runtime.block_on(async {
                    tokio::select! {
                        signal = tokio::signal::ctrl_c() => signal.is_ok(),
                        () = shutdown.cancelled() => false,
                    }
                });
                if !interrupted {
                    return;
                }
                warn!("interrupted; finalizing the run before exit");
                if let Some(guard) = guard.upgrade() {
                    guard.finalize(Some(ItemStatus::Interrupted));
                }
                std::process::exit(INTERRUPT_EXIT_CODE);
            })?;
        Ok(())
    }

    /// Run the closing sequence.
    ///
    /// `status` is sent with the run finish; `None` lets the backend derive
    /// it. Failures are logged and reflected in the report, never returned.
    pub fn finalize(&self, status: Option<ItemStatus>) -> FinalizationReport {
        let mut finalized = self
            .finalized
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let Some((run, source)) = self.resolve_run() else {
            debug!("no run to finalize");
            return FinalizationReport::default();
        };
        if finalized.as_ref() == Some(&run) {
            debug!("run {run} already finalized");
            return FinalizationReport::default();
        }
        info!("finalizing run {run}");
        let joined = self.coordinator().is_joined();

        let finish_issued = match source {
            RunSource::Tracked => self.finish_logically(status),
            RunSource::SharedSlot | RunSource::Cached => self.finished_here(&run),
        };

        thread::sleep(self.settle_delay);
        let flush = match self.delivery.terminate() {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!("delivery queue flush failed: {err}");
                None
            }
        };
        thread::sleep(self.post_flush_delay);

        let flush_confirmed = finish_issued && flush == Some(FlushOutcome::Confirmed);
        let fallback = if joined {
            Fallback::Skipped
        } else if flush_confirmed {
            Fallback::NotNeeded
        } else {
            self.finish_directly(&run, status)
        };
        if fallback == Fallback::Failed {
            let err = ReportError::Finalization {
                run_id: run.to_string(),
            };
            error!("{err}; the remote report may be incomplete");
        }

        self.coordinator().clear_run();
        if !joined
            && let Some(slot) = &self.slot
            && let Err(err) = slot.clear()
        {
            warn!("could not clear the shared run slot: {err}");
        }
        *finalized = Some(run.clone());

        FinalizationReport {
            run_id: Some(run),
            source: Some(source),
            flush_confirmed,
            fallback,
        }
    }

    fn coordinator(&self) -> MutexGuard<'_, LifecycleCoordinator> {
        self.coordinator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_run(&self) -> Option<(ItemId, RunSource)> {
        if let Some(id) = self.coordinator().run_id() {
            return Some((id.clone(), RunSource::Tracked));
        }
        if let Some(slot) = &self.slot {
            match slot.load() {
                Ok(Some(id)) => return Some((id, RunSource::SharedSlot)),
                Ok(None) => {}
                Err(err) => warn!("could not read the shared run slot: {err}"),
            }
        }
        self.coordinator()
            .identity()
            .last_finished_run()
            .cloned()
            .map(|id| (id, RunSource::Cached))
    }

    /// Whether a finish request for the run reached the delivery queue.
    fn finish_logically(&self, status: Option<ItemStatus>) -> bool {
        let mut coordinator = self.coordinator();
        if let Err(err) = coordinator.finish_run(status) {
            warn!("run finish during finalization failed: {err}");
        }
        coordinator.run_finish_sent()
    }

    /// Whether this coordinator already queued the finish for `run`.
    fn finished_here(&self, run: &ItemId) -> bool {
        let coordinator = self.coordinator();
        coordinator.identity().last_finished_run() == Some(run) && coordinator.run_finish_sent()
    }

    fn finish_directly(&self, run: &ItemId, status: Option<ItemStatus>) -> Fallback {
        metrics::inc_fallbacks();
        info!("delivery of run {run} unconfirmed; finishing it directly");
        match self.direct.finish_run(run, &FinishRequest::now(status)) {
            Ok(()) => Fallback::Delivered,
            Err(err) => {
                error!("direct finish of run {run} failed: {err}");
                Fallback::Failed
            }
        }
    }
}

impl Drop for FinalizationGuard {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.finalize(None);
    }
}
