//! Registry of the identifiers of the currently active items.
//!
//! [`IdentityStore`] is the single owner of canonical identifiers for each
//! reporting [`Level`]. It is an explicitly constructed value rather than a
//! process global so tests can create isolated instances. The store is only
//! ever touched from the foreground hook thread.

use std::fmt;

use crate::model::ItemId;

/// Nesting level of a reported item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    /// Top-level container for one session.
    Run,
    /// Grouping below the run, usually one feature.
    Suite,
    /// One scenario.
    Case,
    /// Smallest reported unit.
    Step,
}

impl Level {
    /// Parent level, or `None` for [`Level::Run`].
    #[must_use]
    pub fn parent(self) -> Option<Level> {
        match self {
            Level::Run => None,
            Level::Suite => Some(Level::Run),
            Level::Case => Some(Level::Suite),
            Level::Step => Some(Level::Case),
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Level::Run => 0,
            Level::Suite => 1,
            Level::Case => 2,
            Level::Step => 3,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Level::Run => "run",
            Level::Suite => "suite",
            Level::Case => "case",
            Level::Step => "step",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Where a resolved run identifier came from.
///
/// Variants are ordered by precedence, strongest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunIdSource {
    /// Supplied by the caller or recorded when this process started the run.
    Explicit,
    /// Reported by the backend client's own bookkeeping.
    Backend,
    /// Remembered from a previous finish call.
    Cached,
}

/// A run identifier together with its provenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRun {
    /// The identifier.
    pub id: ItemId,
    /// The slot it was read from.
    pub source: RunIdSource,
}

/// Identifier registry for the four reporting levels.
///
/// The run level keeps three candidate slots; see [`IdentityStore::resolve_run`]
/// for how they are ranked.
#[derive(Debug, Default)]
pub struct IdentityStore {
    items: [Option<ItemId>; 4],
    reported_run: Option<ItemId>,
    finished_run: Option<ItemId>,
}

impl IdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record the identifier for `level`, replacing any previous value.
    pub fn set(&mut self, level: Level, id: ItemId) { self.items[level.index()] = Some(id); }

    /// Identifier recorded for `level`.
    ///
    /// For [`Level::Run`] the explicit slot wins over the backend-reported
    /// one. The finished-run cache is never consulted here; use
    /// [`IdentityStore::last_finished_run`] or
    /// [`IdentityStore::resolve_run`] for that.
    #[must_use]
    pub fn get(&self, level: Level) -> Option<&ItemId> {
        match level {
            Level::Run => self.items[0].as_ref().or(self.reported_run.as_ref()),
            other => self.items[other.index()].as_ref(),
        }
    }

    /// Forget the identifier for `level`.
    ///
    /// Clearing [`Level::Run`] empties every run slot, including the cache,
    /// so a repeated finalization finds nothing to do.
    pub fn clear(&mut self, level: Level) {
        self.items[level.index()] = None;
        if level == Level::Run {
            self.reported_run = None;
            self.finished_run = None;
        }
    }

    /// Record the run identifier the backend client believes is current.
    pub fn note_reported_run(&mut self, id: ItemId) { self.reported_run = Some(id); }

    /// Remember `id` as the most recently finished run.
    pub fn remember_finished_run(&mut self, id: ItemId) { self.finished_run = Some(id); }

    /// Identifier of the last run a finish request was issued for.
    #[must_use]
    pub fn last_finished_run(&self) -> Option<&ItemId> { self.finished_run.as_ref() }

    /// Resolve the run identifier across every source.
    ///
    /// Precedence is explicit, then backend-reported, then cached.
    ///
    /// ```
    /// use reportwire::{
    ///     identity::{IdentityStore, Level, RunIdSource},
    ///     model::ItemId,
    /// };
    ///
    /// let mut store = IdentityStore::new();
    /// store.remember_finished_run(ItemId::from("cached"));
    /// store.note_reported_run(ItemId::from("reported"));
    /// let resolved = store.resolve_run().expect("a run id is available");
    /// assert_eq!(resolved.source, RunIdSource::Backend);
    ///
    /// store.set(Level::Run, ItemId::from("explicit"));
    /// let resolved = store.resolve_run().expect("a run id is available");
    /// assert_eq!(resolved.id.as_str(), "explicit");
    /// ```
    #[must_use]
    pub fn resolve_run(&self) -> Option<ResolvedRun> {
        let candidates = [
            (self.items[0].as_ref(), RunIdSource::Explicit),
            (self.reported_run.as_ref(), RunIdSource::Backend),
            (self.finished_run.as_ref(), RunIdSource::Cached),
        ];
        candidates.into_iter().find_map(|(id, source)| {
            id.map(|id| ResolvedRun {
                id: id.clone(),
                source,
            })
        })
    }

    /// Drop every identifier, returning the store to its initial state.
    pub fn teardown(&mut self) { *self = Self::default(); }
}
