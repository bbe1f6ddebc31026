//! Status vocabularies and the mapping between them.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

/// Status vocabulary understood by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// The item passed.
    Passed,
    /// The item failed.
    Failed,
    /// The item did not run.
    Skipped,
    /// Execution stopped before the item completed.
    Interrupted,
}

impl ItemStatus {
    /// Backend spelling of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Passed => "PASSED",
            ItemStatus::Failed => "FAILED",
            ItemStatus::Skipped => "SKIPPED",
            ItemStatus::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Issue classification attached to finished items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum IssueType {
    /// Marks a skipped item as not requiring investigation.
    #[serde(rename = "NOT_ISSUE")]
    NotIssue,
}

/// Status as reported by the test-execution engine.
///
/// Engines use varied spellings; conversion from `&str` is case-insensitive
/// and anything unrecognised lands in [`CallerStatus::Other`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallerStatus {
    /// Passed.
    Passed,
    /// Failed an assertion.
    Failed,
    /// Raised an unexpected error.
    Error,
    /// Deliberately skipped.
    Skipped,
    /// Step definition missing.
    Undefined,
    /// Step definition pending.
    Pending,
    /// Never executed.
    Untested,
    /// Aborted by the user or the engine.
    Interrupted,
    /// Any other spelling.
    Other(String),
}

impl From<&str> for CallerStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "passed" | "pass" | "ok" => Self::Passed,
            "failed" | "fail" | "failure" => Self::Failed,
            "error" | "errored" => Self::Error,
            "skipped" | "skip" => Self::Skipped,
            "undefined" => Self::Undefined,
            "pending" => Self::Pending,
            "untested" => Self::Untested,
            "interrupted" | "cancelled" | "canceled" | "aborted" => Self::Interrupted,
            _ => Self::Other(value.to_owned()),
        }
    }
}

impl From<String> for CallerStatus {
    fn from(value: String) -> Self { Self::from(value.as_str()) }
}

impl From<ItemStatus> for CallerStatus {
    fn from(value: ItemStatus) -> Self {
        match value {
            ItemStatus::Passed => Self::Passed,
            ItemStatus::Failed => Self::Failed,
            ItemStatus::Skipped => Self::Skipped,
            ItemStatus::Interrupted => Self::Interrupted,
        }
    }
}

impl CallerStatus {
    /// Map onto the backend vocabulary.
    ///
    /// Unknown spellings map to [`ItemStatus::Passed`]: the reporter mirrors
    /// outcomes and never invents failures.
    ///
    /// ```
    /// use reportwire::model::{CallerStatus, ItemStatus};
    ///
    /// assert_eq!(CallerStatus::from("FAILED").to_item_status(), ItemStatus::Failed);
    /// assert_eq!(CallerStatus::from("undefined").to_item_status(), ItemStatus::Failed);
    /// assert_eq!(CallerStatus::from("mystery").to_item_status(), ItemStatus::Passed);
    /// ```
    #[must_use]
    pub fn to_item_status(&self) -> ItemStatus {
        match self {
            Self::Passed => ItemStatus::Passed,
            Self::Failed | Self::Error | Self::Undefined => ItemStatus::Failed,
            Self::Skipped | Self::Pending | Self::Untested => ItemStatus::Skipped,
            Self::Interrupted => ItemStatus::Interrupted,
            Self::Other(raw) => {
                debug!("unknown status {raw:?} reported as PASSED");
                ItemStatus::Passed
            }
        }
    }
}
