//! Report items and the request payloads sent to the backend.
//!
//! Requests are plain serialisable values so any [`crate::backend`]
//! implementation can forward them unchanged.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod status;
pub mod tags;

pub use status::{CallerStatus, IssueType, ItemStatus};
pub use tags::{Attribute, normalize_tags, parse_attributes};

/// Identifier of a reported item.
///
/// Backends generate these; the queued backend uses random UUIDs so ids are
/// known before the request is delivered.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self { Self(uuid::Uuid::new_v4().to_string()) }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self { Self(value) }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Lifecycle state shared by every level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ItemState {
    /// No start call has succeeded yet.
    #[default]
    NotStarted,
    /// Started and accepting children.
    Active,
    /// Finished; no further transitions.
    Finished,
}

/// Backend item type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    /// A feature-level grouping.
    Suite,
    /// One scenario.
    Scenario,
    /// One step.
    Step,
}

/// How steps are represented in the report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepLayout {
    /// Steps become log lines under their case.
    InlineLog,
    /// Steps are items that count towards statistics.
    FlatItem,
    /// Steps are nested items excluded from statistics.
    #[default]
    NestedItem,
}

/// Severity of a log entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Finest detail.
    Trace,
    /// Diagnostic output.
    Debug,
    /// Normal output.
    #[default]
    Info,
    /// Something unexpected.
    Warn,
    /// A failure.
    Error,
}

/// Payload for starting the run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    /// Identifier assigned by the client, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<ItemId>,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Run attributes.
    pub attributes: Vec<Attribute>,
    /// Start timestamp.
    pub start_time: DateTime<Utc>,
}

/// Payload for starting a suite, case or step.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartItemRequest {
    /// Identifier assigned by the client, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<ItemId>,
    /// Run the item belongs to.
    pub launch_uuid: ItemId,
    /// Parent item; `None` for suites attached directly to the run.
    #[serde(skip)]
    pub parent: Option<ItemId>,
    /// Display name.
    pub name: String,
    /// Item type.
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Attributes derived from tags.
    pub attributes: Vec<Attribute>,
    /// Stable test case identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,
    /// Whether the item counts towards statistics.
    pub has_stats: bool,
    /// Start timestamp.
    pub start_time: DateTime<Utc>,
}

/// Issue attached to a finished item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Issue classification.
    pub issue_type: IssueType,
}

/// Payload for finishing the run or an item.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRequest {
    /// Run the item belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_uuid: Option<ItemId>,
    /// Final status; `None` lets the backend compute it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    /// Optional issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<Issue>,
    /// End timestamp.
    pub end_time: DateTime<Utc>,
}

impl FinishRequest {
    /// Finish request stamped with the current time.
    #[must_use]
    pub fn now(status: Option<ItemStatus>) -> Self {
        Self {
            launch_uuid: None,
            status,
            issue: None,
            end_time: Utc::now(),
        }
    }
}

/// File attached to a log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown in the report.
    pub name: String,
    /// MIME type of `data`.
    pub mime_type: String,
    /// Raw file contents.
    pub data: Bytes,
}

/// Payload for a log line, optionally carrying an attachment.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRequest {
    /// Run the entry belongs to.
    pub launch_uuid: ItemId,
    /// Item the entry is attached to; `None` logs against the run itself.
    pub item: Option<ItemId>,
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Optional file.
    pub attachment: Option<Attachment>,
    /// Timestamp.
    pub time: DateTime<Utc>,
}
