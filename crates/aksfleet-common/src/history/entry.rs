//! History records and queries

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::Error;

/// Kind of mutating operation a history entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// HPA min/max/target change
    UpdateHpa,
    /// Node pool scale or autoscaler change
    ApplyNodepool,
    /// CronJob suspended
    SuspendCronjob,
    /// CronJob resumed
    ResumeCronjob,
    /// Prometheus stack rollout
    RolloutPrometheus,
    /// Session saved
    SaveSession,
    /// Session loaded
    LoadSession,
    /// Session deleted
    DeleteSession,
    /// Batch of changes applied together
    ApplyBatch,
    /// Cluster state snapshot
    SnapshotCluster,
}

impl HistoryAction {
    /// Every action, in declaration order
    pub const ALL: [HistoryAction; 10] = [
        Self::UpdateHpa,
        Self::ApplyNodepool,
        Self::SuspendCronjob,
        Self::ResumeCronjob,
        Self::RolloutPrometheus,
        Self::SaveSession,
        Self::LoadSession,
        Self::DeleteSession,
        Self::ApplyBatch,
        Self::SnapshotCluster,
    ];

    /// Wire name (`apply_nodepool`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateHpa => "update_hpa",
            Self::ApplyNodepool => "apply_nodepool",
            Self::SuspendCronjob => "suspend_cronjob",
            Self::ResumeCronjob => "resume_cronjob",
            Self::RolloutPrometheus => "rollout_prometheus",
            Self::SaveSession => "save_session",
            Self::LoadSession => "load_session",
            Self::DeleteSession => "delete_session",
            Self::ApplyBatch => "apply_batch",
            Self::SnapshotCluster => "snapshot_cluster",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown history action: {}", s)))
    }
}

/// How a recorded operation ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    /// Everything applied
    #[default]
    Success,
    /// Nothing (or nothing usable) applied
    Failed,
    /// Some parts applied
    Partial,
}

impl HistoryStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            other => Err(Error::validation(format!("unknown history status: {}", other))),
        }
    }
}

/// One recorded mutation. Immutable once logged.
///
/// An empty `id` or a Unix-epoch `timestamp` means "not set yet"; the tracker
/// fills both in when the entry is logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique id (UUID v4)
    #[serde(default)]
    pub id: String,
    /// When the operation happened
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    /// What kind of operation
    pub action: HistoryAction,
    /// Affected resource (`namespace/name`, node pool name, ...)
    #[serde(default)]
    pub resource: String,
    /// Cluster the operation ran against
    #[serde(default)]
    pub cluster: String,
    /// State before the operation
    #[serde(default, deserialize_with = "null_as_empty")]
    pub before: Map<String, Value>,
    /// Requested or resulting state
    #[serde(default, deserialize_with = "null_as_empty")]
    pub after: Map<String, Value>,
    /// Outcome
    #[serde(default)]
    pub status: HistoryStatus,
    /// Failure description, empty on success
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_msg: String,
    /// Wall time the operation took
    #[serde(default)]
    pub duration_ms: u64,
    /// Session the operation belonged to, if any
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_name: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl HistoryEntry {
    /// New successful entry with id and timestamp unset
    pub fn new(action: HistoryAction, cluster: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            timestamp: DateTime::<Utc>::default(),
            action,
            resource: resource.into(),
            cluster: cluster.into(),
            before: Map::new(),
            after: Map::new(),
            status: HistoryStatus::Success,
            error_msg: String::new(),
            duration_ms: 0,
            session_name: String::new(),
        }
    }

    /// False until the tracker assigns a timestamp
    pub fn has_timestamp(&self) -> bool {
        self.timestamp != DateTime::<Utc>::default()
    }
}

/// AND-combined predicate over history entries; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    /// Exact action
    pub action: Option<HistoryAction>,
    /// Exact cluster name
    pub cluster: Option<String>,
    /// Exact resource
    pub resource: Option<String>,
    /// Exact status
    pub status: Option<HistoryStatus>,
    /// Earliest timestamp, inclusive
    pub start: Option<DateTime<Utc>>,
    /// Latest timestamp, inclusive
    pub end: Option<DateTime<Utc>>,
    /// Exact session name
    pub session_name: Option<String>,
}

impl HistoryFilter {
    /// Whether `entry` satisfies every set field
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.action.map_or(true, |a| entry.action == a)
            && self.cluster.as_deref().map_or(true, |c| entry.cluster == c)
            && self.resource.as_deref().map_or(true, |r| entry.resource == r)
            && self.status.map_or(true, |s| entry.status == s)
            && self.start.map_or(true, |start| entry.timestamp >= start)
            && self.end.map_or(true, |end| entry.timestamp <= end)
            && self
                .session_name
                .as_deref()
                .map_or(true, |s| entry.session_name == s)
    }
}

/// Aggregate counts over the in-memory history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    /// Entries considered
    pub total: usize,
    /// Entries with status `success`
    pub success: usize,
    /// Entries with status `failed`
    pub failed: usize,
    /// Entries with status `partial`
    pub partial: usize,
    /// Count per action
    pub by_action: BTreeMap<HistoryAction, usize>,
    /// Count per cluster
    pub by_cluster: BTreeMap<String, usize>,
}

impl HistoryStats {
    pub(crate) fn add(&mut self, entry: &HistoryEntry) {
        self.total += 1;
        match entry.status {
            HistoryStatus::Success => self.success += 1,
            HistoryStatus::Failed => self.failed += 1,
            HistoryStatus::Partial => self.partial += 1,
        }
        *self.by_action.entry(entry.action).or_default() += 1;
        *self.by_cluster.entry(entry.cluster.clone()).or_default() += 1;
    }
}
