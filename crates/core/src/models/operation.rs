//! Operation, and the priority/state/log types it's built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Scan,
    Organize,
    FetchMetadata,
    Backup,
    Restore,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Scan => "scan",
            OperationKind::Organize => "organize",
            OperationKind::FetchMetadata => "fetch_metadata",
            OperationKind::Backup => "backup",
            OperationKind::Restore => "restore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scan" => Some(OperationKind::Scan),
            "organize" => Some(OperationKind::Organize),
            "fetch_metadata" => Some(OperationKind::FetchMetadata),
            "backup" => Some(OperationKind::Backup),
            "restore" => Some(OperationKind::Restore),
            _ => None,
        }
    }
}

/// Three priority tiers. Ordered so that `High > Normal > Low` under the
/// derived `Ord`, matching the queue's `(-priority, enqueued_at)` min-heap key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Queued => "queued",
            OperationState::Running => "running",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
            OperationState::Canceled => "canceled",
        }
    }

    /// Whether `self -> next` is one of the transitions the queue's state
    /// machine allows.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Canceled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Canceled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub fields: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub priority: Priority,
    pub state: OperationState,
    pub progress_current: u64,
    pub progress_total: u64,
    pub target_key: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub owning_user: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    pub result_summary: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub logs: Vec<LogEntry>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Operation {
    pub fn new(id: impl Into<String>, kind: OperationKind, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            priority,
            state: OperationState::Queued,
            progress_current: 0,
            progress_total: 0,
            target_key: None,
            enqueued_at: now,
            started_at: None,
            finished_at: None,
            owning_user: None,
            params: serde_json::Value::Null,
            result_summary: None,
            error_message: None,
            cancel_requested: false,
            logs: Vec::new(),
            last_heartbeat: now,
        }
    }

    pub fn next_log_seq(&self) -> u64 {
        self.logs.last().map(|l| l.seq + 1).unwrap_or(0)
    }
}

/// Scheduling key for the queue's min-heap: higher priority first, then
/// earlier enqueue time first, i.e. `(-priority, enqueued_at)`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScheduleKey {
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub operation_id: String,
}

impl Ord for ScheduleKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}

impl PartialOrd for ScheduleKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_to_running_is_allowed_but_not_reverse() {
        assert!(OperationState::Queued.can_transition_to(OperationState::Running));
        assert!(!OperationState::Running.can_transition_to(OperationState::Queued));
    }

    #[test]
    fn terminal_states_accept_no_further_transition() {
        assert!(!OperationState::Completed.can_transition_to(OperationState::Running));
        assert!(!OperationState::Canceled.can_transition_to(OperationState::Failed));
    }

    #[test]
    fn schedule_key_orders_high_priority_first() {
        let now = Utc::now();
        let high = ScheduleKey {
            priority: Priority::High,
            enqueued_at: now,
            operation_id: "a".into(),
        };
        let low = ScheduleKey {
            priority: Priority::Low,
            enqueued_at: now,
            operation_id: "b".into(),
        };
        assert!(high > low);
    }
}
