//! The task data model and the filter shape the store's list operation accepts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status. Transitions follow the directed graph:
/// `Pending -> {Assigned, InProgress, Canceled} -> {InProgress, Completed,
/// Failed, Canceled}`. The last three are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Whether `self -> next` is an edge of the status graph.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Pending => matches!(next, Assigned | InProgress | Canceled),
            Assigned => matches!(next, InProgress | Completed | Failed | Canceled),
            InProgress => matches!(next, InProgress | Completed | Failed | Canceled),
            Completed | Failed | Canceled => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// The fundamental unit of work in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee_id: Option<String>,
    pub team_id: Option<String>,
    pub parent_id: Option<String>,
    pub prerequisites: Vec<String>,
    pub labels: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Builds a new pending task with a fresh 128-bit hex id.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_task_id(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: Priority::Normal,
            assignee_id: None,
            team_id: None,
            parent_id: None,
            prerequisites: Vec::new(),
            labels: Vec::new(),
            metadata: HashMap::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_assignee(mut self, assignee_id: impl Into<String>) -> Self {
        self.assignee_id = Some(assignee_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Applies a status transition, stamping `updated_at`, `started_at`
    /// (no later than the first `InProgress` entry) and `completed_at`
    /// (exactly on entry to a terminal status).
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), crate::RatchetError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::RatchetError::Conflict(format!(
                "illegal transition {:?} -> {:?} for task {}",
                self.status, next, self.id
            )));
        }
        let now = Utc::now();
        if next == TaskStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// 128-bit random id, hex-encoded.
pub fn new_task_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Composable query for [`crate::store::TaskStore::list`]. Absent fields
/// are wildcards; present fields conjoin.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<String>,
    pub team_id: Option<String>,
    pub parent_id: Option<String>,
    pub label: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(assignee) = &self.assignee_id {
            if task.assignee_id.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if let Some(team) = &self.team_id {
            if task.team_id.as_deref() != Some(team.as_str()) {
                return false;
            }
        }
        if let Some(parent) = &self.parent_id {
            if task.parent_id.as_deref() != Some(parent.as_str()) {
                return false;
            }
        }
        if let Some(label) = &self.label {
            if !task.labels.iter().any(|l| l == label) {
                return false;
            }
        }
        true
    }
}
