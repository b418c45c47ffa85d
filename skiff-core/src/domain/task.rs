//! Task snapshot types
//!
//! A snapshot is the durable record of one pipeline execution. It is written
//! to `tasks/<id>` before and after every step, so the step statuses are the
//! single source of truth for progress and failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable record of one pipeline execution
///
/// Generic over the shared config type: the engine persists its typed
/// config, while API consumers read it back as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot<C = serde_json::Value> {
    pub id: Uuid,
    /// Pipeline name
    #[serde(rename = "type")]
    pub pipeline: String,
    pub cluster_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Incremented on every restart
    #[serde(default)]
    pub attempt: u32,
    pub step_statuses: Vec<StepStatus>,
    pub config: C,
}

/// Progress of one step within a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    pub step: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Todo,
    Executing,
    Success,
    Error,
    Cancelled,
    Skipped,
}

impl Status {
    /// Position in the progress order `todo < executing < terminal`
    pub fn rank(&self) -> u8 {
        match self {
            Status::Todo => 0,
            Status::Executing => 1,
            Status::Success | Status::Error | Status::Cancelled | Status::Skipped => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Finished without needing to run again
    pub fn is_done(&self) -> bool {
        matches!(self, Status::Success | Status::Skipped)
    }
}

impl StepStatus {
    pub fn todo(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: Status::Todo,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl<C> TaskSnapshot<C> {
    /// Overall status derived from the step statuses
    pub fn status(&self) -> Status {
        let statuses = || self.step_statuses.iter().map(|s| s.status);

        if statuses().any(|s| s == Status::Executing) {
            Status::Executing
        } else if statuses().any(|s| s == Status::Error) {
            Status::Error
        } else if statuses().any(|s| s == Status::Cancelled) {
            Status::Cancelled
        } else if statuses().all(|s| s.is_done()) {
            Status::Success
        } else {
            Status::Todo
        }
    }

    /// Index of the first step that still has to run
    pub fn resume_point(&self) -> Option<usize> {
        self.step_statuses.iter().position(|s| !s.status.is_done())
    }

    pub fn step(&self, name: &str) -> Option<&StepStatus> {
        self.step_statuses.iter().find(|s| s.step == name)
    }
}
