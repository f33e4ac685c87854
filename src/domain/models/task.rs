//! Scheduler task model.
//!
//! A task is one caller-requested unit of work against a project. Tasks are
//! never deleted; terminal tasks can be archived.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::TaskError;

/// Lifecycle status. QUEUED -> RUNNING -> COMPLETED | FAILED, plus
/// QUEUED -> FAILED for cooperative cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Queued => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked the engine to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskAction {
    /// Run one orchestrator step for the current phase.
    Advance,
    /// Record QA approval; valid only in AWAITING_QA_APPROVAL.
    ApproveQa,
    /// Record QA rejection and send the project back to CODING.
    RejectQa {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Audit-only status query; never touches the manifest.
    Status,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::ApproveQa => "approve_qa",
            Self::RejectQa { .. } => "reject_qa",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub action: TaskAction,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub archived: bool,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Scheduler instance running the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(project_id: Uuid, action: TaskAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            action,
            status: TaskStatus::Queued,
            error: None,
            archived: false,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            claimed_by: None,
            lease_expires_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn start(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Start the task on behalf of `owner`, holding it for `lease`.
    pub fn claim(&mut self, owner: impl Into<String>, lease: Duration) -> Result<(), TaskError> {
        self.start()?;
        self.claimed_by = Some(owner.into());
        self.lease_expires_at = self.started_at.map(|at| at + lease);
        Ok(())
    }

    /// A RUNNING task whose owner stopped holding it. Tasks started without a
    /// lease count as abandoned.
    pub fn is_abandoned(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running && self.lease_expires_at.map_or(true, |until| until <= now)
    }

    pub fn complete(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Completed)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(reason.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn archive(&mut self) -> Result<(), TaskError> {
        if !self.is_terminal() {
            return Err(TaskError::NotTerminal(self.id));
        }
        self.archived = true;
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                task_id: self.id,
                status: self.status,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
