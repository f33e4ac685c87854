use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskStatus};

/// Filters for listing tasks
#[derive(Default, Debug, Clone)]
pub struct TaskFilter {
    pub project_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub include_archived: bool,
    pub limit: Option<i64>,
}

/// Repository port for scheduler tasks. Tasks are never deleted.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task. Fails with `ProjectBusy` when the project already
    /// has a queued or running task.
    async fn insert(&self, task: &Task) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    async fn update(&self, task: &Task) -> DomainResult<()>;

    /// Write `task` only if the stored row is still in status `expected`.
    /// Returns `false` when another writer changed the status first.
    async fn update_if_status(&self, task: &Task, expected: TaskStatus) -> DomainResult<bool>;

    /// Tasks ordered by `enqueued_at`, oldest first.
    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// The queued or running task of a project, if any.
    async fn in_flight_for_project(&self, project_id: Uuid) -> DomainResult<Option<Task>>;
}
