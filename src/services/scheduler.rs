//! FIFO task scheduler with a single consumer.
//!
//! Tasks are persisted through the [`TaskRepository`]; the in-memory queue only
//! holds ids in submission order. `next` never blocks: the caller drives the
//! tick loop.
//!
//! Several processes may share one task table. Every status change is a
//! conditional write on the status it was read with, so a task is started at
//! most once and is never finished twice. A started task is leased to the
//! scheduler that claimed it; only an expired lease lets another process
//! declare it abandoned.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, TaskError};
use crate::domain::models::{Task, TaskAction, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskRepository};

/// What [`Scheduler::recover`] found after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub requeued: usize,
    /// RUNNING tasks whose lease had expired, now FAILED.
    pub interrupted: usize,
    /// RUNNING tasks still leased to a live scheduler, left alone.
    #[serde(default)]
    pub still_running: usize,
}

/// How long a claimed task stays owned without finishing.
pub const DEFAULT_TASK_LEASE: Duration = Duration::from_secs(3600);

pub struct Scheduler {
    tasks: Arc<dyn TaskRepository>,
    queue: Mutex<VecDeque<Uuid>>,
    owner: String,
    lease: chrono::Duration,
}

impl Scheduler {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self {
            tasks,
            queue: Mutex::new(VecDeque::new()),
            owner: format!("pid{}-{}", std::process::id(), Uuid::new_v4().simple()),
            lease: lease_duration(DEFAULT_TASK_LEASE),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease_duration(lease);
        self
    }

    /// Identity recorded on the tasks this scheduler claims.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Uuid>> {
        self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Rebuild the queue from storage.
    ///
    /// QUEUED tasks are re-enqueued oldest first. RUNNING tasks whose lease
    /// has expired cannot be resumed and are marked FAILED; RUNNING tasks
    /// still under lease belong to another live scheduler.
    pub async fn recover(&self) -> DomainResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let running = self
            .tasks
            .list(TaskFilter {
                status: Some(TaskStatus::Running),
                ..Default::default()
            })
            .await?;
        let now = Utc::now();
        for mut task in running {
            if !task.is_abandoned(now) {
                debug!(task_id = %task.id, owner = task.claimed_by.as_deref(), "Task still leased, leaving it running");
                report.still_running += 1;
                continue;
            }
            task.fail("interrupted: lease expired before the task finished")?;
            if self.tasks.update_if_status(&task, TaskStatus::Running).await? {
                warn!(
                    task_id = %task.id,
                    project_id = %task.project_id,
                    owner = task.claimed_by.as_deref(),
                    "Abandoned task marked failed"
                );
                report.interrupted += 1;
            }
        }

        let queued = self
            .tasks
            .list(TaskFilter {
                status: Some(TaskStatus::Queued),
                ..Default::default()
            })
            .await?;
        let mut queue = self.queue();
        queue.clear();
        queue.extend(queued.iter().map(|t| t.id));
        report.requeued = queue.len();
        drop(queue);

        info!(
            requeued = report.requeued,
            interrupted = report.interrupted,
            still_running = report.still_running,
            "Scheduler recovered"
        );
        Ok(report)
    }

    /// Enqueue `action` for `project_id`.
    ///
    /// Fails with `ProjectBusy` while the project has a QUEUED or RUNNING task.
    #[instrument(skip(self), fields(action = %action))]
    pub async fn submit(&self, project_id: Uuid, action: TaskAction) -> DomainResult<Task> {
        let task = Task::new(project_id, action);
        self.tasks.insert(&task).await?;
        self.queue().push_back(task.id);
        debug!(task_id = %task.id, "Task submitted");
        Ok(task)
    }

    /// Dequeue the oldest QUEUED task and claim it.
    ///
    /// Ids whose task was cancelled while waiting, or claimed by another
    /// scheduler, are skipped.
    pub async fn next(&self) -> DomainResult<Option<Task>> {
        loop {
            let popped = self.queue().pop_front();
            let Some(id) = popped else {
                return Ok(None);
            };
            let Some(mut task) = self.tasks.get(id).await? else {
                warn!(task_id = %id, "Queued task vanished from storage");
                continue;
            };
            if task.status != TaskStatus::Queued {
                debug!(task_id = %id, status = %task.status, "Skipping task that is no longer queued");
                continue;
            }
            task.claim(self.owner.as_str(), self.lease)?;
            if !self.tasks.update_if_status(&task, TaskStatus::Queued).await? {
                debug!(task_id = %id, "Task claimed by another scheduler");
                continue;
            }
            return Ok(Some(task));
        }
    }

    pub async fn complete(&self, task_id: Uuid) -> DomainResult<Task> {
        self.finish(task_id, |task| task.complete()).await
    }

    pub async fn fail(&self, task_id: Uuid, reason: &str) -> DomainResult<Task> {
        self.finish(task_id, |task| task.fail(reason)).await
    }

    /// Apply a status change, conditional on the status it was read with.
    async fn finish(
        &self,
        task_id: Uuid,
        change: impl FnOnce(&mut Task) -> Result<(), TaskError>,
    ) -> DomainResult<Task> {
        let mut task = self.load(task_id).await?;
        let read_as = task.status;
        change(&mut task)?;
        if self.tasks.update_if_status(&task, read_as).await? {
            return Ok(task);
        }
        let current = self.load(task_id).await?;
        Err(if current.is_terminal() {
            TaskError::AlreadyTerminal {
                task_id,
                status: current.status,
            }
        } else {
            TaskError::InvalidStateTransition {
                from: current.status,
                to: task.status,
            }
        }
        .into())
    }

    /// Cooperative cancellation: only a task still QUEUED can be cancelled.
    pub async fn cancel(&self, task_id: Uuid) -> DomainResult<Task> {
        let mut task = self.load(task_id).await?;
        if task.status == TaskStatus::Running {
            return Err(DomainError::ValidationFailed(format!(
                "task {task_id} is running and cannot be preempted"
            )));
        }
        task.fail("cancelled")?;
        if !self.tasks.update_if_status(&task, TaskStatus::Queued).await? {
            return Err(DomainError::ValidationFailed(format!(
                "task {task_id} left the queue before it could be cancelled"
            )));
        }
        self.queue().retain(|id| *id != task_id);
        info!(%task_id, "Task cancelled");
        Ok(task)
    }

    /// Hide a terminal task from default listings. Tasks are never deleted.
    pub async fn archive(&self, task_id: Uuid) -> DomainResult<Task> {
        let mut task = self.load(task_id).await?;
        task.archive()?;
        self.tasks.update(&task).await?;
        Ok(task)
    }

    pub async fn get(&self, task_id: Uuid) -> DomainResult<Option<Task>> {
        self.tasks.get(task_id).await
    }

    pub async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        self.tasks.list(filter).await
    }

    pub fn queued_len(&self) -> usize {
        self.queue().len()
    }

    async fn load(&self, task_id: Uuid) -> DomainResult<Task> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))
    }
}

/// Leases are capped at a year.
fn lease_duration(lease: Duration) -> chrono::Duration {
    let cap = chrono::Duration::days(365);
    chrono::Duration::from_std(lease).map_or(cap, |lease| lease.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteTaskRepository};

    async fn scheduler() -> Scheduler {
        let pool = create_migrated_test_pool().await.unwrap();
        Scheduler::new(Arc::new(SqliteTaskRepository::new(pool)))
    }

    #[tokio::test]
    async fn test_fifo_order_across_projects() {
        let s = scheduler().await;
        let a = s.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();
        let b = s.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();

        let first = s.next().await.unwrap().unwrap();
        assert_eq!(first.id, a.id);
        assert_eq!(first.status, TaskStatus::Running);
        assert_eq!(s.next().await.unwrap().unwrap().id, b.id);
        assert!(s.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_submission_for_busy_project_is_rejected() {
        let s = scheduler().await;
        let project = Uuid::new_v4();
        let first = s.submit(project, TaskAction::Advance).await.unwrap();

        match s.submit(project, TaskAction::Advance).await {
            Err(DomainError::ProjectBusy { task_id, .. }) => assert_eq!(task_id, first.id),
            other => panic!("expected ProjectBusy, got {other:?}"),
        }

        s.next().await.unwrap();
        s.complete(first.id).await.unwrap();
        s.submit(project, TaskAction::Advance).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_task_is_skipped() {
        let s = scheduler().await;
        let a = s.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();
        let b = s.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();
        s.cancel(a.id).await.unwrap();

        assert_eq!(s.next().await.unwrap().unwrap().id, b.id);
        let cancelled = s.get(a.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_terminal_status_is_set_once() {
        let s = scheduler().await;
        let task = s.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();
        s.next().await.unwrap();
        s.complete(task.id).await.unwrap();
        assert!(matches!(
            s.fail(task.id, "late").await,
            Err(DomainError::Task(TaskError::AlreadyTerminal { .. }))
        ));
    }

    #[tokio::test]
    async fn test_recover_requeues_and_fails_abandoned() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteTaskRepository::new(pool));
        let before = Scheduler::new(repo.clone()).with_lease(Duration::ZERO);
        let running = before.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();
        before.next().await.unwrap();
        let waiting = before.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();

        let after = Scheduler::new(repo);
        let report = after.recover().await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                requeued: 1,
                interrupted: 1,
                still_running: 0
            }
        );
        assert_eq!(after.get(running.id).await.unwrap().unwrap().status, TaskStatus::Failed);
        assert_eq!(after.next().await.unwrap().unwrap().id, waiting.id);
    }

    #[tokio::test]
    async fn test_recover_leaves_leased_task_to_its_owner() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteTaskRepository::new(pool));
        let worker = Scheduler::new(repo.clone());
        let task = worker.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();
        let claimed = worker.next().await.unwrap().unwrap();
        assert_eq!(claimed.claimed_by.as_deref(), Some(worker.owner()));

        let other = Scheduler::new(repo);
        let report = other.recover().await.unwrap();
        assert_eq!(report.interrupted, 0);
        assert_eq!(report.still_running, 1);

        let done = worker.complete(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_shared_queued_task_starts_once() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteTaskRepository::new(pool));
        let submitter = Scheduler::new(repo.clone());
        let task = submitter.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();

        let a = Scheduler::new(repo.clone());
        let b = Scheduler::new(repo);
        assert_eq!(a.recover().await.unwrap().requeued, 1);
        assert_eq!(b.recover().await.unwrap().requeued, 1);

        let started = a.next().await.unwrap().unwrap();
        assert_eq!(started.id, task.id);
        assert!(b.next().await.unwrap().is_none());
        assert!(submitter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finishing_twice_is_refused() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteTaskRepository::new(pool));
        let a = Scheduler::new(repo.clone());
        let b = Scheduler::new(repo);
        let task = a.submit(Uuid::new_v4(), TaskAction::Advance).await.unwrap();
        a.next().await.unwrap();

        b.fail(task.id, "operator gave up").await.unwrap();
        assert!(matches!(
            a.complete(task.id).await,
            Err(DomainError::Task(TaskError::AlreadyTerminal {
                status: TaskStatus::Failed,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_archive_requires_terminal() {
        let s = scheduler().await;
        let task = s.submit(Uuid::new_v4(), TaskAction::Status).await.unwrap();
        assert!(s.archive(task.id).await.is_err());
        s.cancel(task.id).await.unwrap();
        assert!(s.archive(task.id).await.unwrap().archived);
    }
}
