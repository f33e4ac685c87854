//! SQLite implementation of the TaskRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskAction, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskRepository};

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert(&self, task: &Task) -> DomainResult<()> {
        let payload = serde_json::to_string(&task.action)?;

        let result = sqlx::query(
            r#"INSERT INTO tasks (id, project_id, action, payload, status, error, archived,
               enqueued_at, started_at, finished_at, claimed_by, lease_expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(task.project_id.to_string())
        .bind(task.action.as_str())
        .bind(&payload)
        .bind(task.status.as_str())
        .bind(&task.error)
        .bind(task.archived)
        .bind(task.enqueued_at.to_rfc3339())
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.finished_at.map(|t| t.to_rfc3339()))
        .bind(&task.claimed_by)
        .bind(task.lease_expires_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // idx_tasks_in_flight: the project already has a queued or running task
                match self.in_flight_for_project(task.project_id).await? {
                    Some(existing) => Err(DomainError::ProjectBusy {
                        project_id: task.project_id,
                        task_id: existing.id,
                    }),
                    None => Err(DomainError::DatabaseError(db.to_string())),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE tasks SET status = ?, error = ?, archived = ?, started_at = ?, finished_at = ?,
               claimed_by = ?, lease_expires_at = ?
               WHERE id = ?"#,
        )
        .bind(task.status.as_str())
        .bind(&task.error)
        .bind(task.archived)
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.finished_at.map(|t| t.to_rfc3339()))
        .bind(&task.claimed_by)
        .bind(task.lease_expires_at.map(|t| t.to_rfc3339()))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(task.id));
        }

        Ok(())
    }

    async fn update_if_status(&self, task: &Task, expected: TaskStatus) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE tasks SET status = ?, error = ?, archived = ?, started_at = ?, finished_at = ?,
               claimed_by = ?, lease_expires_at = ?
               WHERE id = ? AND status = ?"#,
        )
        .bind(task.status.as_str())
        .bind(&task.error)
        .bind(task.archived)
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.finished_at.map(|t| t.to_rfc3339()))
        .bind(&task.claimed_by)
        .bind(task.lease_expires_at.map(|t| t.to_rfc3339()))
        .bind(task.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let mut query = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(project_id) = &filter.project_id {
            query.push_str(" AND project_id = ?");
            bindings.push(project_id.to_string());
        }
        if let Some(status) = &filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if !filter.include_archived {
            query.push_str(" AND archived = 0");
        }

        query.push_str(" ORDER BY enqueued_at, rowid");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<TaskRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn in_flight_for_project(&self, project_id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE project_id = ? AND status IN ('queued', 'running') LIMIT 1",
        )
        .bind(project_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    project_id: String,
    #[allow(dead_code)]
    action: String,
    payload: String,
    status: String,
    error: Option<String>,
    archived: bool,
    enqueued_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    claimed_by: Option<String>,
    lease_expires_at: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::parse_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let action: TaskAction = serde_json::from_str(&row.payload)?;

        Ok(Task {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            action,
            status,
            error: row.error,
            archived: row.archived,
            enqueued_at: parse_datetime(&row.enqueued_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            finished_at: parse_optional_datetime(row.finished_at)?,
            claimed_by: row.claimed_by,
            lease_expires_at: parse_optional_datetime(row.lease_expires_at)?,
        })
    }
}
