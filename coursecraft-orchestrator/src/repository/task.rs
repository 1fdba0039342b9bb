//! Generation Task Repository
//!
//! PostgreSQL-backed task store. Updates lock the row (`FOR UPDATE`) and
//! apply the lifecycle rules in the same transaction.

use super::{GenerationTaskStore, PersistenceError, TaskStoreError};
use async_trait::async_trait;
use coursecraft_core::domain::task::{
    GenerationPhase, GenerationTask, TaskError, TaskScope, TaskStatus, TaskUpdate,
};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TASK_COLUMNS: &str = "id, course_id, scope, status, phase, progress, error, created_at, updated_at";

#[async_trait]
impl GenerationTaskStore for PgTaskStore {
    async fn create(&self, task: &GenerationTask) -> Result<(), TaskStoreError> {
        sqlx::query(
            r#"
            INSERT INTO generation_tasks (id, course_id, scope, status, phase, progress,
                                          error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(task.task_id)
        .bind(task.course_id)
        .bind(serde_json::to_value(task.scope)?)
        .bind(task.status.as_str())
        .bind(task.phase.map(|p| p.as_str()))
        .bind(task.progress_percentage)
        .bind(task.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(
        &self,
        task_id: Uuid,
        update: &TaskUpdate,
    ) -> Result<GenerationTask, TaskStoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM generation_tasks WHERE id = $1 FOR UPDATE",
            TASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(TaskStoreError::NotFound(task_id))?;

        let mut task = GenerationTask::try_from(row)?;
        if !task.apply(update)? {
            return Ok(task);
        }

        sqlx::query(
            r#"
            UPDATE generation_tasks
            SET status = $1, phase = $2, progress = $3, error = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.phase.map(|p| p.as_str()))
        .bind(task.progress_percentage)
        .bind(task.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(task.updated_at)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    async fn get(&self, task_id: Uuid) -> Result<GenerationTask, TaskStoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM generation_tasks WHERE id = $1",
            TASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(TaskStoreError::NotFound(task_id))?;

        GenerationTask::try_from(row)
    }

    async fn list_for_course(
        &self,
        course_id: Uuid,
    ) -> Result<Vec<GenerationTask>, TaskStoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM generation_tasks WHERE course_id = $1 ORDER BY created_at DESC",
            TASK_COLUMNS
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(GenerationTask::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    course_id: Uuid,
    scope: serde_json::Value,
    status: String,
    phase: Option<String>,
    progress: f64,
    error: Option<serde_json::Value>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<TaskRow> for GenerationTask {
    type Error = TaskStoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(PersistenceError::Unavailable)?;
        let phase = row
            .phase
            .map(|p| p.parse::<GenerationPhase>())
            .transpose()
            .map_err(PersistenceError::Unavailable)?;
        let scope: TaskScope = serde_json::from_value(row.scope)?;
        let error: Option<TaskError> = row.error.map(serde_json::from_value).transpose()?;

        Ok(GenerationTask {
            task_id: row.id,
            course_id: row.course_id,
            scope,
            status,
            phase,
            progress_percentage: row.progress,
            error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
