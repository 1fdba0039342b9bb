//! Repository Module
//!
//! Data access layer for the orchestrator. Course content and generation
//! tasks sit behind traits so the services run against PostgreSQL in
//! production and against in-memory stores in tests or when no database
//! is configured.

pub mod course;
pub mod memory;
pub mod task;

use async_trait::async_trait;
use coursecraft_core::domain::course::{Chapter, Course, CourseStatus, Quiz};
use coursecraft_core::domain::quality::QualityMetrics;
use coursecraft_core::domain::task::{GenerationTask, InvalidTransition, TaskUpdate};
use thiserror::Error;
use uuid::Uuid;

pub use course::PgCourseRepository;
pub use memory::{InMemoryCoursePersistence, InMemoryTaskStore};
pub use task::PgTaskStore;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("course {0} not found")]
    CourseNotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("could not encode stored data: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("course {course_id} cannot move from {from} to {to}")]
    IllegalTransition {
        course_id: Uuid,
        from: CourseStatus,
        to: CourseStatus,
    },

    #[error("course {course_id} is {actual}, expected {expected}")]
    StatusConflict {
        course_id: Uuid,
        expected: CourseStatus,
        actual: CourseStatus,
    },
}

impl PersistenceError {
    /// Whether the same write may succeed if attempted again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PersistenceError::Database(_) | PersistenceError::Unavailable(_)
        )
    }
}

/// Rejects a status change the course lifecycle does not allow
pub(crate) fn check_transition(
    course_id: Uuid,
    from: CourseStatus,
    to: CourseStatus,
) -> Result<(), PersistenceError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(PersistenceError::IllegalTransition { course_id, from, to })
    }
}

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<sqlx::Error> for TaskStoreError {
    fn from(e: sqlx::Error) -> Self {
        TaskStoreError::Persistence(PersistenceError::Database(e))
    }
}

impl From<serde_json::Error> for TaskStoreError {
    fn from(e: serde_json::Error) -> Self {
        TaskStoreError::Persistence(PersistenceError::Encoding(e))
    }
}

/// Durable storage for courses and their content
///
/// Chapter writes are upserts keyed by chapter id, so a regenerated chapter
/// replaces its predecessor without touching its siblings.
#[async_trait]
pub trait CoursePersistence: Send + Sync {
    async fn create_course(&self, course: &Course) -> Result<(), PersistenceError>;

    async fn load_course(&self, course_id: Uuid) -> Result<Option<Course>, PersistenceError>;

    /// Moves a course from `from` to `to`
    ///
    /// Fails with `IllegalTransition` when the lifecycle forbids the move and
    /// with `StatusConflict` when the stored status is no longer `from`.
    async fn transition_course_status(
        &self,
        course_id: Uuid,
        from: CourseStatus,
        to: CourseStatus,
    ) -> Result<(), PersistenceError>;

    async fn save_chapter(&self, course_id: Uuid, chapter: &Chapter)
    -> Result<(), PersistenceError>;

    async fn save_final_assessment(
        &self,
        course_id: Uuid,
        assessment: Option<&Quiz>,
    ) -> Result<(), PersistenceError>;

    async fn save_quality_metrics(
        &self,
        course_id: Uuid,
        metrics: &QualityMetrics,
    ) -> Result<(), PersistenceError>;
}

/// Durable record of generation tasks
///
/// `update` is atomic per task: it applies the update with the lifecycle
/// rules of [`GenerationTask::apply`] and returns the stored record.
#[async_trait]
pub trait GenerationTaskStore: Send + Sync {
    async fn create(&self, task: &GenerationTask) -> Result<(), TaskStoreError>;

    async fn update(
        &self,
        task_id: Uuid,
        update: &TaskUpdate,
    ) -> Result<GenerationTask, TaskStoreError>;

    async fn get(&self, task_id: Uuid) -> Result<GenerationTask, TaskStoreError>;

    async fn list_for_course(&self, course_id: Uuid)
    -> Result<Vec<GenerationTask>, TaskStoreError>;
}
