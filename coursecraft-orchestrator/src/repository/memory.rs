//! In-memory stores

use super::{
    CoursePersistence, GenerationTaskStore, PersistenceError, TaskStoreError, check_transition,
};
use async_trait::async_trait;
use chrono::Utc;
use coursecraft_core::domain::course::{Chapter, Course, CourseStatus, Quiz};
use coursecraft_core::domain::quality::QualityMetrics;
use coursecraft_core::domain::task::{GenerationTask, TaskUpdate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryCoursePersistence {
    courses: RwLock<HashMap<Uuid, Course>>,
    failing_writes: AtomicUsize,
}

impl InMemoryCoursePersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` chapter writes fail
    #[cfg(test)]
    pub fn fail_next_chapter_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> Result<(), PersistenceError> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(PersistenceError::Unavailable(
                "injected write failure".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }

    async fn with_course<F>(&self, course_id: Uuid, f: F) -> Result<(), PersistenceError>
    where
        F: FnOnce(&mut Course),
    {
        let mut courses = self.courses.write().await;
        let course = courses
            .get_mut(&course_id)
            .ok_or(PersistenceError::CourseNotFound(course_id))?;
        f(course);
        course.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CoursePersistence for InMemoryCoursePersistence {
    async fn create_course(&self, course: &Course) -> Result<(), PersistenceError> {
        self.courses.write().await.insert(course.id, course.clone());
        Ok(())
    }

    async fn load_course(&self, course_id: Uuid) -> Result<Option<Course>, PersistenceError> {
        Ok(self.courses.read().await.get(&course_id).cloned())
    }

    async fn transition_course_status(
        &self,
        course_id: Uuid,
        from: CourseStatus,
        to: CourseStatus,
    ) -> Result<(), PersistenceError> {
        check_transition(course_id, from, to)?;
        let mut courses = self.courses.write().await;
        let course = courses
            .get_mut(&course_id)
            .ok_or(PersistenceError::CourseNotFound(course_id))?;
        if course.status != from {
            return Err(PersistenceError::StatusConflict {
                course_id,
                expected: from,
                actual: course.status,
            });
        }
        course.status = to;
        course.updated_at = Utc::now();
        Ok(())
    }

    async fn save_chapter(
        &self,
        course_id: Uuid,
        chapter: &Chapter,
    ) -> Result<(), PersistenceError> {
        self.take_injected_failure()?;
        let chapter = chapter.clone();
        self.with_course(course_id, move |course| course.upsert_chapter(chapter))
            .await
    }

    async fn save_final_assessment(
        &self,
        course_id: Uuid,
        assessment: Option<&Quiz>,
    ) -> Result<(), PersistenceError> {
        let assessment = assessment.cloned();
        self.with_course(course_id, move |course| course.final_assessment = assessment)
            .await
    }

    async fn save_quality_metrics(
        &self,
        course_id: Uuid,
        metrics: &QualityMetrics,
    ) -> Result<(), PersistenceError> {
        let metrics = metrics.clone();
        self.with_course(course_id, move |course| course.quality_metrics = Some(metrics))
            .await
    }
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, GenerationTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GenerationTaskStore for InMemoryTaskStore {
    async fn create(&self, task: &GenerationTask) -> Result<(), TaskStoreError> {
        self.tasks.write().await.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn update(
        &self,
        task_id: Uuid,
        update: &TaskUpdate,
    ) -> Result<GenerationTask, TaskStoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(TaskStoreError::NotFound(task_id))?;
        task.apply(update)?;
        Ok(task.clone())
    }

    async fn get(&self, task_id: Uuid) -> Result<GenerationTask, TaskStoreError> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(TaskStoreError::NotFound(task_id))
    }

    async fn list_for_course(
        &self,
        course_id: Uuid,
    ) -> Result<Vec<GenerationTask>, TaskStoreError> {
        let mut tasks: Vec<GenerationTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.course_id == course_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }
}
