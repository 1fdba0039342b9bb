//! Course Orchestrator
//!
//! Drives asynchronous course generation through its phases:
//!
//! ```text
//! Structure -> Content -> Assessment -> Validation -> ExportPrep
//! ```
//!
//! Each accepted request gets a [`GenerationTask`] that callers poll. The
//! background run is the only writer of that task. Chapters are generated
//! concurrently (bounded by `max_concurrent_chapters`) and persisted as soon
//! as they finish, so a failed or cancelled run keeps the chapters it had
//! already produced.

use crate::provider::ProviderError;
use crate::repository::{CoursePersistence, GenerationTaskStore, PersistenceError, TaskStoreError};
use crate::service::chapter::{ChapterOutcome, ChapterPipeline, ChapterSpec};
use crate::service::content::{CourseOutline, parse_outline, parse_quiz};
use crate::service::gateway::ProviderGateway;
use crate::service::quality::aggregate_metrics;
use coursecraft_core::domain::course::{
    Chapter, Course, CourseStatus, MAX_DIFFICULTY, MIN_DIFFICULTY, Quiz,
};
use coursecraft_core::domain::provider::{PromptParams, ProviderRequest, ProviderTaskType};
use coursecraft_core::domain::quality::QualityMetrics;
use coursecraft_core::domain::task::{
    GenerationPhase, GenerationTask, TaskError, TaskErrorKind, TaskScope, TaskUpdate,
};
use coursecraft_core::dto::generation::{
    GenerationAccepted, RegenerationAccepted, StartGeneration,
};
use coursecraft_core::dto::provider::ProviderUsage;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const STRUCTURE_DONE: f64 = 10.0;
const CONTENT_SPAN: f64 = 70.0;
const ASSESSMENT_START: f64 = 80.0;
const VALIDATION_START: f64 = 90.0;
const EXPORT_PREP_START: f64 = 95.0;

/// Tuning knobs of a generation run
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Upper bound on chapters generated at the same time
    pub max_concurrent_chapters: usize,
    pub chapter_max_attempts: u32,
    /// Attempts at obtaining a usable outline
    pub structure_attempts: u32,
    /// Attempts per persistence write before the task fails
    pub persistence_attempts: u32,
    pub persistence_backoff: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chapters: 5,
            chapter_max_attempts: 3,
            structure_attempts: 2,
            persistence_attempts: 2,
            persistence_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("course {0} not found")]
    CourseNotFound(Uuid),

    #[error("chapter {chapter_id} not found in course {course_id}")]
    ChapterNotFound { course_id: Uuid, chapter_id: Uuid },

    #[error("chapter {0} is already being generated")]
    ChapterBusy(Uuid),

    #[error("course {course_id} is {status}; chapters cannot be regenerated")]
    CourseNotRegenerable { course_id: Uuid, status: CourseStatus },

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("task {0} has already finished")]
    TaskAlreadyTerminal(Uuid),

    #[error("task store error: {0}")]
    Store(TaskStoreError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl From<TaskStoreError> for GenerationError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::NotFound(id) => GenerationError::TaskNotFound(id),
            other => GenerationError::Store(other),
        }
    }
}

/// What a course run has to produce
#[derive(Debug, Clone)]
struct GenerationPlan {
    chapter_range: RangeInclusive<usize>,
    include_final_assessment: bool,
}

pub struct CourseOrchestrator {
    inner: Arc<Inner>,
}

impl Clone for CourseOrchestrator {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner {
    persistence: Arc<dyn CoursePersistence>,
    tasks: Arc<dyn GenerationTaskStore>,
    gateway: Arc<ProviderGateway>,
    pipeline: Arc<ChapterPipeline>,
    config: GenerationConfig,
    /// Cancellation tokens of runs still executing, by task id
    running: Mutex<HashMap<Uuid, CancellationToken>>,
    /// Chapters with a regeneration in flight
    busy_chapters: Mutex<HashSet<Uuid>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CourseOrchestrator {
    pub fn new(
        persistence: Arc<dyn CoursePersistence>,
        tasks: Arc<dyn GenerationTaskStore>,
        gateway: Arc<ProviderGateway>,
        pipeline: Arc<ChapterPipeline>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                persistence,
                tasks,
                gateway,
                pipeline,
                config,
                running: Mutex::new(HashMap::new()),
                busy_chapters: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Accepts a course generation request and starts it in the background
    ///
    /// Returns as soon as the draft course and its pending task are stored.
    pub async fn start_generation(
        &self,
        request: StartGeneration,
    ) -> Result<GenerationAccepted, GenerationError> {
        let plan = validate(&request)?;

        let course = Course::draft(
            request.title.trim(),
            request.subject.trim(),
            request.audience,
            request.difficulty,
        );
        self.inner.persistence.create_course(&course).await?;

        let task = GenerationTask::pending(course.id, TaskScope::Course);
        self.inner.tasks.create(&task).await?;

        let token = CancellationToken::new();
        lock(&self.inner.running).insert(task.task_id, token.clone());

        info!(
            "Course generation accepted: course {} task {} ({} chapters)",
            course.id,
            task.task_id,
            format_range(&plan.chapter_range)
        );

        let inner = Arc::clone(&self.inner);
        let task_id = task.task_id;
        tokio::spawn(async move {
            inner.run_course(course, task_id, plan, token).await;
        });

        Ok(GenerationAccepted {
            task_id: task.task_id,
            course_id: task.course_id,
        })
    }

    /// Current snapshot of a task
    pub async fn get_status(&self, task_id: Uuid) -> Result<GenerationTask, GenerationError> {
        Ok(self.inner.tasks.get(task_id).await?)
    }

    pub async fn list_tasks(&self, course_id: Uuid) -> Result<Vec<GenerationTask>, GenerationError> {
        Ok(self.inner.tasks.list_for_course(course_id).await?)
    }

    pub async fn get_course(&self, course_id: Uuid) -> Result<Course, GenerationError> {
        self.inner
            .persistence
            .load_course(course_id)
            .await?
            .ok_or(GenerationError::CourseNotFound(course_id))
    }

    pub fn provider_usage(&self) -> Vec<ProviderUsage> {
        self.inner.gateway.usage()
    }

    /// Regenerates a single chapter in the background
    ///
    /// The chapter keeps its id and sequence number; siblings are untouched
    /// and the course status does not change.
    pub async fn regenerate_chapter(
        &self,
        course_id: Uuid,
        chapter_id: Uuid,
        reason: Option<String>,
    ) -> Result<RegenerationAccepted, GenerationError> {
        let course = self.get_course(course_id).await?;
        if !course.status.allows_regeneration() {
            return Err(GenerationError::CourseNotRegenerable {
                course_id,
                status: course.status,
            });
        }
        let chapter = course
            .chapter(chapter_id)
            .ok_or(GenerationError::ChapterNotFound {
                course_id,
                chapter_id,
            })?;

        let spec = ChapterSpec::regenerate(&course, chapter, reason.filter(|r| !r.trim().is_empty()));
        let lease = ChapterLease::acquire(&self.inner, chapter_id)?;

        let task = GenerationTask::pending(course_id, TaskScope::Chapter { chapter_id });
        self.inner.tasks.create(&task).await?;

        let token = CancellationToken::new();
        lock(&self.inner.running).insert(task.task_id, token.clone());

        info!(
            "Chapter regeneration accepted: course {} chapter {} task {}",
            course_id, chapter_id, task.task_id
        );

        let inner = Arc::clone(&self.inner);
        let task_id = task.task_id;
        tokio::spawn(async move {
            inner.run_regeneration(spec, task_id, token, lease).await;
        });

        Ok(RegenerationAccepted {
            task_id: task.task_id,
            course_id,
            chapter_id,
        })
    }

    /// Requests cancellation of a running task
    ///
    /// Dispatch stops at the next checkpoint and in-flight chapter work is
    /// abandoned. Chapters persisted before the cancellation are kept.
    pub async fn cancel(&self, task_id: Uuid) -> Result<GenerationTask, GenerationError> {
        let task = self.inner.tasks.get(task_id).await?;
        if task.status.is_terminal() {
            return Err(GenerationError::TaskAlreadyTerminal(task_id));
        }

        let token = lock(&self.inner.running).get(&task_id).cloned();
        match token {
            Some(token) => {
                info!("Cancellation requested for task {}", task_id);
                token.cancel();
                Ok(task)
            }
            None => {
                // No live run owns this task (e.g. it was orphaned by a restart).
                warn!("Task {} has no live run, failing it directly", task_id);
                let task = self
                    .inner
                    .tasks
                    .update(task_id, &TaskUpdate::failed(TaskError::cancelled(task.phase)))
                    .await
                    .map_err(|e| match e {
                        // The run finished between the read above and this write.
                        TaskStoreError::InvalidTransition(_) => {
                            GenerationError::TaskAlreadyTerminal(task_id)
                        }
                        other => other.into(),
                    })?;
                if task.scope == TaskScope::Course {
                    self.inner.rollback_course(task.course_id).await;
                }
                Ok(task)
            }
        }
    }
}

/// Exclusive claim on a chapter while it is being regenerated
struct ChapterLease {
    inner: Arc<Inner>,
    chapter_id: Uuid,
}

impl ChapterLease {
    fn acquire(inner: &Arc<Inner>, chapter_id: Uuid) -> Result<Self, GenerationError> {
        if !lock(&inner.busy_chapters).insert(chapter_id) {
            return Err(GenerationError::ChapterBusy(chapter_id));
        }
        Ok(Self {
            inner: Arc::clone(inner),
            chapter_id,
        })
    }
}

impl Drop for ChapterLease {
    fn drop(&mut self) {
        lock(&self.inner.busy_chapters).remove(&self.chapter_id);
    }
}

fn validate(request: &StartGeneration) -> Result<GenerationPlan, GenerationError> {
    if request.title.trim().is_empty() {
        return Err(GenerationError::InvalidRequest("title is required".to_string()));
    }
    if request.subject.trim().is_empty() {
        return Err(GenerationError::InvalidRequest("subject is required".to_string()));
    }
    if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&request.difficulty) {
        return Err(GenerationError::InvalidRequest(format!(
            "difficulty must be between {} and {}, got {}",
            MIN_DIFFICULTY, MAX_DIFFICULTY, request.difficulty
        )));
    }

    let level = request.audience.level;
    let allowed = level.chapter_range();
    let chapter_range = match request.chapter_count {
        Some(count) if !allowed.contains(&count) => {
            return Err(GenerationError::InvalidRequest(format!(
                "{} courses need {} chapters, got {}",
                level,
                format_range(&allowed),
                count
            )));
        }
        Some(count) => count..=count,
        None => allowed,
    };

    Ok(GenerationPlan {
        chapter_range,
        include_final_assessment: request.include_final_assessment,
    })
}

fn format_range(range: &RangeInclusive<usize>) -> String {
    if range.start() == range.end() {
        range.start().to_string()
    } else {
        format!("{}-{}", range.start(), range.end())
    }
}

fn persistence_failure(phase: GenerationPhase, e: PersistenceError) -> TaskError {
    TaskError::in_phase(TaskErrorKind::Persistence, Some(phase), e)
}

fn content_progress(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return STRUCTURE_DONE + CONTENT_SPAN;
    }
    STRUCTURE_DONE + CONTENT_SPAN * completed as f64 / total as f64
}

/// Course metrics from chapter metrics, weighted by chapter length
fn course_metrics(chapters: &[Chapter]) -> Option<QualityMetrics> {
    let weighted: Vec<(&QualityMetrics, usize)> = chapters
        .iter()
        .filter_map(|c| c.metrics.as_ref().map(|m| (m, c.content_length())))
        .collect();
    aggregate_metrics(&weighted)
}

impl Inner {
    // =========================================================================
    // Course runs
    // =========================================================================

    async fn run_course(
        self: Arc<Self>,
        course: Course,
        task_id: Uuid,
        plan: GenerationPlan,
        token: CancellationToken,
    ) {
        let course_id = course.id;
        match self.generate_course(course, task_id, &plan, &token).await {
            Ok(()) => info!("Course {} generated (task {})", course_id, task_id),
            Err(failure) => {
                error!("Course {} generation failed: {}", course_id, failure.message);
                if let Err(e) = self.update_task(task_id, TaskUpdate::failed(failure)).await {
                    error!("Could not record failure of task {}: {}", task_id, e.message);
                }
                self.rollback_course(course_id).await;
            }
        }
        lock(&self.running).remove(&task_id);
    }

    async fn generate_course(
        &self,
        mut course: Course,
        task_id: Uuid,
        plan: &GenerationPlan,
        token: &CancellationToken,
    ) -> Result<(), TaskError> {
        let course_id = course.id;

        if token.is_cancelled() {
            return Err(TaskError::cancelled(None));
        }
        self.update_task(task_id, TaskUpdate::phase(GenerationPhase::Structure, 0.0))
            .await?;
        self.persist(|| {
            self.persistence.transition_course_status(
                course_id,
                course.status,
                CourseStatus::Generating,
            )
        })
        .await
        .map_err(|e| persistence_failure(GenerationPhase::Structure, e))?;
        course.status = CourseStatus::Generating;

        // Structure
        let outline = self.generate_structure(&course, plan, token).await?;
        let specs: Vec<ChapterSpec> = outline
            .chapters
            .iter()
            .enumerate()
            .map(|(idx, c)| ChapterSpec::from_outline(&course, idx as u32 + 1, c))
            .collect();
        debug!("Course {} outline has {} chapters", course_id, specs.len());

        // Content
        self.update_task(
            task_id,
            TaskUpdate::phase(GenerationPhase::Content, STRUCTURE_DONE),
        )
        .await?;
        course.chapters = self.generate_chapters(course_id, task_id, specs, token).await?;

        // Assessment
        if plan.include_final_assessment {
            if token.is_cancelled() {
                return Err(TaskError::cancelled(Some(GenerationPhase::Assessment)));
            }
            self.update_task(
                task_id,
                TaskUpdate::phase(GenerationPhase::Assessment, ASSESSMENT_START),
            )
            .await?;
            if let Some(quiz) = self.generate_assessment(&course, token).await? {
                self.persist(|| self.persistence.save_final_assessment(course_id, Some(&quiz)))
                    .await
                    .map_err(|e| persistence_failure(GenerationPhase::Assessment, e))?;
                course.final_assessment = Some(quiz);
            }
        }

        // Validation
        if token.is_cancelled() {
            return Err(TaskError::cancelled(Some(GenerationPhase::Validation)));
        }
        self.update_task(
            task_id,
            TaskUpdate::phase(GenerationPhase::Validation, VALIDATION_START),
        )
        .await?;
        if !course.has_consecutive_sequence() {
            return Err(TaskError::in_phase(
                TaskErrorKind::Internal,
                Some(GenerationPhase::Validation),
                "chapter sequence is not contiguous",
            ));
        }
        let degraded = course.degraded_chapters().count();
        if degraded > 0 {
            warn!(
                "Course {} has {} degraded chapter(s)",
                course_id, degraded
            );
        }
        if let Some(metrics) = course_metrics(&course.chapters) {
            self.persist(|| self.persistence.save_quality_metrics(course_id, &metrics))
                .await
                .map_err(|e| persistence_failure(GenerationPhase::Validation, e))?;
        }

        // Export preparation
        if token.is_cancelled() {
            return Err(TaskError::cancelled(Some(GenerationPhase::ExportPrep)));
        }
        self.update_task(
            task_id,
            TaskUpdate::phase(GenerationPhase::ExportPrep, EXPORT_PREP_START),
        )
        .await?;

        // The course only becomes Ready once its task is recorded as Completed.
        self.update_task(task_id, TaskUpdate::completed()).await?;
        self.persist(|| {
            self.persistence.transition_course_status(
                course_id,
                CourseStatus::Generating,
                CourseStatus::Ready,
            )
        })
        .await
        .map_err(|e| persistence_failure(GenerationPhase::ExportPrep, e))?;
        Ok(())
    }

    async fn generate_structure(
        &self,
        course: &Course,
        plan: &GenerationPlan,
        token: &CancellationToken,
    ) -> Result<CourseOutline, TaskError> {
        let phase = Some(GenerationPhase::Structure);
        let attempts = self.config.structure_attempts.max(1);
        let range = &plan.chapter_range;
        let mut last_problem = String::new();

        for attempt in 1..=attempts {
            let request = ProviderRequest {
                task_type: ProviderTaskType::Structure,
                audience: course.audience.clone(),
                params: PromptParams {
                    course_title: course.title.clone(),
                    subject: course.subject.clone(),
                    difficulty: course.difficulty,
                    chapter_count: Some((*range.start(), *range.end())),
                    attempt,
                    ..Default::default()
                },
            };

            let result = tokio::select! {
                _ = token.cancelled() => return Err(TaskError::cancelled(phase)),
                result = self.gateway.generate(&request, self.gateway.default_timeout()) => result,
            };

            let content = match result {
                Ok(result) => result.content,
                Err(ProviderError::MalformedContent(detail)) => {
                    last_problem = detail;
                    continue;
                }
                Err(e) => return Err(TaskError::in_phase(e.task_error_kind(), phase, e)),
            };

            match parse_outline(&content) {
                Ok(outline) if range.contains(&outline.chapters.len()) => return Ok(outline),
                Ok(outline) => {
                    last_problem = format!(
                        "outline has {} chapters, expected {}",
                        outline.chapters.len(),
                        format_range(range)
                    );
                }
                Err(e) => last_problem = e.to_string(),
            }
            warn!(
                "Structure attempt {}/{} for course {} unusable: {}",
                attempt, attempts, course.id, last_problem
            );
        }

        Err(TaskError::in_phase(
            TaskErrorKind::InvalidStructure,
            phase,
            last_problem,
        ))
    }

    /// Runs the chapter pipelines and persists each chapter as it completes
    async fn generate_chapters(
        &self,
        course_id: Uuid,
        task_id: Uuid,
        specs: Vec<ChapterSpec>,
        token: &CancellationToken,
    ) -> Result<Vec<Chapter>, TaskError> {
        let phase = Some(GenerationPhase::Content);
        let total = specs.len();
        let concurrency = self.config.max_concurrent_chapters.clamp(1, total.max(1));
        let mut queue = specs.into_iter();
        let mut in_flight = JoinSet::new();
        let mut slots: Vec<Option<Chapter>> = vec![None; total];
        let mut completed = 0;

        loop {
            while in_flight.len() < concurrency && !token.is_cancelled() {
                let Some(spec) = queue.next() else { break };
                let pipeline = Arc::clone(&self.pipeline);
                debug!("Dispatching chapter {} of course {}", spec.sequence_number, course_id);
                in_flight.spawn(async move { pipeline.run(&spec).await });
            }

            if token.is_cancelled() {
                return Err(self.abandon_chapters(course_id, &mut in_flight).await);
            }

            let joined = tokio::select! {
                _ = token.cancelled() => {
                    return Err(self.abandon_chapters(course_id, &mut in_flight).await);
                }
                joined = in_flight.join_next() => joined,
            };

            let outcome = match joined {
                None => break,
                Some(Ok(outcome)) => outcome,
                Some(Err(e)) => {
                    in_flight.abort_all();
                    return Err(TaskError::in_phase(TaskErrorKind::Internal, phase, e));
                }
            };

            if let ChapterOutcome::Degraded { reason, .. } = &outcome {
                debug!("Chapter {} kept as degraded: {}", outcome.chapter().sequence_number, reason);
            }
            let chapter = outcome.into_chapter();
            if let Err(e) = self
                .persist(|| self.persistence.save_chapter(course_id, &chapter))
                .await
            {
                in_flight.abort_all();
                return Err(persistence_failure(GenerationPhase::Content, e).for_chapter(chapter.id));
            }

            completed += 1;
            if let Err(e) = self
                .update_task(task_id, TaskUpdate::progress(content_progress(completed, total)))
                .await
            {
                in_flight.abort_all();
                return Err(e);
            }

            let slot = chapter.sequence_number as usize - 1;
            slots[slot] = Some(chapter);
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Stops chapter work after a cancellation
    ///
    /// Chapters that already finished are persisted; the rest are aborted.
    async fn abandon_chapters(
        &self,
        course_id: Uuid,
        in_flight: &mut JoinSet<ChapterOutcome>,
    ) -> TaskError {
        while let Some(joined) = in_flight.try_join_next() {
            let Ok(outcome) = joined else { continue };
            let chapter = outcome.into_chapter();
            if let Err(e) = self
                .persist(|| self.persistence.save_chapter(course_id, &chapter))
                .await
            {
                warn!(
                    "Finished chapter {} of cancelled course {} was not saved: {}",
                    chapter.sequence_number, course_id, e
                );
            }
        }
        in_flight.abort_all();
        TaskError::cancelled(Some(GenerationPhase::Content))
    }

    /// Final course quiz; a failure here only loses the quiz
    async fn generate_assessment(
        &self,
        course: &Course,
        token: &CancellationToken,
    ) -> Result<Option<Quiz>, TaskError> {
        let request = ProviderRequest {
            task_type: ProviderTaskType::Assessment,
            audience: course.audience.clone(),
            params: PromptParams {
                course_title: course.title.clone(),
                subject: course.subject.clone(),
                difficulty: course.difficulty,
                chapter_titles: course.chapters.iter().map(|c| c.title.clone()).collect(),
                learning_objectives: course
                    .chapters
                    .iter()
                    .flat_map(|c| c.learning_objectives.iter().cloned())
                    .collect(),
                attempt: 1,
                ..Default::default()
            },
        };

        let result = tokio::select! {
            _ = token.cancelled() => {
                return Err(TaskError::cancelled(Some(GenerationPhase::Assessment)));
            }
            result = self.gateway.generate(&request, self.gateway.default_timeout()) => result,
        };

        let quiz = result
            .map_err(|e| e.to_string())
            .and_then(|r| parse_quiz(&r.content).map_err(|e| e.to_string()));
        match quiz {
            Ok(quiz) => Ok(Some(quiz)),
            Err(e) => {
                warn!("Final assessment for course {} skipped: {}", course.id, e);
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Chapter regeneration
    // =========================================================================

    async fn run_regeneration(
        self: Arc<Self>,
        spec: ChapterSpec,
        task_id: Uuid,
        token: CancellationToken,
        lease: ChapterLease,
    ) {
        let chapter_id = spec.chapter_id;
        match self.regenerate(&spec, task_id, &token).await {
            Ok(()) => info!("Chapter {} regenerated (task {})", chapter_id, task_id),
            Err(failure) => {
                error!("Chapter {} regeneration failed: {}", chapter_id, failure.message);
                let update = TaskUpdate::failed(failure.for_chapter(chapter_id));
                if let Err(e) = self.update_task(task_id, update).await {
                    error!("Could not record failure of task {}: {}", task_id, e.message);
                }
            }
        }
        lock(&self.running).remove(&task_id);
        drop(lease);
    }

    async fn regenerate(
        &self,
        spec: &ChapterSpec,
        task_id: Uuid,
        token: &CancellationToken,
    ) -> Result<(), TaskError> {
        let phase = Some(GenerationPhase::Content);
        let course_id = self.course_id_of(task_id).await?;

        self.update_task(
            task_id,
            TaskUpdate::phase(GenerationPhase::Content, STRUCTURE_DONE),
        )
        .await?;

        let outcome = tokio::select! {
            _ = token.cancelled() => return Err(TaskError::cancelled(phase)),
            outcome = self.pipeline.run(spec) => outcome,
        };

        // A skeleton would replace real content with nothing.
        if let ChapterOutcome::Degraded {
            chapter,
            reason,
            cause,
        } = &outcome
        {
            if chapter.subchapters.is_empty() {
                let kind = cause.unwrap_or(TaskErrorKind::ProviderUnavailable);
                return Err(TaskError::in_phase(kind, phase, reason));
            }
        }

        if token.is_cancelled() {
            return Err(TaskError::cancelled(phase));
        }

        let chapter = outcome.into_chapter();
        self.persist(|| self.persistence.save_chapter(course_id, &chapter))
            .await
            .map_err(|e| persistence_failure(GenerationPhase::Content, e))?;

        self.update_task(
            task_id,
            TaskUpdate::phase(GenerationPhase::Validation, VALIDATION_START),
        )
        .await?;
        let course = self
            .persist(|| self.persistence.load_course(course_id))
            .await
            .map_err(|e| persistence_failure(GenerationPhase::Validation, e))?;
        if let Some(metrics) = course.as_ref().and_then(|c| course_metrics(&c.chapters)) {
            self.persist(|| self.persistence.save_quality_metrics(course_id, &metrics))
                .await
                .map_err(|e| persistence_failure(GenerationPhase::Validation, e))?;
        }

        self.update_task(task_id, TaskUpdate::completed()).await?;
        Ok(())
    }

    async fn course_id_of(&self, task_id: Uuid) -> Result<Uuid, TaskError> {
        self.tasks
            .get(task_id)
            .await
            .map(|t| t.course_id)
            .map_err(|e| TaskError::in_phase(TaskErrorKind::Persistence, None, e))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Runs a persistence operation with bounded retries and exponential backoff
    async fn persist<T, F, Fut>(&self, mut op: F) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        let attempts = self.config.persistence_attempts.max(1);
        let mut delay = self.config.persistence_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        "Persistence write failed (attempt {}/{}): {}",
                        attempt, attempts, e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Applies a task update, retrying transient store failures
    ///
    /// A rejected or lost update fails the run.
    async fn update_task(&self, task_id: Uuid, update: TaskUpdate) -> Result<(), TaskError> {
        let phase = update.phase;
        let attempts = self.config.persistence_attempts.max(1);
        let mut delay = self.config.persistence_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.tasks.update(task_id, &update).await {
                Ok(_) => return Ok(()),
                Err(TaskStoreError::Persistence(e)) if e.is_transient() && attempt < attempts => {
                    warn!(
                        "Task {} update failed (attempt {}/{}): {}",
                        task_id, attempt, attempts, e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e @ TaskStoreError::InvalidTransition(_)) => {
                    return Err(TaskError::in_phase(TaskErrorKind::Internal, phase, e));
                }
                Err(e) => {
                    return Err(TaskError::in_phase(TaskErrorKind::Persistence, phase, e));
                }
            }
        }
    }

    /// Puts a course that was mid-generation back to Draft
    async fn rollback_course(&self, course_id: Uuid) {
        let result = self
            .persist(|| {
                self.persistence.transition_course_status(
                    course_id,
                    CourseStatus::Generating,
                    CourseStatus::Draft,
                )
            })
            .await;
        match result {
            Ok(()) => debug!("Course {} rolled back to Draft", course_id),
            Err(PersistenceError::StatusConflict { actual, .. }) => {
                debug!("Course {} is {}, no rollback needed", course_id, actual);
            }
            Err(PersistenceError::CourseNotFound(_)) => {}
            Err(e) => error!("Could not roll course {} back to Draft: {}", course_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ContentGenerator;
    use crate::repository::{InMemoryCoursePersistence, InMemoryTaskStore};
    use crate::service::chapter::MetricEscalation;
    use crate::service::content::OutlineChapter;
    use crate::service::gateway::GatewayConfig;
    use crate::service::quality::{HeuristicScorer, QualityGate, QualityPolicy};
    use crate::testing::{
        Reply, ScriptedGenerator, dense_chapter_json, good_chapter_json, happy_reply,
        outline_json,
    };
    use async_trait::async_trait;
    use coursecraft_core::domain::course::{Audience, ProficiencyLevel};
    use coursecraft_core::domain::task::TaskStatus;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        orchestrator: CourseOrchestrator,
        persistence: Arc<InMemoryCoursePersistence>,
        tasks: Arc<RecordingTaskStore>,
    }

    /// Task store that remembers every stored state of every task
    ///
    /// It can also refuse completions and serve reads from the state a task
    /// was created with.
    #[derive(Default)]
    struct RecordingTaskStore {
        inner: InMemoryTaskStore,
        history: Mutex<Vec<GenerationTask>>,
        created: Mutex<HashMap<Uuid, GenerationTask>>,
        refuse_completion: AtomicBool,
        stale_reads: AtomicBool,
    }

    impl RecordingTaskStore {
        fn progress_of(&self, task_id: Uuid) -> Vec<f64> {
            lock(&self.history)
                .iter()
                .filter(|t| t.task_id == task_id)
                .map(|t| t.progress_percentage)
                .collect()
        }

        /// Distinct (status, phase) pairs in the order they were stored
        fn phases_of(&self, task_id: Uuid) -> Vec<(TaskStatus, Option<GenerationPhase>)> {
            let mut phases: Vec<(TaskStatus, Option<GenerationPhase>)> = Vec::new();
            for task in lock(&self.history).iter().filter(|t| t.task_id == task_id) {
                let entry = (task.status, task.phase);
                if phases.last() != Some(&entry) {
                    phases.push(entry);
                }
            }
            phases
        }
    }

    #[async_trait]
    impl GenerationTaskStore for RecordingTaskStore {
        async fn create(&self, task: &GenerationTask) -> Result<(), TaskStoreError> {
            self.inner.create(task).await?;
            lock(&self.created).insert(task.task_id, task.clone());
            lock(&self.history).push(task.clone());
            Ok(())
        }

        async fn update(
            &self,
            task_id: Uuid,
            update: &TaskUpdate,
        ) -> Result<GenerationTask, TaskStoreError> {
            if update.status == Some(TaskStatus::Completed)
                && self.refuse_completion.load(Ordering::SeqCst)
            {
                return Err(PersistenceError::Unavailable("task table offline".to_string()).into());
            }
            let task = self.inner.update(task_id, update).await?;
            lock(&self.history).push(task.clone());
            Ok(task)
        }

        async fn get(&self, task_id: Uuid) -> Result<GenerationTask, TaskStoreError> {
            if self.stale_reads.load(Ordering::SeqCst) {
                if let Some(task) = lock(&self.created).get(&task_id) {
                    return Ok(task.clone());
                }
            }
            self.inner.get(task_id).await
        }

        async fn list_for_course(
            &self,
            course_id: Uuid,
        ) -> Result<Vec<GenerationTask>, TaskStoreError> {
            self.inner.list_for_course(course_id).await
        }
    }

    fn harness(generator: Arc<ScriptedGenerator>, config: GenerationConfig) -> Harness {
        let gateway = Arc::new(ProviderGateway::new(
            vec![generator as Arc<dyn ContentGenerator>],
            GatewayConfig::default().with_requests_per_minute(10_000),
        ));
        let gate = Arc::new(QualityGate::new(
            Arc::new(HeuristicScorer::new()),
            QualityPolicy::default(),
        ));
        let pipeline = Arc::new(ChapterPipeline::new(
            Arc::clone(&gateway),
            gate,
            Arc::new(MetricEscalation),
            config.chapter_max_attempts,
        ));
        let persistence = Arc::new(InMemoryCoursePersistence::new());
        let tasks = Arc::new(RecordingTaskStore::default());
        let orchestrator = CourseOrchestrator::new(
            persistence.clone(),
            tasks.clone(),
            gateway,
            pipeline,
            config,
        );
        Harness {
            orchestrator,
            persistence,
            tasks,
        }
    }

    fn fast_config() -> GenerationConfig {
        GenerationConfig {
            persistence_backoff: Duration::from_millis(1),
            ..GenerationConfig::default()
        }
    }

    fn request(level: ProficiencyLevel) -> StartGeneration {
        StartGeneration {
            title: "Loops for everyone".to_string(),
            subject: "Programming".to_string(),
            audience: Audience::new(level),
            difficulty: 1.0,
            chapter_count: None,
            include_final_assessment: true,
        }
    }

    /// Waits until the task is terminal and its run has fully wound down
    async fn wait_for_terminal(orchestrator: &CourseOrchestrator, task_id: Uuid) -> GenerationTask {
        for _ in 0..500 {
            let task = orchestrator.get_status(task_id).await.unwrap();
            let running = lock(&orchestrator.inner.running).contains_key(&task_id);
            if task.status.is_terminal() && !running {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not finish", task_id);
    }

    async fn wait_for_chapters(h: &Harness, course_id: Uuid, count: usize) {
        for _ in 0..500 {
            let course = h.persistence.load_course(course_id).await.unwrap().unwrap();
            if course.chapters.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("course {} never reached {} chapters", course_id, count);
    }

    #[tokio::test]
    async fn test_generates_course_end_to_end() {
        let generator = ScriptedGenerator::happy("primary", 4);
        let h = harness(generator, fast_config());

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress_percentage, 100.0);
        assert!(task.error.is_none());

        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(course.status, CourseStatus::Ready);
        assert_eq!(course.chapters.len(), 4);
        assert!(ProficiencyLevel::Beginner.chapter_range().contains(&course.chapters.len()));
        assert!(course.has_consecutive_sequence());
        assert!(course.chapters.iter().all(|c| !c.degraded));
        assert!(
            course
                .chapters
                .iter()
                .all(|c| c.complexity_level <= course.max_chapter_complexity())
        );
        assert!(course.final_assessment.is_some());
        assert!(course.quality_metrics.is_some());
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let generator = ScriptedGenerator::happy("primary", 5);
        let h = harness(
            generator,
            GenerationConfig {
                max_concurrent_chapters: 2,
                ..fast_config()
            },
        );

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        let progress = h.tasks.progress_of(accepted.task_id);
        assert!(progress.len() >= 5);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
        assert_eq!(progress.last().copied(), Some(100.0));
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let h = harness(ScriptedGenerator::happy("p", 4), fast_config());

        let mut bad_difficulty = request(ProficiencyLevel::Beginner);
        bad_difficulty.difficulty = 7.0;
        assert!(matches!(
            h.orchestrator.start_generation(bad_difficulty).await,
            Err(GenerationError::InvalidRequest(_))
        ));

        let mut bad_count = request(ProficiencyLevel::Beginner);
        bad_count.chapter_count = Some(9);
        assert!(matches!(
            h.orchestrator.start_generation(bad_count).await,
            Err(GenerationError::InvalidRequest(_))
        ));

        let mut blank = request(ProficiencyLevel::Beginner);
        blank.title = "  ".to_string();
        assert!(matches!(
            h.orchestrator.start_generation(blank).await,
            Err(GenerationError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_sole_provider_fails_structure() {
        let generator = ScriptedGenerator::new("only", |_, _| {
            Reply::Fail(ProviderError::RateLimited("quota exhausted".to_string()))
        });
        let h = harness(generator, fast_config());

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert_eq!(error.kind, TaskErrorKind::ProviderRateLimited);
        assert_eq!(error.phase, Some(GenerationPhase::Structure));
        assert!(error.message.contains("Structure"));

        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert!(course.chapters.is_empty());
        assert_eq!(course.status, CourseStatus::Draft);
    }

    #[tokio::test]
    async fn test_malformed_outline_retried_then_fails() {
        let generator = ScriptedGenerator::new("p", |_, _| Reply::Content("no json here".to_string()));
        let h = harness(generator.clone(), fast_config());

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.unwrap().kind, TaskErrorKind::InvalidStructure);
        assert_eq!(generator.requests_of(ProviderTaskType::Structure).len(), 2);
    }

    #[tokio::test]
    async fn test_outline_outside_range_is_rejected() {
        // Beginner courses need 3-5 chapters.
        let generator = ScriptedGenerator::new("p", |req, _| match req.task_type {
            ProviderTaskType::Structure => Reply::Content(outline_json(9)),
            _ => Reply::Content(happy_reply(req, 9)),
        });
        let h = harness(generator, fast_config());

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert_eq!(error.kind, TaskErrorKind::InvalidStructure);
        assert!(error.message.contains("9 chapters"));
    }

    #[tokio::test]
    async fn test_all_degraded_chapters_still_complete() {
        let generator = ScriptedGenerator::new("p", |req, _| match req.task_type {
            ProviderTaskType::ChapterContent => {
                Reply::Content(dense_chapter_json(&req.params.learning_objectives))
            }
            _ => Reply::Content(happy_reply(req, 3)),
        });
        let h = harness(generator, fast_config());

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(course.status, CourseStatus::Ready);
        assert_eq!(course.chapters.len(), 3);
        assert_eq!(course.degraded_chapters().count(), 3);
    }

    #[tokio::test]
    async fn test_low_readability_chapter_degrades_course_metrics() {
        let good = ScriptedGenerator::happy("p", 4);
        let h_good = harness(good, fast_config());
        let accepted = h_good
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h_good.orchestrator, accepted.task_id).await;
        let baseline = h_good
            .orchestrator
            .get_course(accepted.course_id)
            .await
            .unwrap()
            .quality_metrics
            .unwrap();

        let mixed = ScriptedGenerator::new("p", |req, _| match req.task_type {
            ProviderTaskType::ChapterContent if req.params.sequence_number == Some(2) => {
                Reply::Content(dense_chapter_json(&req.params.learning_objectives))
            }
            _ => Reply::Content(happy_reply(req, 4)),
        });
        let h = harness(mixed, fast_config());
        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);

        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        let degraded: Vec<u32> = course.degraded_chapters().map(|c| c.sequence_number).collect();
        assert_eq!(degraded, vec![2]);
        let metrics = course.quality_metrics.unwrap();
        assert!(metrics.readability_score < baseline.readability_score);
    }

    #[tokio::test]
    async fn test_failed_assessment_is_not_fatal() {
        let generator = ScriptedGenerator::new("p", |req, _| match req.task_type {
            ProviderTaskType::Assessment => {
                Reply::Fail(ProviderError::Unavailable("down".to_string()))
            }
            _ => Reply::Content(happy_reply(req, 3)),
        });
        let h = harness(generator, fast_config());

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert!(course.final_assessment.is_none());
    }

    #[tokio::test]
    async fn test_transient_persistence_failure_is_retried() {
        let h = harness(ScriptedGenerator::happy("p", 3), fast_config());
        h.persistence.fail_next_chapter_writes(1);

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(course.chapters.len(), 3);
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_task() {
        let h = harness(ScriptedGenerator::happy("p", 3), fast_config());
        h.persistence.fail_next_chapter_writes(2);

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert_eq!(error.kind, TaskErrorKind::Persistence);
        assert!(error.chapter_id.is_some());
        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(course.status, CourseStatus::Draft);
    }

    #[tokio::test]
    async fn test_cancel_keeps_persisted_chapters() {
        let generator = ScriptedGenerator::new("p", |req, _| match req.task_type {
            ProviderTaskType::ChapterContent if req.params.sequence_number == Some(3) => Reply::Hang,
            _ => Reply::Content(happy_reply(req, 5)),
        });
        let h = harness(
            generator.clone(),
            GenerationConfig {
                max_concurrent_chapters: 1,
                ..fast_config()
            },
        );

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_chapters(&h, accepted.course_id, 2).await;
        for _ in 0..500 {
            if generator.requests_of(ProviderTaskType::ChapterContent).len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        h.orchestrator.cancel(accepted.task_id).await.unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.unwrap().kind, TaskErrorKind::Cancelled);

        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(course.chapters.len(), 2);
        assert_eq!(course.status, CourseStatus::Draft);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(generator.requests_of(ProviderTaskType::ChapterContent).len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_is_rejected() {
        let h = harness(ScriptedGenerator::happy("p", 3), fast_config());
        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert!(matches!(
            h.orchestrator.cancel(accepted.task_id).await,
            Err(GenerationError::TaskAlreadyTerminal(_))
        ));
        assert!(matches!(
            h.orchestrator.cancel(Uuid::new_v4()).await,
            Err(GenerationError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_regeneration_replaces_only_target_chapter() {
        let generator = ScriptedGenerator::new("p", |req, _| {
            if req.params.regeneration_reason.is_some() {
                let mut objectives = req.params.learning_objectives.clone();
                objectives.push("Use loops again".to_string());
                Reply::Content(good_chapter_json(&objectives))
            } else {
                Reply::Content(happy_reply(req, 4))
            }
        });
        let h = harness(generator, fast_config());
        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h.orchestrator, accepted.task_id).await;
        let before = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        let target = before.chapters[1].clone();

        let regen = h
            .orchestrator
            .regenerate_chapter(accepted.course_id, target.id, Some("more depth".to_string()))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, regen.task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.scope, TaskScope::Chapter { chapter_id: target.id });

        let after = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(after.status, CourseStatus::Ready);
        assert_eq!(after.chapters.len(), before.chapters.len());
        for (old, new) in before.chapters.iter().zip(&after.chapters) {
            assert_eq!(old.id, new.id);
            assert_eq!(old.sequence_number, new.sequence_number);
            if old.id == target.id {
                assert!(new.subchapters[0].content.contains("Use loops again"));
            } else {
                assert_eq!(old.generated_at, new.generated_at);
                assert_eq!(old.subchapters[0].content, new.subchapters[0].content);
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_regeneration_of_same_chapter_is_busy() {
        let generator = ScriptedGenerator::new("p", |req, _| {
            if req.params.regeneration_reason.is_some() {
                Reply::Hang
            } else {
                Reply::Content(happy_reply(req, 3))
            }
        });
        let h = harness(generator, fast_config());
        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h.orchestrator, accepted.task_id).await;
        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        let chapter_id = course.chapters[0].id;

        let first = h
            .orchestrator
            .regenerate_chapter(accepted.course_id, chapter_id, Some("again".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            h.orchestrator
                .regenerate_chapter(accepted.course_id, chapter_id, Some("again".to_string()))
                .await,
            Err(GenerationError::ChapterBusy(_))
        ));

        h.orchestrator.cancel(first.task_id).await.unwrap();
        let task = wait_for_terminal(&h.orchestrator, first.task_id).await;
        assert_eq!(task.error.unwrap().kind, TaskErrorKind::Cancelled);

        let unchanged = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(unchanged.chapters[0].generated_at, course.chapters[0].generated_at);

        // The lease is released once the run ends.
        for _ in 0..100 {
            if !lock(&h.orchestrator.inner.busy_chapters).contains(&chapter_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("chapter lease was never released");
    }

    #[tokio::test]
    async fn test_regeneration_requires_existing_chapter() {
        let h = harness(ScriptedGenerator::happy("p", 3), fast_config());
        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert!(matches!(
            h.orchestrator
                .regenerate_chapter(accepted.course_id, Uuid::new_v4(), None)
                .await,
            Err(GenerationError::ChapterNotFound { .. })
        ));
        assert!(matches!(
            h.orchestrator
                .regenerate_chapter(Uuid::new_v4(), Uuid::new_v4(), None)
                .await,
            Err(GenerationError::CourseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_outline_without_objectives_fails_structure() {
        let generator = ScriptedGenerator::new("p", |req, _| match req.task_type {
            ProviderTaskType::Structure => Reply::Content(
                r#"{"chapters":[{"title":"A"},{"title":"B"},{"title":"C"}]}"#.to_string(),
            ),
            _ => Reply::Content(happy_reply(req, 3)),
        });
        let h = harness(generator.clone(), fast_config());

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert_eq!(error.kind, TaskErrorKind::InvalidStructure);
        assert!(error.message.contains("learning objectives"));
        assert_eq!(generator.requests_of(ProviderTaskType::Structure).len(), 2);
        assert!(generator.requests_of(ProviderTaskType::ChapterContent).is_empty());

        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(course.status, CourseStatus::Draft);
        assert!(course.chapters.is_empty());
    }

    #[tokio::test]
    async fn test_lost_completion_fails_task_and_keeps_course_out_of_ready() {
        let h = harness(ScriptedGenerator::happy("p", 3), fast_config());
        h.tasks.refuse_completion.store(true, Ordering::SeqCst);

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.unwrap().kind, TaskErrorKind::Persistence);

        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(course.status, CourseStatus::Draft);
        assert_eq!(course.chapters.len(), 3);
    }

    #[tokio::test]
    async fn test_chapter_concurrency_is_bounded() {
        let generator = ScriptedGenerator::new("p", |req, _| match req.task_type {
            ProviderTaskType::ChapterContent => Reply::Delayed(
                Duration::from_millis(30),
                good_chapter_json(&req.params.learning_objectives),
            ),
            _ => Reply::Content(happy_reply(req, 5)),
        });
        let h = harness(
            generator.clone(),
            GenerationConfig {
                max_concurrent_chapters: 2,
                ..fast_config()
            },
        );

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(generator.requests_of(ProviderTaskType::ChapterContent).len(), 5);
        assert_eq!(generator.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_phases_are_reported_in_order() {
        let h = harness(ScriptedGenerator::happy("p", 3), fast_config());

        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        use GenerationPhase::*;
        use TaskStatus::*;
        assert_eq!(
            h.tasks.phases_of(accepted.task_id),
            vec![
                (Pending, None),
                (InProgress, Some(Structure)),
                (InProgress, Some(Content)),
                (InProgress, Some(Assessment)),
                (InProgress, Some(Validation)),
                (InProgress, Some(ExportPrep)),
                (Completed, Some(ExportPrep)),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_racing_completion_reports_terminal() {
        let h = harness(ScriptedGenerator::happy("p", 3), fast_config());
        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h.orchestrator, accepted.task_id).await;

        // Reads still see the task as pending, as if the run finished right
        // after the status check.
        h.tasks.stale_reads.store(true, Ordering::SeqCst);
        assert!(matches!(
            h.orchestrator.cancel(accepted.task_id).await,
            Err(GenerationError::TaskAlreadyTerminal(id)) if id == accepted.task_id
        ));

        h.tasks.stale_reads.store(false, Ordering::SeqCst);
        let task = h.orchestrator.get_status(accepted.task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(course.status, CourseStatus::Ready);
    }

    #[tokio::test]
    async fn test_cancelled_content_phase_saves_finished_chapters() {
        let h = harness(ScriptedGenerator::happy("p", 3), fast_config());
        let course = Course::draft(
            "Loops",
            "Programming",
            Audience::new(ProficiencyLevel::Beginner),
            1.0,
        );
        h.persistence.create_course(&course).await.unwrap();
        let outline = OutlineChapter {
            title: "Part 1".to_string(),
            summary: None,
            learning_objectives: vec!["Use loops in part 1".to_string()],
            complexity: Some(1.0),
        };
        let spec = ChapterSpec::from_outline(&course, 1, &outline);

        let mut in_flight = JoinSet::new();
        let pipeline = Arc::clone(&h.orchestrator.inner.pipeline);
        in_flight.spawn(async move { pipeline.run(&spec).await });
        in_flight.spawn(std::future::pending::<ChapterOutcome>());
        // Let the first chapter finish without joining it.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let error = h
            .orchestrator
            .inner
            .abandon_chapters(course.id, &mut in_flight)
            .await;

        assert_eq!(error.kind, TaskErrorKind::Cancelled);
        let saved = h.persistence.load_course(course.id).await.unwrap().unwrap();
        assert_eq!(saved.chapters.len(), 1);
        assert_eq!(saved.chapters[0].sequence_number, 1);
        let joined = in_flight.join_next().await.unwrap();
        assert!(joined.unwrap_err().is_cancelled());
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_regeneration_reports_invalid_structure() {
        let generator = ScriptedGenerator::new("p", |req, _| {
            if req.params.regeneration_reason.is_some() {
                Reply::Content("{ not json".to_string())
            } else {
                Reply::Content(happy_reply(req, 3))
            }
        });
        let h = harness(generator, fast_config());
        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h.orchestrator, accepted.task_id).await;
        let before = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        let target = before.chapters[0].clone();

        let regen = h
            .orchestrator
            .regenerate_chapter(accepted.course_id, target.id, Some("tighter".to_string()))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, regen.task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert_eq!(error.kind, TaskErrorKind::InvalidStructure);
        assert_eq!(error.chapter_id, Some(target.id));

        let after = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert_eq!(after.chapters[0].generated_at, target.generated_at);
        assert!(!after.chapters[0].degraded);
    }

    #[tokio::test]
    async fn test_skeleton_chapter_lowers_course_metrics() {
        let h_good = harness(ScriptedGenerator::happy("p", 4), fast_config());
        let accepted = h_good
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        wait_for_terminal(&h_good.orchestrator, accepted.task_id).await;
        let baseline = h_good
            .orchestrator
            .get_course(accepted.course_id)
            .await
            .unwrap()
            .quality_metrics
            .unwrap();

        let generator = ScriptedGenerator::new("p", |req, _| match req.task_type {
            ProviderTaskType::ChapterContent if req.params.sequence_number == Some(2) => {
                Reply::Content("{ not json".to_string())
            }
            _ => Reply::Content(happy_reply(req, 4)),
        });
        let h = harness(generator, fast_config());
        let accepted = h
            .orchestrator
            .start_generation(request(ProficiencyLevel::Beginner))
            .await
            .unwrap();
        let task = wait_for_terminal(&h.orchestrator, accepted.task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);

        let course = h.orchestrator.get_course(accepted.course_id).await.unwrap();
        assert!(course.chapters[1].subchapters.is_empty());
        let metrics = course.quality_metrics.unwrap();
        assert!(metrics.readability_score < baseline.readability_score);
        assert!(metrics.pedagogical_alignment < baseline.pedagogical_alignment);
        assert!(metrics.content_accuracy < baseline.content_accuracy);
        assert_eq!(metrics.objective_coverage, 0.0);
    }
}
