//! Generation task domain types
//!
//! A generation task is the durable record of one asynchronous course (or
//! single chapter) generation run. Callers poll it; only the orchestrator
//! that created it writes to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Generation task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTask {
    pub task_id: Uuid,
    pub course_id: Uuid,
    pub scope: TaskScope,
    pub status: TaskStatus,
    /// Current stage, meaningful while the task is in progress
    pub phase: Option<GenerationPhase>,
    /// 0-100, never decreases while the task is in progress
    pub progress_percentage: f64,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a task generates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskScope {
    Course,
    Chapter { chapter_id: Uuid },
}

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a non-terminal status may move to `next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "InProgress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(TaskStatus::Pending),
            "InProgress" => Ok(TaskStatus::InProgress),
            "Completed" => Ok(TaskStatus::Completed),
            "Failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// Stage of a generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationPhase {
    Structure,
    Content,
    Assessment,
    Validation,
    ExportPrep,
}

impl GenerationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationPhase::Structure => "Structure",
            GenerationPhase::Content => "Content",
            GenerationPhase::Assessment => "Assessment",
            GenerationPhase::Validation => "Validation",
            GenerationPhase::ExportPrep => "ExportPrep",
        }
    }
}

impl std::fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GenerationPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Structure" => Ok(GenerationPhase::Structure),
            "Content" => Ok(GenerationPhase::Content),
            "Assessment" => Ok(GenerationPhase::Assessment),
            "Validation" => Ok(GenerationPhase::Validation),
            "ExportPrep" => Ok(GenerationPhase::ExportPrep),
            other => Err(format!("unknown generation phase '{}'", other)),
        }
    }
}

/// Structured error attached to a failed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub phase: Option<GenerationPhase>,
    pub message: String,
    #[serde(default)]
    pub chapter_id: Option<Uuid>,
}

impl TaskError {
    /// Builds an error whose message is prefixed with the phase it happened in
    pub fn in_phase(
        kind: TaskErrorKind,
        phase: Option<GenerationPhase>,
        detail: impl std::fmt::Display,
    ) -> Self {
        let message = match phase {
            Some(phase) => format!("{} phase failed ({}): {}", phase, kind, detail),
            None => format!("generation failed ({}): {}", kind, detail),
        };
        Self {
            kind,
            phase,
            message,
            chapter_id: None,
        }
    }

    pub fn for_chapter(mut self, chapter_id: Uuid) -> Self {
        self.chapter_id = Some(chapter_id);
        self
    }

    pub fn cancelled(phase: Option<GenerationPhase>) -> Self {
        Self::in_phase(TaskErrorKind::Cancelled, phase, "cancelled by caller")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    ProviderUnavailable,
    ProviderTimeout,
    ProviderRateLimited,
    InvalidStructure,
    Persistence,
    Cancelled,
    Internal,
}

impl TaskErrorKind {
    /// Whether retrying the same request later has a reasonable chance to succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskErrorKind::Internal)
    }
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskErrorKind::ProviderUnavailable => "provider_unavailable",
            TaskErrorKind::ProviderTimeout => "provider_timeout",
            TaskErrorKind::ProviderRateLimited => "provider_rate_limited",
            TaskErrorKind::InvalidStructure => "invalid_structure",
            TaskErrorKind::Persistence => "persistence",
            TaskErrorKind::Cancelled => "cancelled",
            TaskErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Partial update applied to a task record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub phase: Option<GenerationPhase>,
    pub progress: Option<f64>,
    pub error: Option<TaskError>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Enter a phase of an in-progress task
    pub fn phase(phase: GenerationPhase, progress: f64) -> Self {
        Self {
            status: Some(TaskStatus::InProgress),
            phase: Some(phase),
            progress: Some(progress),
            error: None,
        }
    }

    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress: Some(100.0),
            ..Default::default()
        }
    }

    pub fn failed(error: TaskError) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid task transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl GenerationTask {
    /// Creates a pending task
    pub fn pending(course_id: Uuid, scope: TaskScope) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            course_id,
            scope,
            status: TaskStatus::Pending,
            phase: None,
            progress_percentage: 0.0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an update, enforcing the task lifecycle
    ///
    /// Terminal tasks are immutable: re-applying the same terminal status is a
    /// no-op, anything else is an [`InvalidTransition`]. Progress is clamped to
    /// 0-100 and never moves backwards. Returns whether the record changed.
    pub fn apply(&mut self, update: &TaskUpdate) -> Result<bool, InvalidTransition> {
        if self.status.is_terminal() {
            return match update.status {
                Some(next) if next == self.status && update.error.is_none() => Ok(false),
                Some(next) => Err(InvalidTransition {
                    from: self.status,
                    to: next,
                }),
                None => Err(InvalidTransition {
                    from: self.status,
                    to: self.status,
                }),
            };
        }

        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return Err(InvalidTransition {
                    from: self.status,
                    to: next,
                });
            }
        }

        let before = (self.status, self.phase, self.progress_percentage);

        if let Some(next) = update.status {
            self.status = next;
        }
        if let Some(phase) = update.phase {
            self.phase = Some(phase);
        }
        if let Some(progress) = update.progress {
            let progress = progress.clamp(0.0, 100.0);
            if progress > self.progress_percentage {
                self.progress_percentage = progress;
            }
        }
        if self.status == TaskStatus::Completed {
            self.progress_percentage = 100.0;
        }
        if self.status == TaskStatus::Failed {
            self.error = update.error.clone();
        }

        let changed = before != (self.status, self.phase, self.progress_percentage)
            || self.error.is_some();
        if changed {
            self.updated_at = Utc::now();
        }
        Ok(changed)
    }
}
