//! Chapter Generation Pipeline
//!
//! Produces one chapter through a bounded generate/score/retry loop:
//!
//! ```text
//! Generating -> Scoring -> Accepted
//!                       -> Retry (escalated prompt) -> Generating
//!                       -> Degraded (attempts exhausted)
//! ```
//!
//! The pipeline never fails outright. When every attempt fails at the
//! provider it returns a degraded skeleton chapter scored at zero, so a
//! single bad chapter cannot sink a whole course.

use crate::service::content::{ChapterDraft, OutlineChapter, parse_chapter};
use crate::service::gateway::ProviderGateway;
use crate::service::quality::{QualityGate, QualityVerdict};
use chrono::Utc;
use coursecraft_core::domain::course::{
    Audience, Chapter, Course, MIN_DIFFICULTY, Subchapter,
};
use coursecraft_core::domain::provider::{
    PromptAdjustment, PromptParams, ProviderRequest, ProviderTaskType,
};
use coursecraft_core::domain::quality::{QualityMetric, QualityMetrics};
use coursecraft_core::domain::task::TaskErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything needed to generate one chapter
#[derive(Debug, Clone)]
pub struct ChapterSpec {
    pub chapter_id: Uuid,
    pub sequence_number: u32,
    pub title: String,
    pub summary: Option<String>,
    pub learning_objectives: Vec<String>,
    pub complexity_level: f64,
    pub course_title: String,
    pub subject: String,
    pub difficulty: f64,
    pub audience: Audience,
    pub regeneration_reason: Option<String>,
}

impl ChapterSpec {
    /// A new chapter proposed by the structure phase
    ///
    /// Complexity defaults to the course difficulty and is capped at the
    /// course's allowed headroom.
    pub fn from_outline(course: &Course, sequence_number: u32, outline: &OutlineChapter) -> Self {
        let complexity = outline
            .complexity
            .unwrap_or(course.difficulty)
            .clamp(MIN_DIFFICULTY, course.max_chapter_complexity());
        Self {
            chapter_id: Uuid::new_v4(),
            sequence_number,
            title: outline.title.trim().to_string(),
            summary: outline.summary.clone(),
            learning_objectives: outline.learning_objectives.clone(),
            complexity_level: complexity,
            course_title: course.title.clone(),
            subject: course.subject.clone(),
            difficulty: course.difficulty,
            audience: course.audience.clone(),
            regeneration_reason: None,
        }
    }

    /// Replacement for an existing chapter, keeping its id and position
    pub fn regenerate(course: &Course, chapter: &Chapter, reason: Option<String>) -> Self {
        Self {
            chapter_id: chapter.id,
            sequence_number: chapter.sequence_number,
            title: chapter.title.clone(),
            summary: chapter.summary.clone(),
            learning_objectives: chapter.learning_objectives.clone(),
            complexity_level: chapter
                .complexity_level
                .clamp(MIN_DIFFICULTY, course.max_chapter_complexity()),
            course_title: course.title.clone(),
            subject: course.subject.clone(),
            difficulty: course.difficulty,
            audience: course.audience.clone(),
            regeneration_reason: reason,
        }
    }

    fn request(&self, attempt: u32, adjustments: &[PromptAdjustment]) -> ProviderRequest {
        ProviderRequest {
            task_type: ProviderTaskType::ChapterContent,
            audience: self.audience.clone(),
            params: PromptParams {
                course_title: self.course_title.clone(),
                subject: self.subject.clone(),
                difficulty: self.difficulty,
                chapter_title: Some(self.title.clone()),
                sequence_number: Some(self.sequence_number),
                learning_objectives: self.learning_objectives.clone(),
                target_complexity: Some(self.complexity_level),
                adjustments: adjustments.to_vec(),
                regeneration_reason: self.regeneration_reason.clone(),
                attempt,
                ..Default::default()
            },
        }
    }

    fn build(&self, draft: ChapterDraft) -> Chapter {
        let subchapters = draft
            .subchapters
            .into_iter()
            .enumerate()
            .map(|(idx, s)| Subchapter {
                sequence_number: idx as u32 + 1,
                title: s.title,
                content: s.content,
                examples: s.examples,
                key_points: s.key_points,
                estimated_minutes: s.estimated_minutes,
            })
            .collect();

        Chapter {
            id: self.chapter_id,
            sequence_number: self.sequence_number,
            title: self.title.clone(),
            summary: draft.summary.or_else(|| self.summary.clone()),
            learning_objectives: self.learning_objectives.clone(),
            complexity_level: self.complexity_level,
            subchapters,
            flashcards: draft.flashcards,
            quiz: draft.quiz,
            metrics: None,
            degraded: false,
            generated_at: Utc::now(),
        }
    }

    /// Placeholder kept when no attempt produced usable content
    fn skeleton(&self) -> Chapter {
        Chapter {
            id: self.chapter_id,
            sequence_number: self.sequence_number,
            title: self.title.clone(),
            summary: self.summary.clone(),
            learning_objectives: self.learning_objectives.clone(),
            complexity_level: self.complexity_level,
            subchapters: Vec::new(),
            flashcards: Vec::new(),
            quiz: None,
            metrics: Some(QualityMetrics::zero()),
            degraded: true,
            generated_at: Utc::now(),
        }
    }
}

/// Result of running the pipeline for one chapter
#[derive(Debug, Clone)]
pub enum ChapterOutcome {
    Accepted(Chapter),
    /// `cause` is set when no attempt produced usable content
    Degraded {
        chapter: Chapter,
        reason: String,
        cause: Option<TaskErrorKind>,
    },
}

impl ChapterOutcome {
    pub fn chapter(&self) -> &Chapter {
        match self {
            ChapterOutcome::Accepted(chapter) => chapter,
            ChapterOutcome::Degraded { chapter, .. } => chapter,
        }
    }

    pub fn into_chapter(self) -> Chapter {
        match self {
            ChapterOutcome::Accepted(chapter) => chapter,
            ChapterOutcome::Degraded { chapter, .. } => chapter,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ChapterOutcome::Degraded { .. })
    }
}

/// Decides how a retried prompt changes after a quality rejection
pub trait EscalationStrategy: Send + Sync {
    fn escalate(
        &self,
        failing: &[QualityMetric],
        current: &[PromptAdjustment],
    ) -> Vec<PromptAdjustment>;
}

/// Adds one prompt adjustment per failing metric, keeping earlier ones
#[derive(Debug, Clone, Default)]
pub struct MetricEscalation;

impl MetricEscalation {
    fn adjustment_for(metric: QualityMetric) -> PromptAdjustment {
        match metric {
            QualityMetric::Readability => PromptAdjustment::SimplifyVocabulary,
            QualityMetric::ObjectiveCoverage => PromptAdjustment::CoverAllObjectives,
            QualityMetric::PedagogicalAlignment => PromptAdjustment::AddExamples,
            QualityMetric::ContentAccuracy => PromptAdjustment::VerifyFacts,
            QualityMetric::BiasDetection => PromptAdjustment::NeutralLanguage,
        }
    }
}

impl EscalationStrategy for MetricEscalation {
    fn escalate(
        &self,
        failing: &[QualityMetric],
        current: &[PromptAdjustment],
    ) -> Vec<PromptAdjustment> {
        let mut adjustments = current.to_vec();
        for metric in failing {
            let adjustment = Self::adjustment_for(*metric);
            if !adjustments.contains(&adjustment) {
                adjustments.push(adjustment);
            }
        }
        adjustments
    }
}

pub struct ChapterPipeline {
    gateway: Arc<ProviderGateway>,
    gate: Arc<QualityGate>,
    escalation: Arc<dyn EscalationStrategy>,
    max_attempts: u32,
    timeout: Duration,
}

impl ChapterPipeline {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        gate: Arc<QualityGate>,
        escalation: Arc<dyn EscalationStrategy>,
        max_attempts: u32,
    ) -> Self {
        let timeout = gateway.default_timeout();
        Self {
            gateway,
            gate,
            escalation,
            max_attempts: max_attempts.max(1),
            timeout,
        }
    }

    /// Generates one chapter
    pub async fn run(&self, spec: &ChapterSpec) -> ChapterOutcome {
        let mut adjustments: Vec<PromptAdjustment> = Vec::new();
        let mut best: Option<(Chapter, Vec<QualityMetric>)> = None;
        let mut last_error: Option<(TaskErrorKind, String)> = None;

        for attempt in 1..=self.max_attempts {
            let request = spec.request(attempt, &adjustments);

            let result = match self.gateway.generate(&request, self.timeout).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        "Chapter {} attempt {}/{} failed: {}",
                        spec.sequence_number, attempt, self.max_attempts, e
                    );
                    last_error = Some((e.task_error_kind(), e.to_string()));
                    continue;
                }
            };

            let draft = match parse_chapter(&result.content) {
                Ok(draft) => draft,
                Err(e) => {
                    warn!(
                        "Chapter {} attempt {}/{} returned unusable content from {}: {}",
                        spec.sequence_number, attempt, self.max_attempts, result.provider_id, e
                    );
                    last_error = Some((TaskErrorKind::InvalidStructure, e.to_string()));
                    continue;
                }
            };

            let mut chapter = spec.build(draft);
            let metrics = self.gate.evaluate_chapter(&chapter, &spec.audience);
            let verdict = self
                .gate
                .verdict(&metrics, &spec.audience, attempt, self.max_attempts);
            chapter.metrics = Some(metrics);

            let failing = match verdict {
                QualityVerdict::Accept => {
                    info!(
                        "Chapter {} '{}' accepted on attempt {}",
                        spec.sequence_number, spec.title, attempt
                    );
                    return ChapterOutcome::Accepted(chapter);
                }
                QualityVerdict::Regenerate(failing) | QualityVerdict::Reject(failing) => failing,
            };

            debug!(
                "Chapter {} attempt {} rejected, failing metrics: {:?}",
                spec.sequence_number, attempt, failing
            );
            adjustments = self.escalation.escalate(&failing, &adjustments);

            let better = match &best {
                None => true,
                Some((current, current_failing)) => is_better(
                    &chapter,
                    failing.len(),
                    current,
                    current_failing.len(),
                ),
            };
            if better {
                best = Some((chapter, failing));
            }
        }

        match best {
            Some((mut chapter, failing)) => {
                chapter.degraded = true;
                let names: Vec<String> = failing.iter().map(|m| m.to_string()).collect();
                let reason = format!(
                    "quality thresholds not met after {} attempts: {}",
                    self.max_attempts,
                    names.join(", ")
                );
                warn!("Chapter {} degraded: {}", spec.sequence_number, reason);
                ChapterOutcome::Degraded {
                    chapter,
                    reason,
                    cause: None,
                }
            }
            None => {
                let (kind, detail) = last_error.unwrap_or_else(|| {
                    (TaskErrorKind::ProviderUnavailable, "unknown error".to_string())
                });
                let reason = format!(
                    "no usable content after {} attempts: {}",
                    self.max_attempts, detail
                );
                warn!("Chapter {} degraded: {}", spec.sequence_number, reason);
                ChapterOutcome::Degraded {
                    chapter: spec.skeleton(),
                    reason,
                    cause: Some(kind),
                }
            }
        }
    }
}

/// Fewer failing metrics wins, then higher readability
fn is_better(candidate: &Chapter, failing: usize, current: &Chapter, current_failing: usize) -> bool {
    let readability = |c: &Chapter| c.metrics.as_ref().map_or(0.0, |m| m.readability_score);
    failing < current_failing
        || (failing == current_failing && readability(candidate) > readability(current))
}
