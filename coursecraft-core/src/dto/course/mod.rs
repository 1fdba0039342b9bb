//! Course DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::course::{Course, CourseStatus, ProficiencyLevel};
use crate::domain::quality::QualityMetrics;

/// Lightweight course overview used in listings and CLI output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseSummary {
    pub id: Uuid,
    pub title: String,
    pub level: ProficiencyLevel,
    pub status: CourseStatus,
    pub chapter_count: usize,
    pub degraded_chapters: Vec<u32>,
    pub quality_metrics: Option<QualityMetrics>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Course> for CourseSummary {
    fn from(course: &Course) -> Self {
        Self {
            id: course.id,
            title: course.title.clone(),
            level: course.audience.level,
            status: course.status,
            chapter_count: course.chapters.len(),
            degraded_chapters: course
                .degraded_chapters()
                .map(|c| c.sequence_number)
                .collect(),
            quality_metrics: course.quality_metrics.clone(),
            updated_at: course.updated_at,
        }
    }
}
