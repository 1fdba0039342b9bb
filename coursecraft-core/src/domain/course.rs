//! Course domain types
//!
//! A course is the aggregate root: an ordered sequence of chapters plus an
//! optional final assessment and a quality snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use uuid::Uuid;

use crate::domain::quality::QualityMetrics;

/// Lowest accepted course difficulty score
pub const MIN_DIFFICULTY: f64 = 1.0;

/// Highest accepted course difficulty score
pub const MAX_DIFFICULTY: f64 = 5.0;

/// How far a chapter's complexity may exceed the course difficulty
pub const COMPLEXITY_HEADROOM: f64 = 0.5;

/// Proficiency level of the target audience
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProficiencyLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl ProficiencyLevel {
    /// Allowed number of chapters for a course aimed at this level
    pub fn chapter_range(&self) -> RangeInclusive<usize> {
        match self {
            ProficiencyLevel::Beginner => 3..=5,
            ProficiencyLevel::Intermediate => 5..=8,
            ProficiencyLevel::Advanced => 8..=12,
            ProficiencyLevel::Expert => 10..=15,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProficiencyLevel::Beginner => "beginner",
            ProficiencyLevel::Intermediate => "intermediate",
            ProficiencyLevel::Advanced => "advanced",
            ProficiencyLevel::Expert => "expert",
        }
    }
}

impl std::fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProficiencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beginner" => Ok(ProficiencyLevel::Beginner),
            "intermediate" => Ok(ProficiencyLevel::Intermediate),
            "advanced" => Ok(ProficiencyLevel::Advanced),
            "expert" => Ok(ProficiencyLevel::Expert),
            other => Err(format!("unknown proficiency level '{}'", other)),
        }
    }
}

/// Target audience of a course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audience {
    pub level: ProficiencyLevel,

    /// Free-form description, e.g. "high school teachers"
    #[serde(default)]
    pub description: Option<String>,
}

impl Audience {
    pub fn new(level: ProficiencyLevel) -> Self {
        Self {
            level,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Lifecycle status of a course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourseStatus {
    Draft,
    Generating,
    Ready,
    Published,
    Archived,
}

impl CourseStatus {
    /// Whether the lifecycle allows moving from `self` to `next`
    ///
    /// `Generating -> Draft` is the rollback taken when a generation task fails.
    pub fn can_transition_to(&self, next: CourseStatus) -> bool {
        use CourseStatus::*;
        matches!(
            (self, next),
            (Draft, Generating)
                | (Generating, Ready)
                | (Generating, Draft)
                | (Ready, Published)
                | (Generating, Archived)
                | (Ready, Archived)
                | (Published, Archived)
        )
    }

    /// Whether single chapters of a course in this status may be regenerated
    pub fn allows_regeneration(&self) -> bool {
        matches!(
            self,
            CourseStatus::Draft | CourseStatus::Ready | CourseStatus::Published
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Draft => "Draft",
            CourseStatus::Generating => "Generating",
            CourseStatus::Ready => "Ready",
            CourseStatus::Published => "Published",
            CourseStatus::Archived => "Archived",
        }
    }
}

impl std::fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CourseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(CourseStatus::Draft),
            "Generating" => Ok(CourseStatus::Generating),
            "Ready" => Ok(CourseStatus::Ready),
            "Published" => Ok(CourseStatus::Published),
            "Archived" => Ok(CourseStatus::Archived),
            other => Err(format!("unknown course status '{}'", other)),
        }
    }
}

/// A generated course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub subject: String,
    pub audience: Audience,
    /// Difficulty score between 1.0 and 5.0
    pub difficulty: f64,
    pub status: CourseStatus,
    /// Chapters ordered by sequence number
    pub chapters: Vec<Chapter>,
    pub final_assessment: Option<Quiz>,
    pub quality_metrics: Option<QualityMetrics>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Course {
    /// Creates an empty draft course
    pub fn draft(
        title: impl Into<String>,
        subject: impl Into<String>,
        audience: Audience,
        difficulty: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            subject: subject.into(),
            audience,
            difficulty,
            status: CourseStatus::Draft,
            chapters: Vec::new(),
            final_assessment: None,
            quality_metrics: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn chapter(&self, chapter_id: Uuid) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == chapter_id)
    }

    /// Inserts or replaces a chapter, keeping the sequence ordered
    pub fn upsert_chapter(&mut self, chapter: Chapter) {
        match self.chapters.iter_mut().find(|c| c.id == chapter.id) {
            Some(existing) => *existing = chapter,
            None => self.chapters.push(chapter),
        }
        self.chapters.sort_by_key(|c| c.sequence_number);
        self.updated_at = Utc::now();
    }

    /// True when sequence numbers are exactly 1..=N
    pub fn has_consecutive_sequence(&self) -> bool {
        self.chapters
            .iter()
            .enumerate()
            .all(|(idx, c)| c.sequence_number as usize == idx + 1)
    }

    /// Highest complexity a chapter of this course may have
    pub fn max_chapter_complexity(&self) -> f64 {
        self.difficulty + COMPLEXITY_HEADROOM
    }

    pub fn degraded_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.iter().filter(|c| c.degraded)
    }
}

/// A major ordered learning unit of a course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    /// 1-based position in the course
    pub sequence_number: u32,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub learning_objectives: Vec<String>,
    pub complexity_level: f64,
    pub subchapters: Vec<Subchapter>,
    #[serde(default)]
    pub flashcards: Vec<Flashcard>,
    pub quiz: Option<Quiz>,
    pub metrics: Option<QualityMetrics>,
    /// Accepted despite failing quality thresholds
    #[serde(default)]
    pub degraded: bool,
    pub generated_at: DateTime<Utc>,
}

impl Chapter {
    /// All learner-facing text of the chapter, used for scoring and export
    pub fn content_text(&self) -> String {
        let mut text = String::new();
        for sub in &self.subchapters {
            text.push_str(&sub.title);
            text.push_str(".\n");
            text.push_str(&sub.content);
            text.push('\n');
            for example in &sub.examples {
                text.push_str(example);
                text.push('\n');
            }
            for point in &sub.key_points {
                text.push_str(point);
                text.push('\n');
            }
        }
        text
    }

    /// Word count of the chapter body
    pub fn content_length(&self) -> usize {
        self.subchapters
            .iter()
            .map(|s| s.content.split_whitespace().count())
            .sum()
    }

    pub fn example_count(&self) -> usize {
        self.subchapters.iter().map(|s| s.examples.len()).sum()
    }
}

/// A section within a chapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subchapter {
    pub sequence_number: u32,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub estimated_minutes: u32,
}

/// Front/back study card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

/// Assessment attached to a chapter or to the whole course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub title: String,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub bloom_level: Option<BloomLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
}

/// Cognitive level targeted by a question (Bloom's taxonomy)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloomLevel {
    Remember,
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(seq: u32) -> Chapter {
        Chapter {
            id: Uuid::new_v4(),
            sequence_number: seq,
            title: format!("Chapter {}", seq),
            summary: None,
            learning_objectives: vec!["understand things".to_string()],
            complexity_level: 1.0,
            subchapters: vec![],
            flashcards: vec![],
            quiz: None,
            metrics: None,
            degraded: false,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_chapter_ranges() {
        assert_eq!(ProficiencyLevel::Beginner.chapter_range(), 3..=5);
        assert_eq!(ProficiencyLevel::Intermediate.chapter_range(), 5..=8);
        assert_eq!(ProficiencyLevel::Advanced.chapter_range(), 8..=12);
        assert_eq!(ProficiencyLevel::Expert.chapter_range(), 10..=15);
    }

    #[test]
    fn test_course_status_transitions() {
        use CourseStatus::*;
        assert!(Draft.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Published));
        assert!(Published.can_transition_to(Archived));
        assert!(Generating.can_transition_to(Draft));

        assert!(!Draft.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Generating));
        assert!(!Archived.can_transition_to(Draft));
        assert!(!Draft.can_transition_to(Archived));
    }

    #[test]
    fn test_upsert_keeps_sequence_order() {
        let mut course = Course::draft("Intro", "X", Audience::new(ProficiencyLevel::Beginner), 2.0);
        course.upsert_chapter(chapter(3));
        course.upsert_chapter(chapter(1));
        course.upsert_chapter(chapter(2));
        assert!(course.has_consecutive_sequence());

        let mut replacement = course.chapters[1].clone();
        replacement.title = "Replaced".to_string();
        course.upsert_chapter(replacement);
        assert_eq!(course.chapters.len(), 3);
        assert_eq!(course.chapters[1].title, "Replaced");
    }

    #[test]
    fn test_sequence_gap_detected() {
        let mut course = Course::draft("Intro", "X", Audience::new(ProficiencyLevel::Beginner), 2.0);
        course.upsert_chapter(chapter(1));
        course.upsert_chapter(chapter(3));
        assert!(!course.has_consecutive_sequence());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("Expert".parse::<ProficiencyLevel>(), Ok(ProficiencyLevel::Expert));
        assert!("guru".parse::<ProficiencyLevel>().is_err());
    }
}
