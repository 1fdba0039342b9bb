//! Generation DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::course::Audience;

/// Request to generate a new course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartGeneration {
    pub title: String,
    pub subject: String,
    pub audience: Audience,
    /// Difficulty score between 1.0 and 5.0
    pub difficulty: f64,
    /// Preferred chapter count; must fall inside the audience level's range
    #[serde(default)]
    pub chapter_count: Option<usize>,
    #[serde(default = "default_true")]
    pub include_final_assessment: bool,
}

fn default_true() -> bool {
    true
}

/// Response to an accepted course generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAccepted {
    pub task_id: Uuid,
    pub course_id: Uuid,
}

/// Request to regenerate a single chapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerateChapter {
    pub reason: String,
}

/// Response to an accepted chapter regeneration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationAccepted {
    pub task_id: Uuid,
    pub course_id: Uuid,
    pub chapter_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::course::ProficiencyLevel;

    #[test]
    fn test_final_assessment_defaults_on() {
        let req: StartGeneration = serde_json::from_value(serde_json::json!({
            "title": "Intro to X",
            "subject": "X",
            "audience": { "level": "beginner" },
            "difficulty": 1.5
        }))
        .unwrap();
        assert!(req.include_final_assessment);
        assert_eq!(req.audience.level, ProficiencyLevel::Beginner);
        assert_eq!(req.chapter_count, None);
    }
}
