//! Provider payloads
//!
//! Generators answer with JSON documents; this module parses them into typed
//! drafts and rejects anything that is structurally unusable.

use coursecraft_core::domain::course::{Flashcard, Quiz};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ContentError {
    #[error("provider returned empty content")]
    Empty,
    #[error("unparseable provider content: {0}")]
    Malformed(String),
    #[error("incomplete provider content: {0}")]
    Incomplete(String),
}

/// Chapter list proposed by the structure phase
#[derive(Debug, Clone, Deserialize)]
pub struct CourseOutline {
    pub chapters: Vec<OutlineChapter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutlineChapter {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub complexity: Option<f64>,
}

/// Body of one chapter
#[derive(Debug, Clone, Deserialize)]
pub struct ChapterDraft {
    #[serde(default)]
    pub summary: Option<String>,
    pub subchapters: Vec<SubchapterDraft>,
    #[serde(default)]
    pub flashcards: Vec<Flashcard>,
    #[serde(default)]
    pub quiz: Option<Quiz>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubchapterDraft {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default = "default_minutes")]
    pub estimated_minutes: u32,
}

fn default_minutes() -> u32 {
    10
}

/// Parses an outline; every chapter needs a title and at least one objective
pub fn parse_outline(content: &str) -> Result<CourseOutline, ContentError> {
    let mut outline: CourseOutline = parse_json(content)?;
    for (pos, chapter) in outline.chapters.iter_mut().enumerate() {
        if chapter.title.trim().is_empty() {
            return Err(ContentError::Incomplete(format!("chapter {} has no title", pos + 1)));
        }
        chapter.learning_objectives.retain(|o| !o.trim().is_empty());
        if chapter.learning_objectives.is_empty() {
            return Err(ContentError::Incomplete(format!(
                "chapter {} has no learning objectives",
                pos + 1
            )));
        }
    }
    Ok(outline)
}

pub fn parse_chapter(content: &str) -> Result<ChapterDraft, ContentError> {
    let draft: ChapterDraft = parse_json(content)?;
    if draft.subchapters.is_empty() {
        return Err(ContentError::Incomplete("chapter has no subchapters".to_string()));
    }
    if draft.subchapters.iter().all(|s| s.content.trim().is_empty()) {
        return Err(ContentError::Incomplete("chapter has no body text".to_string()));
    }
    Ok(draft)
}

pub fn parse_quiz(content: &str) -> Result<Quiz, ContentError> {
    let quiz: Quiz = parse_json(content)?;
    if quiz.questions.is_empty() {
        return Err(ContentError::Incomplete("assessment has no questions".to_string()));
    }
    Ok(quiz)
}

/// Parses a JSON document, tolerating a surrounding markdown code fence
fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, ContentError> {
    let trimmed = strip_code_fence(content.trim());
    if trimmed.is_empty() {
        return Err(ContentError::Empty);
    }
    serde_json::from_str(trimmed).map_err(|e| ContentError::Malformed(e.to_string()))
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
