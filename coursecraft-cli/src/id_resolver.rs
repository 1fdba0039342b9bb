//! ID resolver module
//!
//! Resolves a [`ChapterRef`] against the chapters of a loaded course, so users
//! can name chapters by position or short prefix instead of full UUIDs.

use anyhow::{Result, anyhow};
use coursecraft_core::domain::course::{Chapter, Course};

use crate::types::ChapterRef;

/// Find the chapter of `course` that `chapter` refers to
///
/// # Errors
/// Returns an error if:
/// - No chapter matches
/// - A prefix matches several chapters (ambiguous)
pub fn resolve_chapter<'a>(course: &'a Course, chapter: &ChapterRef) -> Result<&'a Chapter> {
    match chapter {
        ChapterRef::Full(id) => course
            .chapter(*id)
            .ok_or_else(|| anyhow!("Course {} has no chapter {}", course.id, id)),
        ChapterRef::Position(n) => course
            .chapters
            .iter()
            .find(|c| c.sequence_number == *n)
            .ok_or_else(|| {
                anyhow!(
                    "Course {} has no chapter #{} (it has {})",
                    course.id,
                    n,
                    course.chapters.len()
                )
            }),
        ChapterRef::Prefix(prefix) => {
            let matches: Vec<_> = course
                .chapters
                .iter()
                .filter(|c| c.id.to_string().starts_with(prefix.as_str()))
                .collect();

            match matches.as_slice() {
                [] => Err(anyhow!("No chapter found with ID starting with '{}'", prefix)),
                [only] => Ok(only),
                _ => {
                    let ids: Vec<String> = matches.iter().map(|c| c.id.to_string()).collect();
                    Err(anyhow!(
                        "Ambiguous prefix '{}' matches multiple chapters: {}",
                        prefix,
                        ids.join(", ")
                    ))
                }
            }
        }
    }
}
