//! Common types used across CLI modules

use uuid::Uuid;

/// How a chapter is named on the command line
///
/// Chapters can be given by full UUID, by an unambiguous UUID prefix, or by
/// their 1-based position in the course.
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterRef {
    /// Full UUID
    Full(Uuid),
    /// Sequence number within the course
    Position(u32),
    /// Prefix that should uniquely identify a chapter of the course
    Prefix(String),
}

impl ChapterRef {
    /// Parse a string into a ChapterRef
    ///
    /// Full UUIDs win over numbers; a bare number is read as a position.
    pub fn parse(input: &str) -> Self {
        if let Ok(uuid) = Uuid::parse_str(input) {
            ChapterRef::Full(uuid)
        } else if let Ok(position) = input.parse::<u32>() {
            ChapterRef::Position(position)
        } else {
            ChapterRef::Prefix(input.to_lowercase())
        }
    }
}

impl std::fmt::Display for ChapterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChapterRef::Full(uuid) => write!(f, "{}", uuid),
            ChapterRef::Position(n) => write!(f, "#{}", n),
            ChapterRef::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}
