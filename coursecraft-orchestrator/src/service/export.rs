//! Export Assembler
//!
//! Turns a ready course into a downloadable package. Each format is produced
//! by an [`ExportEncoder`]; the assembler only checks that the course may be
//! exported and dispatches to the registered encoder.

use crate::repository::{CoursePersistence, PersistenceError};
use coursecraft_core::domain::course::{Course, CourseStatus, Quiz};
use coursecraft_core::domain::export::ExportFormat;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export format '{0}' is not supported")]
    UnsupportedFormat(ExportFormat),

    #[error("course {0} not found")]
    CourseNotFound(Uuid),

    #[error("course {course_id} is {status}; only ready or published courses can be exported")]
    CourseNotReady { course_id: Uuid, status: CourseStatus },

    #[error("failed to encode course: {0}")]
    Encoding(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// An encoded course package
#[derive(Debug, Clone)]
pub struct ExportPackage {
    pub format: ExportFormat,
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Encodes a course into one package format
pub trait ExportEncoder: Send + Sync {
    fn format(&self) -> ExportFormat;

    fn encode(&self, course: &Course) -> Result<Vec<u8>, ExportError>;
}

pub struct ExportAssembler {
    persistence: Arc<dyn CoursePersistence>,
    encoders: HashMap<ExportFormat, Arc<dyn ExportEncoder>>,
}

impl ExportAssembler {
    /// Assembler with the built-in JSON and HTML encoders
    pub fn new(persistence: Arc<dyn CoursePersistence>) -> Self {
        Self {
            persistence,
            encoders: HashMap::new(),
        }
        .with_encoder(Arc::new(JsonEncoder))
        .with_encoder(Arc::new(HtmlEncoder))
    }

    /// Registers (or replaces) the encoder for its format
    pub fn with_encoder(mut self, encoder: Arc<dyn ExportEncoder>) -> Self {
        self.encoders.insert(encoder.format(), encoder);
        self
    }

    pub fn supported_formats(&self) -> Vec<ExportFormat> {
        let mut formats: Vec<ExportFormat> = self.encoders.keys().copied().collect();
        formats.sort_by_key(|f| f.as_str());
        formats
    }

    pub async fn export(
        &self,
        course_id: Uuid,
        format: ExportFormat,
    ) -> Result<ExportPackage, ExportError> {
        let course = self
            .persistence
            .load_course(course_id)
            .await?
            .ok_or(ExportError::CourseNotFound(course_id))?;
        self.assemble(&course, format)
    }

    pub fn assemble(&self, course: &Course, format: ExportFormat) -> Result<ExportPackage, ExportError> {
        if !matches!(course.status, CourseStatus::Ready | CourseStatus::Published) {
            return Err(ExportError::CourseNotReady {
                course_id: course.id,
                status: course.status,
            });
        }
        let encoder = self
            .encoders
            .get(&format)
            .ok_or(ExportError::UnsupportedFormat(format))?;

        let bytes = encoder.encode(course)?;
        tracing::info!(
            "Exported course {} as {} ({} bytes)",
            course.id,
            format,
            bytes.len()
        );

        Ok(ExportPackage {
            format,
            file_name: format!("{}.{}", slug(&course.title), format.extension()),
            content_type: format.content_type(),
            bytes,
        })
    }
}

fn slug(title: &str) -> String {
    let slug = title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "course".to_string()
    } else {
        slug
    }
}

// =============================================================================
// Encoders
// =============================================================================

/// The full course document as pretty-printed JSON
pub struct JsonEncoder;

impl ExportEncoder for JsonEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn encode(&self, course: &Course) -> Result<Vec<u8>, ExportError> {
        serde_json::to_vec_pretty(course).map_err(|e| ExportError::Encoding(e.to_string()))
    }
}

/// A single self-contained HTML page
pub struct HtmlEncoder;

impl HtmlEncoder {
    fn render(course: &Course) -> Result<String, std::fmt::Error> {
        let mut html = String::new();
        writeln!(html, "<!DOCTYPE html>")?;
        writeln!(html, "<html lang=\"en\">")?;
        writeln!(html, "<head><meta charset=\"utf-8\"><title>{}</title></head>", escape(&course.title))?;
        writeln!(html, "<body>")?;
        writeln!(html, "<h1>{}</h1>", escape(&course.title))?;
        writeln!(
            html,
            "<p class=\"meta\">{} &middot; {}</p>",
            escape(&course.subject),
            course.audience.level
        )?;

        for chapter in &course.chapters {
            writeln!(html, "<section id=\"chapter-{}\">", chapter.sequence_number)?;
            writeln!(
                html,
                "<h2>{}. {}</h2>",
                chapter.sequence_number,
                escape(&chapter.title)
            )?;
            if let Some(summary) = &chapter.summary {
                writeln!(html, "<p class=\"summary\">{}</p>", escape(summary))?;
            }
            if !chapter.learning_objectives.is_empty() {
                writeln!(html, "<ul class=\"objectives\">")?;
                for objective in &chapter.learning_objectives {
                    writeln!(html, "<li>{}</li>", escape(objective))?;
                }
                writeln!(html, "</ul>")?;
            }
            for sub in &chapter.subchapters {
                writeln!(html, "<h3>{}</h3>", escape(&sub.title))?;
                for paragraph in sub.content.split("\n\n").filter(|p| !p.trim().is_empty()) {
                    writeln!(html, "<p>{}</p>", escape(paragraph.trim()))?;
                }
                for example in &sub.examples {
                    writeln!(html, "<blockquote class=\"example\">{}</blockquote>", escape(example))?;
                }
            }
            if let Some(quiz) = &chapter.quiz {
                Self::render_quiz(&mut html, quiz)?;
            }
            writeln!(html, "</section>")?;
        }

        if let Some(quiz) = &course.final_assessment {
            writeln!(html, "<section id=\"final-assessment\">")?;
            Self::render_quiz(&mut html, quiz)?;
            writeln!(html, "</section>")?;
        }

        writeln!(html, "</body>")?;
        writeln!(html, "</html>")?;
        Ok(html)
    }

    fn render_quiz(html: &mut String, quiz: &Quiz) -> std::fmt::Result {
        writeln!(html, "<h3>{}</h3>", escape(&quiz.title))?;
        writeln!(html, "<ol class=\"quiz\">")?;
        for question in &quiz.questions {
            writeln!(html, "<li><p>{}</p>", escape(&question.prompt))?;
            if !question.options.is_empty() {
                writeln!(html, "<ul>")?;
                for option in &question.options {
                    writeln!(html, "<li>{}</li>", escape(option))?;
                }
                writeln!(html, "</ul>")?;
            }
            writeln!(html, "</li>")?;
        }
        writeln!(html, "</ol>")
    }
}

impl ExportEncoder for HtmlEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Html
    }

    fn encode(&self, course: &Course) -> Result<Vec<u8>, ExportError> {
        Self::render(course)
            .map(String::into_bytes)
            .map_err(|e| ExportError::Encoding(e.to_string()))
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
