//! Course command handlers
//!
//! Viewing courses, regenerating chapters and downloading exports.

use anyhow::{Context, Result};
use colored::*;
use coursecraft_client::OrchestratorClient;
use coursecraft_core::domain::course::{Chapter, Course, CourseStatus};
use coursecraft_core::domain::export::ExportFormat;
use coursecraft_core::domain::quality::{QualityMetric, QualityMetrics};
use coursecraft_core::dto::course::CourseSummary;
use uuid::Uuid;

use super::generate::{colorize_status as colorize_task_status, watch_task};
use crate::id_resolver::resolve_chapter;
use crate::types::ChapterRef;

/// Get and display a course with its chapters and latest tasks
pub async fn show_course(client: &OrchestratorClient, course_id: Uuid) -> Result<()> {
    let course = client.get_course(course_id).await?;
    let tasks = client.list_course_tasks(course_id).await?;

    print_course_details(&course);

    if !tasks.is_empty() {
        println!("\n{}", "Tasks:".bold());
        for task in tasks.iter().rev().take(5) {
            println!(
                "  {} {}  {:<10} {:>5.1}%  {}",
                "▸".cyan(),
                task.task_id.to_string().dimmed(),
                colorize_task_status(task.status),
                task.progress_percentage,
                task.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            );
        }
    }

    Ok(())
}

/// Regenerate one chapter
pub async fn regenerate(
    client: &OrchestratorClient,
    course_id: Uuid,
    chapter: &str,
    reason: String,
    watch: bool,
) -> Result<()> {
    let course = client.get_course(course_id).await?;
    let chapter_ref = ChapterRef::parse(chapter);
    let chapter = resolve_chapter(&course, &chapter_ref)?;

    let accepted = client
        .regenerate_chapter(course_id, chapter.id, reason)
        .await
        .with_context(|| format!("Failed to regenerate chapter {}", chapter_ref))?;

    println!(
        "{}",
        format!(
            "✓ Regenerating chapter {}: {}",
            chapter.sequence_number, chapter.title
        )
        .green()
        .bold()
    );
    println!("  Task: {}", accepted.task_id.to_string().cyan());

    if watch {
        println!();
        let task = watch_task(client, accepted.task_id).await?;
        println!();
        match task.error {
            None => println!("{}", "✓ Chapter replaced".green().bold()),
            Some(error) => {
                println!("{}", "✗ Regeneration failed; the previous version is kept".red().bold());
                println!("  {}", error.message.red());
            }
        }
    }

    Ok(())
}

/// Download an export package to disk
pub async fn export(
    client: &OrchestratorClient,
    course_id: Uuid,
    format: ExportFormat,
    output: Option<String>,
) -> Result<()> {
    let download = client
        .export_course(course_id, format)
        .await
        .with_context(|| format!("Failed to export course {} as {}", course_id, format))?;

    let path = output
        .or(download.file_name)
        .unwrap_or_else(|| format!("{}.{}", course_id, format.extension()));

    std::fs::write(&path, &download.bytes)
        .with_context(|| format!("Failed to write export to {}", path))?;

    println!(
        "{}",
        format!("✓ Exported {} bytes to {}", download.bytes.len(), path).green()
    );
    Ok(())
}

/// Print detailed course information
fn print_course_details(course: &Course) {
    let summary = CourseSummary::from(course);

    println!("{}", summary.title.bold());
    println!("  ID:       {}", summary.id.to_string().cyan());
    println!("  Subject:  {}", course.subject);
    match &course.audience.description {
        Some(description) => println!("  Audience: {} ({})", summary.level, description),
        None => println!("  Audience: {}", summary.level),
    }
    println!("  Status:   {}", colorize_course_status(summary.status));
    println!("  Chapters: {}", summary.chapter_count);
    println!(
        "  Updated:  {}",
        summary.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(metrics) = &summary.quality_metrics {
        println!("\n{}", "Quality:".bold());
        print_metrics(metrics);
    }

    if !course.chapters.is_empty() {
        println!("\n{}", "Chapters:".bold());
        for chapter in &course.chapters {
            print_chapter_line(chapter);
        }
    }

    if !summary.degraded_chapters.is_empty() {
        let list: Vec<String> = summary
            .degraded_chapters
            .iter()
            .map(|n| n.to_string())
            .collect();
        println!(
            "\n{}",
            format!(
                "⚠ Chapters {} did not meet the quality thresholds; consider regenerating them.",
                list.join(", ")
            )
            .yellow()
        );
    }

    if let Some(quiz) = &course.final_assessment {
        println!(
            "\n{} {} ({} questions)",
            "Final assessment:".bold(),
            quiz.title,
            quiz.questions.len()
        );
    }
}

fn print_chapter_line(chapter: &Chapter) {
    let marker = if chapter.degraded {
        "⚠".yellow()
    } else {
        "✓".green()
    };
    let readability = chapter
        .metrics
        .as_ref()
        .map(|m| format!("readability {:.0}", m.readability_score))
        .unwrap_or_default();

    println!(
        "  {} {:>2}. {}  {}",
        marker,
        chapter.sequence_number,
        chapter.title,
        readability.dimmed()
    );
    println!(
        "        {}  {} subchapters",
        chapter.id.to_string().dimmed(),
        chapter.subchapters.len()
    );
}

fn print_metrics(metrics: &QualityMetrics) {
    for metric in QualityMetric::ALL {
        let value = metrics.value(metric);
        let shown = match metric {
            QualityMetric::Readability => format!("{:.1}", value),
            _ => format!("{:.2}", value),
        };
        println!("  {:<24} {}", metric.to_string(), shown);
    }
}

/// Colorize course status for display
fn colorize_course_status(status: CourseStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        CourseStatus::Draft => status_str.yellow(),
        CourseStatus::Generating => status_str.cyan(),
        CourseStatus::Ready => status_str.green(),
        CourseStatus::Published => status_str.green().bold(),
        CourseStatus::Archived => status_str.dimmed(),
    }
}
