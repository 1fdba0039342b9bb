//! Generation command handlers
//!
//! Starting course generation and following its task.

use anyhow::{Context, Result};
use colored::*;
use coursecraft_client::OrchestratorClient;
use coursecraft_core::domain::course::{Audience, ProficiencyLevel};
use coursecraft_core::domain::task::{GenerationPhase, GenerationTask, TaskScope, TaskStatus};
use coursecraft_core::dto::generation::StartGeneration;
use uuid::Uuid;

use crate::config::WATCH_INTERVAL;

/// Parsed `generate` arguments
pub struct GenerateArgs {
    pub title: String,
    pub subject: String,
    pub level: ProficiencyLevel,
    pub audience: Option<String>,
    pub difficulty: Option<f64>,
    pub chapters: Option<usize>,
    pub include_final_assessment: bool,
}

impl GenerateArgs {
    fn into_request(self) -> StartGeneration {
        let mut audience = Audience::new(self.level);
        if let Some(description) = self.audience {
            audience = audience.with_description(description);
        }
        StartGeneration {
            title: self.title,
            subject: self.subject,
            difficulty: self.difficulty.unwrap_or_else(|| default_difficulty(self.level)),
            audience,
            chapter_count: self.chapters,
            include_final_assessment: self.include_final_assessment,
        }
    }
}

fn default_difficulty(level: ProficiencyLevel) -> f64 {
    match level {
        ProficiencyLevel::Beginner => 1.5,
        ProficiencyLevel::Intermediate => 2.5,
        ProficiencyLevel::Advanced => 3.5,
        ProficiencyLevel::Expert => 4.5,
    }
}

/// Submit a generation request
pub async fn generate(client: &OrchestratorClient, args: GenerateArgs, watch: bool) -> Result<()> {
    let request = args.into_request();
    let accepted = client
        .start_generation(request)
        .await
        .context("Failed to start course generation")?;

    println!("{}", "✓ Generation started".green().bold());
    println!("  Task:   {}", accepted.task_id.to_string().cyan());
    println!("  Course: {}", accepted.course_id.to_string().cyan());

    if watch {
        println!();
        let task = watch_task(client, accepted.task_id).await?;
        print_outcome(&task);
    } else {
        println!();
        println!(
            "{}",
            format!("Follow it with: coursecraft status {} --watch", accepted.task_id).dimmed()
        );
    }

    Ok(())
}

/// Show a task, optionally polling until it finishes
pub async fn status(client: &OrchestratorClient, task_id: Uuid, watch: bool) -> Result<()> {
    if watch {
        let task = watch_task(client, task_id).await?;
        print_outcome(&task);
        return Ok(());
    }

    let task = client.get_task(task_id).await?;
    print_task_details(&task);
    Ok(())
}

/// Request cancellation of a task
pub async fn cancel(client: &OrchestratorClient, task_id: Uuid) -> Result<()> {
    let task = client.cancel_task(task_id).await?;

    if task.status.is_terminal() {
        println!("{}", format!("✓ Task {} cancelled", task_id).green());
    } else {
        println!(
            "{}",
            format!("✓ Cancellation requested for task {}", task_id).green()
        );
        println!(
            "{}",
            "  The run stops at its next checkpoint; chapters already saved are kept.".dimmed()
        );
    }
    Ok(())
}

/// Poll a task every [`WATCH_INTERVAL`] until it is terminal
///
/// A progress line is printed whenever the phase or percentage changes.
pub async fn watch_task(client: &OrchestratorClient, task_id: Uuid) -> Result<GenerationTask> {
    let mut last: Option<(Option<GenerationPhase>, i64)> = None;

    loop {
        let task = client.get_task(task_id).await?;
        let snapshot = (task.phase, task.progress_percentage.round() as i64);

        if last != Some(snapshot) {
            print_progress_line(&task);
            last = Some(snapshot);
        }

        if task.status.is_terminal() {
            return Ok(task);
        }

        tokio::time::sleep(WATCH_INTERVAL).await;
    }
}

fn print_progress_line(task: &GenerationTask) {
    let phase = task
        .phase
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} {} {:>5.1}%  {}",
        "▸".cyan(),
        progress_bar(task.progress_percentage),
        task.progress_percentage,
        phase.dimmed()
    );
}

fn progress_bar(percentage: f64) -> String {
    const WIDTH: usize = 30;
    let filled = ((percentage.clamp(0.0, 100.0) / 100.0) * WIDTH as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), " ".repeat(WIDTH - filled))
}

fn print_outcome(task: &GenerationTask) {
    println!();
    match task.status {
        TaskStatus::Completed => {
            println!("{}", "✓ Generation completed".green().bold());
            println!(
                "{}",
                format!("  View it with: coursecraft course {}", task.course_id).dimmed()
            );
        }
        _ => {
            println!("{}", "✗ Generation failed".red().bold());
            if let Some(error) = &task.error {
                println!("  {}", error.message.red());
            }
        }
    }
}

/// Print detailed task information
pub fn print_task_details(task: &GenerationTask) {
    println!("{}", "Task Details:".bold());
    println!("  ID:       {}", task.task_id.to_string().cyan());
    println!("  Course:   {}", task.course_id.to_string().dimmed());
    match task.scope {
        TaskScope::Course => println!("  Scope:    course"),
        TaskScope::Chapter { chapter_id } => {
            println!("  Scope:    chapter {}", chapter_id.to_string().dimmed())
        }
    }
    println!("  Status:   {}", colorize_status(task.status));
    if let Some(phase) = task.phase {
        println!("  Phase:    {}", phase);
    }
    println!(
        "  Progress: {} {:.1}%",
        progress_bar(task.progress_percentage),
        task.progress_percentage
    );
    println!(
        "  Created:  {}",
        task.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Updated:  {}",
        task.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(error) = &task.error {
        println!("\n{}", "Error:".bold());
        println!("  Kind:    {}", error.kind.to_string().red());
        println!("  Message: {}", error.message.red());
        if let Some(chapter_id) = error.chapter_id {
            println!("  Chapter: {}", chapter_id);
        }
        if error.kind.is_retryable() {
            println!("{}", "  Retrying later may succeed.".dimmed());
        }
    }
}

/// Colorize task status for display
pub fn colorize_status(status: TaskStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        TaskStatus::Pending => status_str.yellow(),
        TaskStatus::InProgress => status_str.cyan(),
        TaskStatus::Completed => status_str.green(),
        TaskStatus::Failed => status_str.red(),
    }
}
