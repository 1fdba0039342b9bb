//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod course;
mod generate;
mod usage;

use anyhow::Result;
use clap::Subcommand;
use coursecraft_core::domain::course::ProficiencyLevel;
use coursecraft_core::domain::export::ExportFormat;
use uuid::Uuid;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start generating a new course
    Generate {
        #[arg(long)]
        title: String,

        #[arg(long)]
        subject: String,

        /// beginner, intermediate, advanced or expert
        #[arg(long)]
        level: ProficiencyLevel,

        /// Free-form audience description
        #[arg(long)]
        audience: Option<String>,

        /// Difficulty between 1.0 and 5.0 (defaults from the level)
        #[arg(long)]
        difficulty: Option<f64>,

        /// Preferred number of chapters
        #[arg(long)]
        chapters: Option<usize>,

        /// Skip the final course assessment
        #[arg(long)]
        no_final_quiz: bool,

        /// Follow the task until it finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Show a generation task
    Status {
        task_id: Uuid,

        /// Poll until the task finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Show a course and its chapters
    Course { course_id: Uuid },
    /// Regenerate a single chapter
    Regenerate {
        course_id: Uuid,

        /// Chapter ID, ID prefix or position
        chapter: String,

        /// Feedback for the new version
        #[arg(long)]
        reason: String,

        /// Follow the task until it finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Cancel a running task
    Cancel { task_id: Uuid },
    /// Download a ready course as an export package
    Export {
        course_id: Uuid,

        /// json, html, scorm12, scorm2004, xapi, qti or pdf
        format: ExportFormat,

        /// Output file (defaults to the name suggested by the orchestrator)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show provider usage counters
    Usage,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        Commands::Generate {
            title,
            subject,
            level,
            audience,
            difficulty,
            chapters,
            no_final_quiz,
            watch,
        } => {
            let request = generate::GenerateArgs {
                title,
                subject,
                level,
                audience,
                difficulty,
                chapters,
                include_final_assessment: !no_final_quiz,
            };
            generate::generate(&client, request, watch).await
        }
        Commands::Status { task_id, watch } => generate::status(&client, task_id, watch).await,
        Commands::Course { course_id } => course::show_course(&client, course_id).await,
        Commands::Regenerate {
            course_id,
            chapter,
            reason,
            watch,
        } => course::regenerate(&client, course_id, &chapter, reason, watch).await,
        Commands::Cancel { task_id } => generate::cancel(&client, task_id).await,
        Commands::Export {
            course_id,
            format,
            output,
        } => course::export(&client, course_id, format, output).await,
        Commands::Usage => usage::show_usage(&client).await,
    }
}
