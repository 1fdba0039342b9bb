//! Coursecraft Orchestrator
//!
//! HTTP service that generates courses with external AI providers.
//!
//! Architecture:
//! - Providers: OpenAI-compatible content generators
//! - Services: provider gateway, quality gate, chapter pipeline, course
//!   orchestrator and export assembler
//! - Repositories: PostgreSQL or in-memory storage of courses and tasks
//! - API: axum routes over the services

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod provider;
pub mod repository;
pub mod service;

#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::provider::{ContentGenerator, HttpContentGenerator};
use crate::repository::{
    CoursePersistence, GenerationTaskStore, InMemoryCoursePersistence, InMemoryTaskStore,
    PgCourseRepository, PgTaskStore,
};
use crate::service::{
    ChapterPipeline, CourseOrchestrator, ExportAssembler, HeuristicScorer, MetricEscalation,
    ProviderGateway, QualityGate,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursecraft_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Coursecraft Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;

    // Storage
    let (persistence, tasks): (Arc<dyn CoursePersistence>, Arc<dyn GenerationTaskStore>) =
        match &config.database_url {
            Some(database_url) => {
                info!("Connecting to database...");
                let pool = db::create_pool(database_url)
                    .await
                    .context("Failed to create database pool")?;
                db::run_migrations(&pool)
                    .await
                    .context("Failed to run database migrations")?;
                (
                    Arc::new(PgCourseRepository::new(pool.clone())),
                    Arc::new(PgTaskStore::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set, courses and tasks are kept in memory");
                (
                    Arc::new(InMemoryCoursePersistence::new()),
                    Arc::new(InMemoryTaskStore::new()),
                )
            }
        };

    // Providers
    let generators: Vec<Arc<dyn ContentGenerator>> = config
        .providers
        .iter()
        .cloned()
        .map(|p| Arc::new(HttpContentGenerator::new(p)) as Arc<dyn ContentGenerator>)
        .collect();
    let gateway = Arc::new(ProviderGateway::new(generators, config.gateway.clone()));
    info!("Providers (in fallback order): {:?}", gateway.provider_ids());

    // Generation
    let gate = Arc::new(QualityGate::new(
        Arc::new(HeuristicScorer::new()),
        config.quality.clone(),
    ));
    let pipeline = Arc::new(ChapterPipeline::new(
        Arc::clone(&gateway),
        gate,
        Arc::new(MetricEscalation),
        config.generation.chapter_max_attempts,
    ));
    let orchestrator = CourseOrchestrator::new(
        Arc::clone(&persistence),
        tasks,
        gateway,
        pipeline,
        config.generation.clone(),
    );
    let exporter = Arc::new(ExportAssembler::new(persistence));

    // Build router with all API endpoints
    let app = api::create_router(api::AppState {
        orchestrator,
        exporter,
    });

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
