//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP API, the content providers and the
//! repositories.

pub mod chapter;
pub mod content;
pub mod export;
pub mod gateway;
pub mod orchestrator;
pub mod quality;

pub use chapter::{ChapterPipeline, MetricEscalation};
pub use export::ExportAssembler;
pub use gateway::{GatewayConfig, ProviderGateway};
pub use orchestrator::{CourseOrchestrator, GenerationConfig, GenerationError};
pub use quality::{HeuristicScorer, QualityGate, QualityPolicy};
