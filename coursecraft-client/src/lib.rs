//! Coursecraft HTTP Client
//!
//! A simple, type-safe HTTP client for the Coursecraft orchestrator API.
//!
//! # Example
//!
//! ```no_run
//! use coursecraft_client::OrchestratorClient;
//! use coursecraft_core::domain::course::{Audience, ProficiencyLevel};
//! use coursecraft_core::dto::generation::StartGeneration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let accepted = client.start_generation(StartGeneration {
//!         title: "Intro to Rust".to_string(),
//!         subject: "Programming".to_string(),
//!         audience: Audience::new(ProficiencyLevel::Beginner),
//!         difficulty: 1.5,
//!         chapter_count: None,
//!         include_final_assessment: true,
//!     }).await?;
//!
//!     let task = client.get_task(accepted.task_id).await?;
//!     println!("Task {} is {}", task.task_id, task.status);
//!     Ok(())
//! }
//! ```

pub mod error;
mod courses;
mod generation;
mod providers;

// Re-export commonly used types
pub use courses::ExportDownload;
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Coursecraft orchestrator API
///
/// Methods are grouped by area:
/// - Generation (start, poll, cancel, regenerate a chapter)
/// - Courses (preview, task history, export)
/// - Providers and health
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use coursecraft_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Turn a non-success status into an [`ClientError::ApiError`]
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::debug!("Orchestrator returned {}: {}", status, error_text);
        Err(ClientError::api_error(status.as_u16(), error_text))
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        self.check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
