//! Configuration module
//!
//! Handles CLI configuration including orchestrator URL and polling settings.

use coursecraft_client::OrchestratorClient;
use std::time::Duration;

/// Interval between task polls in watch mode
pub const WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,
}

impl Config {
    pub fn client(&self) -> OrchestratorClient {
        OrchestratorClient::new(&self.orchestrator_url)
    }
}
