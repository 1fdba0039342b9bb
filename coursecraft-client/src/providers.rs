//! Provider and health endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use coursecraft_core::dto::provider::ProviderUsage;
use serde_json::Value;

impl OrchestratorClient {
    /// Per-provider request, token and failure counters
    pub async fn provider_usage(&self) -> Result<Vec<ProviderUsage>> {
        let response = self
            .client
            .get(self.url("/api/providers/usage"))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Liveness check; returns the raw health document
    pub async fn health(&self) -> Result<Value> {
        let response = self.client.get(self.url("/health")).send().await?;

        self.handle_response(response).await
    }
}
