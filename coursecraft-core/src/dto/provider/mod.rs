//! Provider DTOs

use serde::{Deserialize, Serialize};

/// Usage counters of one configured provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub provider_id: String,
    pub requests: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_latency_ms: u64,
    pub consecutive_failures: u32,
    /// Provider is skipped until its cool-down window ends
    pub cooling_down: bool,
}
