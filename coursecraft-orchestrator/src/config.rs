//! Orchestrator configuration
//!
//! Everything is read from environment variables. Numeric settings fall back
//! to their defaults when unset or unparseable; the provider list is strict.

use crate::provider::HttpProviderConfig;
use crate::service::{GatewayConfig, GenerationConfig, QualityPolicy};
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL; in-memory stores are used when absent
    pub database_url: Option<String>,

    pub bind_addr: String,

    /// Providers in fallback order
    pub providers: Vec<HttpProviderConfig>,

    pub gateway: GatewayConfig,
    pub generation: GenerationConfig,
    pub quality: QualityPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            providers: Vec::new(),
            gateway: GatewayConfig::default(),
            generation: GenerationConfig::default(),
            quality: QualityPolicy::default(),
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - PROVIDERS (required, `name=base_url` pairs separated by commas)
    /// - PROVIDER_API_KEY_<NAME>, PROVIDER_MODEL_<NAME>, PROVIDER_RPM_<NAME> (optional)
    /// - DATABASE_URL (optional)
    /// - ORCHESTRATOR_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - PROVIDER_REQUESTS_PER_MINUTE (optional, default: 60)
    /// - PROVIDER_TIMEOUT_SECS (optional, default: 120)
    /// - PROVIDER_FAILURE_THRESHOLD (optional, default: 3)
    /// - PROVIDER_COOLDOWN_SECS (optional, default: 60)
    /// - CHAPTER_MAX_ATTEMPTS (optional, default: 3)
    /// - MAX_CONCURRENT_CHAPTERS (optional, default: 5)
    /// - STRUCTURE_ATTEMPTS (optional, default: 2)
    /// - PERSISTENCE_ATTEMPTS (optional, default: 2)
    /// - QUALITY_METRIC_FLOOR (optional, default: 0.5)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let provider_spec = lookup("PROVIDERS")
            .ok_or_else(|| anyhow::anyhow!("PROVIDERS environment variable not set"))?;
        let providers = parse_providers(&provider_spec, &lookup)?;

        let number = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());

        let mut gateway = GatewayConfig::default()
            .with_requests_per_minute(
                number("PROVIDER_REQUESTS_PER_MINUTE")
                    .map(|n| n as u32)
                    .unwrap_or(defaults.gateway.requests_per_minute),
            )
            .with_failure_threshold(
                number("PROVIDER_FAILURE_THRESHOLD")
                    .map(|n| n as u32)
                    .unwrap_or(defaults.gateway.failure_threshold),
            )
            .with_cooldown(
                number("PROVIDER_COOLDOWN_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.gateway.cooldown),
            )
            .with_default_timeout(
                number("PROVIDER_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.gateway.default_timeout),
            );
        for provider in &providers {
            if let Some(rpm) = number(&provider_var("PROVIDER_RPM", &provider.id)) {
                gateway = gateway.with_provider_limit(provider.id.clone(), rpm as u32);
            }
        }

        let generation = GenerationConfig {
            max_concurrent_chapters: number("MAX_CONCURRENT_CHAPTERS")
                .map(|n| n as usize)
                .unwrap_or(defaults.generation.max_concurrent_chapters),
            chapter_max_attempts: number("CHAPTER_MAX_ATTEMPTS")
                .map(|n| n as u32)
                .unwrap_or(defaults.generation.chapter_max_attempts),
            structure_attempts: number("STRUCTURE_ATTEMPTS")
                .map(|n| n as u32)
                .unwrap_or(defaults.generation.structure_attempts),
            persistence_attempts: number("PERSISTENCE_ATTEMPTS")
                .map(|n| n as u32)
                .unwrap_or(defaults.generation.persistence_attempts),
            ..defaults.generation
        };

        let quality = match lookup("QUALITY_METRIC_FLOOR").and_then(|s| s.trim().parse::<f64>().ok()) {
            Some(floor) => defaults.quality.with_metric_floor(floor),
            None => defaults.quality,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            bind_addr: lookup("ORCHESTRATOR_BIND_ADDR").unwrap_or(defaults.bind_addr),
            providers,
            gateway,
            generation,
            quality,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("at least one provider must be configured");
        }

        for provider in &self.providers {
            if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://")
            {
                anyhow::bail!(
                    "provider '{}' base URL must start with http:// or https://",
                    provider.id
                );
            }
        }

        if self.gateway.requests_per_minute == 0 {
            anyhow::bail!("PROVIDER_REQUESTS_PER_MINUTE must be greater than 0");
        }

        if self.gateway.default_timeout.as_secs() == 0 {
            anyhow::bail!("PROVIDER_TIMEOUT_SECS must be greater than 0");
        }

        if self.generation.max_concurrent_chapters == 0 {
            anyhow::bail!("MAX_CONCURRENT_CHAPTERS must be greater than 0");
        }

        if self.generation.chapter_max_attempts == 0 {
            anyhow::bail!("CHAPTER_MAX_ATTEMPTS must be greater than 0");
        }

        if !(0.0..1.0).contains(&self.quality.metric_floor) {
            anyhow::bail!("QUALITY_METRIC_FLOOR must be in [0, 1)");
        }

        Ok(())
    }
}

/// Parses `name=base_url,name=base_url` and picks up per-provider settings
fn parse_providers(
    spec: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Vec<HttpProviderConfig>> {
    let mut providers = Vec::new();

    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, url) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid provider entry '{}', expected name=url", entry))?;
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("provider entry '{}' has no name", entry);
        }
        if providers.iter().any(|p: &HttpProviderConfig| p.id == name) {
            anyhow::bail!("provider '{}' is configured twice", name);
        }

        let mut provider = HttpProviderConfig::new(name, url.trim());
        if let Some(key) = lookup(&provider_var("PROVIDER_API_KEY", name)) {
            provider = provider.with_api_key(key);
        }
        if let Some(model) = lookup(&provider_var("PROVIDER_MODEL", name)) {
            provider = provider.with_model(model);
        }
        providers.push(provider);
    }

    Ok(providers)
}

fn provider_var(prefix: &str, provider: &str) -> String {
    let suffix: String = provider
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{}_{}", prefix, suffix)
}
