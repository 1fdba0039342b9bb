//! Provider Gateway
//!
//! Wraps the configured content generators behind a single `generate` call.
//! Each provider gets its own token-bucket rate limiter and a consecutive
//! failure counter; a provider that fails `failure_threshold` times in a row
//! is skipped for a cool-down window. Rate-limit, timeout and availability
//! failures fall through to the next provider in configuration order.
//!
//! One gateway is built per process and shared by every pipeline, so its
//! limiters are the global bottleneck for provider traffic.

use coursecraft_core::domain::provider::{ProviderRequest, ProviderResult};
use coursecraft_core::dto::provider::ProviderUsage;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::provider::{ContentGenerator, ProviderError};

/// Gateway tuning knobs
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Default requests per minute for every provider
    pub requests_per_minute: u32,
    /// Per-provider overrides of `requests_per_minute`
    pub provider_limits: HashMap<String, u32>,
    /// Consecutive failures before a provider is put in cool-down
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Timeout used by callers that do not pick their own
    pub default_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            provider_limits: HashMap::new(),
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            default_timeout: Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    pub fn with_provider_limit(mut self, provider_id: impl Into<String>, rpm: u32) -> Self {
        self.provider_limits.insert(provider_id.into(), rpm);
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[derive(Debug, Default)]
struct ProviderHealth {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    requests: u64,
    failures: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    total_latency_ms: u64,
}

struct ProviderSlot {
    generator: Arc<dyn ContentGenerator>,
    limiter: DefaultDirectRateLimiter,
    health: Mutex<ProviderHealth>,
}

impl ProviderSlot {
    fn health(&self) -> MutexGuard<'_, ProviderHealth> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cooling_down(&self, now: Instant) -> bool {
        let mut health = self.health();
        match health.cooldown_until {
            Some(until) if now < until => true,
            Some(_) => {
                // Window elapsed: give the provider a fresh start
                health.cooldown_until = None;
                health.consecutive_failures = 0;
                false
            }
            None => false,
        }
    }

    fn record_failure(&self, threshold: u32, cooldown: Duration) {
        let mut health = self.health();
        health.requests += 1;
        health.failures += 1;
        health.consecutive_failures += 1;
        if health.consecutive_failures >= threshold && health.cooldown_until.is_none() {
            health.cooldown_until = Some(Instant::now() + cooldown);
            warn!(
                "Provider {} failed {} times in a row, cooling down for {:?}",
                self.generator.id(),
                health.consecutive_failures,
                cooldown
            );
        }
    }

    fn record_success(&self, result: &ProviderResult) {
        let mut health = self.health();
        health.requests += 1;
        health.consecutive_failures = 0;
        health.prompt_tokens += result.usage.prompt_tokens;
        health.completion_tokens += result.usage.completion_tokens;
        health.total_latency_ms += result.latency_ms;
    }
}

/// Shared entry point to all content providers
pub struct ProviderGateway {
    providers: Vec<ProviderSlot>,
    config: GatewayConfig,
}

impl ProviderGateway {
    /// Builds a gateway over providers listed in priority order
    pub fn new(generators: Vec<Arc<dyn ContentGenerator>>, config: GatewayConfig) -> Self {
        let providers = generators
            .into_iter()
            .map(|generator| {
                let rpm = config
                    .provider_limits
                    .get(generator.id())
                    .copied()
                    .unwrap_or(config.requests_per_minute);
                let quota = Quota::per_minute(NonZeroU32::new(rpm).unwrap_or(NonZeroU32::MIN));
                ProviderSlot {
                    generator,
                    limiter: RateLimiter::direct(quota),
                    health: Mutex::new(ProviderHealth::default()),
                }
            })
            .collect();

        Self { providers, config }
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.generator.id().to_string())
            .collect()
    }

    /// Generates content, falling back through the provider list
    ///
    /// Every provider is tried at most once per call. `timeout` bounds each
    /// attempt, including the wait for a rate-limit token.
    pub async fn generate(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResult, ProviderError> {
        if self.providers.is_empty() {
            return Err(ProviderError::Unavailable(
                "no providers configured".to_string(),
            ));
        }

        let mut last_error = None;

        for slot in &self.providers {
            if slot.is_cooling_down(Instant::now()) {
                debug!("Skipping provider {} (cooling down)", slot.generator.id());
                continue;
            }

            match self.attempt(slot, request, timeout).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(
                        "Provider {} failed {} request: {}",
                        slot.generator.id(),
                        request.task_type,
                        e
                    );
                    let fallback = e.triggers_fallback();
                    last_error = Some(e);
                    if !fallback {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::Unavailable("all providers are cooling down".to_string())
        }))
    }

    async fn attempt(
        &self,
        slot: &ProviderSlot,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResult, ProviderError> {
        let provider_id = slot.generator.id();
        let deadline = Instant::now() + timeout;

        if tokio::time::timeout_at(deadline, slot.limiter.until_ready())
            .await
            .is_err()
        {
            return Err(ProviderError::RateLimited(format!(
                "no request token for {} within {} ms",
                provider_id,
                timeout.as_millis()
            )));
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout_at(deadline, slot.generator.generate(request)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => {
                slot.record_failure(self.config.failure_threshold, self.config.cooldown);
                Err(ProviderError::Timeout(timeout.as_millis() as u64))
            }
            Ok(Err(e)) => {
                if e.triggers_fallback() {
                    slot.record_failure(self.config.failure_threshold, self.config.cooldown);
                } else {
                    slot.health().requests += 1;
                }
                Err(e)
            }
            Ok(Ok(generated)) => {
                let result = ProviderResult {
                    content: generated.content,
                    provider_id: provider_id.to_string(),
                    usage: generated.usage,
                    latency_ms,
                };
                slot.record_success(&result);
                info!(
                    target: "coursecraft::usage",
                    provider = provider_id,
                    task_type = %request.task_type,
                    prompt_tokens = result.usage.prompt_tokens,
                    completion_tokens = result.usage.completion_tokens,
                    latency_ms,
                    "provider call completed"
                );
                Ok(result)
            }
        }
    }

    /// Snapshot of per-provider counters
    pub fn usage(&self) -> Vec<ProviderUsage> {
        let now = Instant::now();
        self.providers
            .iter()
            .map(|slot| {
                let health = slot.health();
                ProviderUsage {
                    provider_id: slot.generator.id().to_string(),
                    requests: health.requests,
                    failures: health.failures,
                    prompt_tokens: health.prompt_tokens,
                    completion_tokens: health.completion_tokens,
                    total_latency_ms: health.total_latency_ms,
                    consecutive_failures: health.consecutive_failures,
                    cooling_down: health.cooldown_until.is_some_and(|until| now < until),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::GeneratedContent;
    use async_trait::async_trait;
    use coursecraft_core::domain::course::{Audience, ProficiencyLevel};
    use coursecraft_core::domain::provider::{PromptParams, ProviderTaskType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Succeed,
        Fail(ProviderError),
        Hang,
    }

    struct StubGenerator {
        id: String,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl StubGenerator {
        fn new(id: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentGenerator for StubGenerator {
        fn id(&self) -> &str {
            &self.id
        }

        async fn generate(
            &self,
            _request: &ProviderRequest,
        ) -> Result<GeneratedContent, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => Ok(GeneratedContent::new(format!("from {}", self.id))),
                Behavior::Fail(e) => Err(e.clone()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(GeneratedContent::new("too late"))
                }
            }
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            task_type: ProviderTaskType::Structure,
            audience: Audience::new(ProficiencyLevel::Beginner),
            params: PromptParams::default(),
        }
    }

    fn gateway(generators: Vec<Arc<StubGenerator>>, config: GatewayConfig) -> ProviderGateway {
        let generators = generators
            .into_iter()
            .map(|g| g as Arc<dyn ContentGenerator>)
            .collect();
        ProviderGateway::new(generators, config)
    }

    #[tokio::test]
    async fn test_falls_back_when_primary_is_rate_limited() {
        let primary = StubGenerator::new(
            "primary",
            Behavior::Fail(ProviderError::RateLimited("429".to_string())),
        );
        let secondary = StubGenerator::new("secondary", Behavior::Succeed);
        let gateway = gateway(
            vec![primary.clone(), secondary.clone()],
            GatewayConfig::default(),
        );

        let result = gateway
            .generate(&request(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.provider_id, "secondary");
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_times_out() {
        let slow = StubGenerator::new("slow", Behavior::Hang);
        let gateway = gateway(vec![slow], GatewayConfig::default());

        let err = gateway
            .generate(&request(), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert_eq!(err, ProviderError::Timeout(200));
        assert_eq!(gateway.usage()[0].failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_cools_down_after_consecutive_failures() {
        let broken = StubGenerator::new(
            "broken",
            Behavior::Fail(ProviderError::Unavailable("503".to_string())),
        );
        let config = GatewayConfig::default()
            .with_failure_threshold(3)
            .with_cooldown(Duration::from_secs(60));
        let gateway = gateway(vec![broken.clone()], config);

        for _ in 0..3 {
            let err = gateway
                .generate(&request(), Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(err, ProviderError::Unavailable(_)));
        }
        assert!(gateway.usage()[0].cooling_down);

        // Skipped entirely while cooling down
        gateway
            .generate(&request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(broken.calls(), 3);

        tokio::time::advance(Duration::from_secs(61)).await;
        gateway
            .generate(&request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(broken.calls(), 4);
        assert!(!gateway.usage()[0].cooling_down);
    }

    #[tokio::test]
    async fn test_rate_limit_wait_is_bounded_by_timeout() {
        let ok = StubGenerator::new("ok", Behavior::Succeed);
        let gateway = gateway(
            vec![ok.clone()],
            GatewayConfig::default().with_requests_per_minute(1),
        );

        gateway
            .generate(&request(), Duration::from_millis(50))
            .await
            .unwrap();
        let err = gateway
            .generate(&request(), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::RateLimited(_)));
        assert_eq!(ok.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_content_does_not_fall_back() {
        let primary = StubGenerator::new(
            "primary",
            Behavior::Fail(ProviderError::MalformedContent("not json".to_string())),
        );
        let secondary = StubGenerator::new("secondary", Behavior::Succeed);
        let gateway = gateway(
            vec![primary, secondary.clone()],
            GatewayConfig::default(),
        );

        let err = gateway
            .generate(&request(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::MalformedContent(_)));
        assert_eq!(secondary.calls(), 0);
        assert_eq!(gateway.usage()[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_no_providers_is_unavailable() {
        let gateway = ProviderGateway::new(vec![], GatewayConfig::default());
        let err = gateway
            .generate(&request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
