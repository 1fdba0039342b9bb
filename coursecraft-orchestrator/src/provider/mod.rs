//! Content Providers
//!
//! Abstraction over external AI content-generation backends. The provider
//! gateway wraps a list of these and adds rate limiting, timeouts and
//! fallback; a provider itself only knows how to answer one request.

pub mod http;

use async_trait::async_trait;
use coursecraft_core::domain::provider::{ProviderRequest, TokenUsage};
use coursecraft_core::domain::task::TaskErrorKind;
use thiserror::Error;

pub use http::{HttpContentGenerator, HttpProviderConfig};

/// Errors a provider (or the gateway on its behalf) can report
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out after {0} ms")]
    Timeout(u64),

    #[error("provider rate limited: {0}")]
    RateLimited(String),

    #[error("provider returned malformed content: {0}")]
    MalformedContent(String),
}

impl ProviderError {
    /// Whether the gateway should try the next provider after this error
    pub fn triggers_fallback(&self) -> bool {
        !matches!(self, ProviderError::MalformedContent(_))
    }

    /// How a task that failed with this error is classified
    pub fn task_error_kind(&self) -> TaskErrorKind {
        match self {
            ProviderError::Unavailable(_) => TaskErrorKind::ProviderUnavailable,
            ProviderError::Timeout(_) => TaskErrorKind::ProviderTimeout,
            ProviderError::RateLimited(_) => TaskErrorKind::ProviderRateLimited,
            ProviderError::MalformedContent(_) => TaskErrorKind::InvalidStructure,
        }
    }
}

/// Raw answer of a content generator
#[derive(Debug, Clone, Default)]
pub struct GeneratedContent {
    pub content: String,
    pub usage: TokenUsage,
}

impl GeneratedContent {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
        }
    }
}

/// A single AI content-generation backend
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Stable identifier used for rate limiting, logging and usage reporting
    fn id(&self) -> &str;

    /// Produces raw content for a request
    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedContent, ProviderError>;
}
