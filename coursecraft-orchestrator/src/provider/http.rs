//! HTTP content generator
//!
//! Talks to any OpenAI-compatible `chat/completions` endpoint. The request
//! parameters are sent as a JSON user message; the model is instructed to
//! answer with a JSON document matching the task type.

use async_trait::async_trait;
use coursecraft_core::domain::provider::{
    PromptAdjustment, ProviderRequest, ProviderTaskType, TokenUsage,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ContentGenerator, GeneratedContent, ProviderError};

/// Connection settings for one HTTP provider
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Identifier used in logs and usage reports (e.g. "openai")
    pub id: String,
    /// Base URL up to and including the API version, e.g. "https://api.openai.com/v1"
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl HttpProviderConfig {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// OpenAI-compatible chat completion provider
pub struct HttpContentGenerator {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpContentGenerator {
    pub fn new(config: HttpProviderConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn build_body(&self, request: &ProviderRequest) -> Result<ChatRequest, ProviderError> {
        let params = serde_json::to_string(&serde_json::json!({
            "audience": request.audience,
            "params": request.params,
        }))
        .map_err(|e| ProviderError::MalformedContent(e.to_string()))?;

        let mut system = instructions(request.task_type).to_string();
        for adjustment in &request.params.adjustments {
            system.push(' ');
            system.push_str(adjustment_hint(*adjustment));
        }

        Ok(ChatRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: params,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
        })
    }
}

#[async_trait]
impl ContentGenerator for HttpContentGenerator {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedContent, ProviderError> {
        let body = self.build_body(request)?;
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!(
            "Sending {} request to provider {} ({})",
            request.task_type, self.config.id, self.config.model
        );

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited(format!(
                "{} answered 429",
                self.config.id
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!(
                "{} answered {}: {}",
                self.config.id, status, text
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedContent(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::MalformedContent("no choices in response".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                estimated_cost_usd: None,
            })
            .unwrap_or_default();

        Ok(GeneratedContent { content, usage })
    }
}

fn instructions(task_type: ProviderTaskType) -> &'static str {
    match task_type {
        ProviderTaskType::Structure => {
            "You design course outlines. Answer with JSON: {\"chapters\": [{\"title\": string, \
             \"summary\": string, \"learning_objectives\": [string], \"complexity\": number}]}. \
             The number of chapters must lie within params.chapter_count."
        }
        ProviderTaskType::ChapterContent => {
            "You write one course chapter. Answer with JSON: {\"summary\": string, \
             \"subchapters\": [{\"title\": string, \"content\": string, \"examples\": [string], \
             \"key_points\": [string], \"estimated_minutes\": number}], \
             \"flashcards\": [{\"front\": string, \"back\": string}], \
             \"quiz\": {\"title\": string, \"questions\": [{\"prompt\": string, \
             \"question_type\": \"multiple_choice\"|\"true_false\"|\"short_answer\", \
             \"options\": [string], \"answer\": string, \"explanation\": string, \
             \"bloom_level\": string}]}}. Cover every learning objective."
        }
        ProviderTaskType::Assessment => {
            "You write a final course assessment. Answer with JSON: {\"title\": string, \
             \"questions\": [{\"prompt\": string, \"question_type\": string, \
             \"options\": [string], \"answer\": string, \"explanation\": string, \
             \"bloom_level\": string}]} spanning every chapter in params.chapter_titles."
        }
    }
}

fn adjustment_hint(adjustment: PromptAdjustment) -> &'static str {
    match adjustment {
        PromptAdjustment::SimplifyVocabulary => {
            "Use short sentences and everyday vocabulary suited to the audience."
        }
        PromptAdjustment::CoverAllObjectives => {
            "Explicitly address each learning objective by name."
        }
        PromptAdjustment::AddExamples => "Give at least one worked example per subchapter.",
        PromptAdjustment::VerifyFacts => "Only state facts you are certain of.",
        PromptAdjustment::NeutralLanguage => "Use inclusive, neutral language.",
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
