//! Provider request and result value objects
//!
//! These are ephemeral: built by the generation pipeline, handed to the
//! provider gateway and dropped once the content has been parsed.

use serde::{Deserialize, Serialize};

use crate::domain::course::Audience;

/// Kind of content a provider is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTaskType {
    Structure,
    ChapterContent,
    Assessment,
}

impl std::fmt::Display for ProviderTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderTaskType::Structure => "structure",
            ProviderTaskType::ChapterContent => "chapter_content",
            ProviderTaskType::Assessment => "assessment",
        };
        write!(f, "{}", s)
    }
}

/// Request handed to the provider gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub task_type: ProviderTaskType,
    pub audience: Audience,
    pub params: PromptParams,
}

/// Parameters a content generator turns into a prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptParams {
    pub course_title: String,
    pub subject: String,
    pub difficulty: f64,
    #[serde(default)]
    pub chapter_title: Option<String>,
    #[serde(default)]
    pub sequence_number: Option<u32>,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub target_complexity: Option<f64>,
    /// Inclusive chapter count bounds for structure requests
    #[serde(default)]
    pub chapter_count: Option<(usize, usize)>,
    /// Titles of all chapters, for course-level assessments
    #[serde(default)]
    pub chapter_titles: Vec<String>,
    #[serde(default)]
    pub adjustments: Vec<PromptAdjustment>,
    #[serde(default)]
    pub regeneration_reason: Option<String>,
    /// 1-based attempt number within the chapter pipeline
    #[serde(default)]
    pub attempt: u32,
}

/// Relaxation applied to a retried request after a quality rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptAdjustment {
    SimplifyVocabulary,
    CoverAllObjectives,
    AddExamples,
    VerifyFacts,
    NeutralLanguage,
}

/// Token accounting reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub estimated_cost_usd: Option<f64>,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Content returned by the gateway, tagged with the provider that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub content: String,
    pub provider_id: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}
