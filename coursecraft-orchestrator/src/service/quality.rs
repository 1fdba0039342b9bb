//! Quality Gate
//!
//! Scores generated content and decides whether it is good enough for its
//! audience. Scoring is delegated to a [`QualityScorer`]; the gate turns the
//! raw scores into [`QualityMetrics`] (0 for anything the scorer could not
//! compute) and applies audience-specific thresholds.

use coursecraft_core::domain::course::{Audience, BloomLevel, Chapter, ProficiencyLevel, Quiz};
use coursecraft_core::domain::quality::{QualityMetric, QualityMetrics};
use std::collections::HashSet;
use std::sync::Arc;

/// Content handed to a scorer
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub text: &'a str,
    pub learning_objectives: &'a [String],
    pub example_count: usize,
    pub section_count: usize,
    pub quiz: Option<&'a Quiz>,
}

impl<'a> ScoringInput<'a> {
    pub fn from_chapter(chapter: &'a Chapter, text: &'a str) -> Self {
        Self {
            text,
            learning_objectives: &chapter.learning_objectives,
            example_count: chapter.example_count(),
            section_count: chapter.subchapters.len(),
            quiz: chapter.quiz.as_ref(),
        }
    }
}

/// Sub-metrics as produced by a scorer; `None` means "could not compute"
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawScores {
    pub readability: Option<f64>,
    pub pedagogical_alignment: Option<f64>,
    pub objective_coverage: Option<f64>,
    pub content_accuracy: Option<f64>,
    pub bias_detection: Option<f64>,
}

/// Computes raw quality sub-metrics for a piece of content
pub trait QualityScorer: Send + Sync {
    fn score(&self, input: &ScoringInput<'_>, audience: &Audience) -> RawScores;
}

/// Audience-specific acceptance thresholds
#[derive(Debug, Clone)]
pub struct QualityPolicy {
    pub min_readability_beginner: f64,
    pub min_readability_intermediate: f64,
    pub min_readability_advanced: f64,
    pub min_readability_expert: f64,
    /// Pedagogical alignment, accuracy and bias scores must exceed this
    pub metric_floor: f64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_readability_beginner: 70.0,
            min_readability_intermediate: 60.0,
            min_readability_advanced: 50.0,
            min_readability_expert: 40.0,
            metric_floor: 0.5,
        }
    }
}

impl QualityPolicy {
    pub fn with_metric_floor(mut self, floor: f64) -> Self {
        self.metric_floor = floor;
        self
    }

    pub fn min_readability(&self, level: ProficiencyLevel) -> f64 {
        match level {
            ProficiencyLevel::Beginner => self.min_readability_beginner,
            ProficiencyLevel::Intermediate => self.min_readability_intermediate,
            ProficiencyLevel::Advanced => self.min_readability_advanced,
            ProficiencyLevel::Expert => self.min_readability_expert,
        }
    }
}

/// Outcome of gating one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum QualityVerdict {
    Accept,
    /// Failed, but attempts remain
    Regenerate(Vec<QualityMetric>),
    /// Failed on the last allowed attempt
    Reject(Vec<QualityMetric>),
}

pub struct QualityGate {
    scorer: Arc<dyn QualityScorer>,
    policy: QualityPolicy,
}

impl QualityGate {
    pub fn new(scorer: Arc<dyn QualityScorer>, policy: QualityPolicy) -> Self {
        Self { scorer, policy }
    }

    /// Scores content; never fails
    pub fn evaluate(&self, input: &ScoringInput<'_>, audience: &Audience) -> QualityMetrics {
        let raw = self.scorer.score(input, audience);
        QualityMetrics {
            readability_score: raw.readability.unwrap_or(0.0).clamp(0.0, 100.0),
            pedagogical_alignment: raw.pedagogical_alignment.unwrap_or(0.0).clamp(0.0, 1.0),
            objective_coverage: raw.objective_coverage.unwrap_or(0.0).clamp(0.0, 1.0),
            content_accuracy: raw.content_accuracy.unwrap_or(0.0).clamp(0.0, 1.0),
            bias_detection_score: raw.bias_detection.unwrap_or(0.0).clamp(0.0, 1.0),
            generation_timestamp: chrono::Utc::now(),
        }
    }

    pub fn evaluate_chapter(&self, chapter: &Chapter, audience: &Audience) -> QualityMetrics {
        let text = chapter.content_text();
        self.evaluate(&ScoringInput::from_chapter(chapter, &text), audience)
    }

    /// Metrics that miss the audience's thresholds
    pub fn failing_metrics(&self, metrics: &QualityMetrics, audience: &Audience) -> Vec<QualityMetric> {
        let mut failing = Vec::new();
        if metrics.readability_score < self.policy.min_readability(audience.level) {
            failing.push(QualityMetric::Readability);
        }
        if metrics.objective_coverage < 1.0 {
            failing.push(QualityMetric::ObjectiveCoverage);
        }
        for metric in [
            QualityMetric::PedagogicalAlignment,
            QualityMetric::ContentAccuracy,
            QualityMetric::BiasDetection,
        ] {
            if metrics.value(metric) <= self.policy.metric_floor {
                failing.push(metric);
            }
        }
        failing
    }

    /// Pure pass/fail decision
    pub fn passes(&self, metrics: &QualityMetrics, audience: &Audience) -> bool {
        self.failing_metrics(metrics, audience).is_empty()
    }

    pub fn verdict(
        &self,
        metrics: &QualityMetrics,
        audience: &Audience,
        attempt: u32,
        max_attempts: u32,
    ) -> QualityVerdict {
        if self.passes(metrics, audience) {
            return QualityVerdict::Accept;
        }
        let failing = self.failing_metrics(metrics, audience);
        if attempt < max_attempts {
            QualityVerdict::Regenerate(failing)
        } else {
            QualityVerdict::Reject(failing)
        }
    }
}

/// Folds chapter metrics into a course-level snapshot
///
/// Objective coverage is the minimum over chapters; every other metric is a
/// mean weighted by `weight` (chapter word count). A chapter without words
/// (a degraded skeleton) weighs as much as an average chapter, so its zero
/// scores still pull the course down.
pub fn aggregate_metrics(chapters: &[(&QualityMetrics, usize)]) -> Option<QualityMetrics> {
    if chapters.is_empty() {
        return None;
    }

    let sized: Vec<usize> = chapters.iter().map(|(_, w)| *w).filter(|w| *w > 0).collect();
    let floor = if sized.is_empty() {
        1.0
    } else {
        sized.iter().sum::<usize>() as f64 / sized.len() as f64
    };
    let effective = |w: usize| if w == 0 { floor } else { w as f64 };
    let total_weight: f64 = chapters.iter().map(|(_, w)| effective(*w)).sum();
    let weight_of = |w: usize| effective(w) / total_weight;
    let mean = |f: fn(&QualityMetrics) -> f64| -> f64 {
        chapters.iter().map(|(m, w)| f(m) * weight_of(*w)).sum()
    };

    Some(QualityMetrics {
        readability_score: mean(|m| m.readability_score),
        pedagogical_alignment: mean(|m| m.pedagogical_alignment),
        objective_coverage: chapters
            .iter()
            .map(|(m, _)| m.objective_coverage)
            .fold(f64::INFINITY, f64::min),
        content_accuracy: mean(|m| m.content_accuracy),
        bias_detection_score: mean(|m| m.bias_detection_score),
        generation_timestamp: chrono::Utc::now(),
    })
}

// =============================================================================
// Heuristic Scorer
// =============================================================================

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "being", "between", "both", "each", "from", "have",
    "into", "more", "most", "other", "over", "same", "some", "such", "than", "that", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "under", "using",
    "well", "what", "when", "where", "which", "while", "with", "within", "your", "able",
    "understand", "learn", "explain", "describe", "identify", "know", "basic", "basics",
];

const PLACEHOLDER_MARKERS: &[&str] = &[
    "lorem ipsum",
    "as an ai",
    "i cannot",
    "[citation needed]",
    "insert example",
    "todo",
];

const NON_INCLUSIVE_TERMS: &[&str] = &[
    "mankind",
    "manpower",
    "chairman",
    "man-made",
    "blacklist",
    "whitelist",
    "crazy",
    "lame",
];

/// Dependency-free scorer used when no external scorer is configured
///
/// Readability is Flesch reading ease; objective coverage checks that the key
/// terms of each objective appear in the text; pedagogical alignment rewards
/// worked examples, a chapter quiz and a spread of cognitive levels.
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    fn readability(text: &str) -> Option<f64> {
        let words: Vec<&str> = text
            .split_whitespace()
            .filter(|w| w.chars().any(|c| c.is_alphabetic()))
            .collect();
        if words.is_empty() {
            return None;
        }
        let sentences = text
            .split(['.', '!', '?', '\n'])
            .filter(|s| s.chars().any(|c| c.is_alphabetic()))
            .count()
            .max(1);
        let syllables: usize = words.iter().map(|w| count_syllables(w)).sum();

        let words_per_sentence = words.len() as f64 / sentences as f64;
        let syllables_per_word = syllables as f64 / words.len() as f64;
        Some((206.835 - 1.015 * words_per_sentence - 84.6 * syllables_per_word).clamp(0.0, 100.0))
    }

    fn objective_coverage(text: &str, objectives: &[String]) -> Option<f64> {
        if objectives.is_empty() {
            return None;
        }
        let haystack = text.to_lowercase();
        let covered = objectives
            .iter()
            .filter(|objective| {
                let terms = key_terms(objective);
                if terms.is_empty() {
                    return true;
                }
                let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                hits * 2 >= terms.len()
            })
            .count();
        Some(covered as f64 / objectives.len() as f64)
    }

    fn pedagogical_alignment(input: &ScoringInput<'_>) -> Option<f64> {
        if input.text.trim().is_empty() {
            return None;
        }
        let sections = input.section_count.max(1) as f64;
        let examples = (input.example_count as f64 / sections).min(1.0);

        let (quiz, spread) = match input.quiz {
            Some(quiz) if !quiz.questions.is_empty() => {
                let levels: HashSet<BloomLevel> =
                    quiz.questions.iter().filter_map(|q| q.bloom_level).collect();
                (
                    (quiz.questions.len() as f64 / 3.0).min(1.0),
                    (levels.len() as f64 / 3.0).min(1.0),
                )
            }
            _ => (0.0, 0.0),
        };

        Some(0.4 * examples + 0.3 * quiz + 0.3 * spread)
    }

    fn content_accuracy(text: &str) -> Option<f64> {
        if text.trim().is_empty() {
            return None;
        }
        let lower = text.to_lowercase();
        let markers = PLACEHOLDER_MARKERS
            .iter()
            .filter(|m| lower.contains(*m))
            .count();
        Some((0.9 - 0.25 * markers as f64).max(0.0))
    }

    fn bias_detection(text: &str) -> Option<f64> {
        if text.trim().is_empty() {
            return None;
        }
        let lower = text.to_lowercase();
        let hits: usize = NON_INCLUSIVE_TERMS
            .iter()
            .map(|t| lower.matches(t).count())
            .sum();
        Some((1.0 - 0.1 * hits as f64).max(0.0))
    }
}

impl QualityScorer for HeuristicScorer {
    fn score(&self, input: &ScoringInput<'_>, _audience: &Audience) -> RawScores {
        RawScores {
            readability: Self::readability(input.text),
            pedagogical_alignment: Self::pedagogical_alignment(input),
            objective_coverage: Self::objective_coverage(input.text, input.learning_objectives),
            content_accuracy: Self::content_accuracy(input.text),
            bias_detection: Self::bias_detection(input.text),
        }
    }
}

fn key_terms(objective: &str) -> Vec<String> {
    objective
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 4 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Vowel-group syllable estimate, at least one per word
fn count_syllables(word: &str) -> usize {
    let word = word.to_lowercase();
    let mut count = 0;
    let mut prev_vowel = false;
    for c in word.chars().filter(|c| c.is_alphabetic()) {
        let vowel = matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !prev_vowel {
            count += 1;
        }
        prev_vowel = vowel;
    }
    if word.ends_with('e') && !word.ends_with("le") && count > 1 {
        count -= 1;
    }
    count.max(1)
}
