//! Quality metric types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quality snapshot of a chapter or a whole course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Reading ease on a 0-100 scale (higher is easier)
    pub readability_score: f64,
    /// 0.0-1.0
    pub pedagogical_alignment: f64,
    /// Share of learning objectives covered, 0.0-1.0
    pub objective_coverage: f64,
    /// 0.0-1.0
    pub content_accuracy: f64,
    /// 0.0-1.0, higher means less biased language
    pub bias_detection_score: f64,
    pub generation_timestamp: DateTime<Utc>,
}

impl QualityMetrics {
    /// All sub-metrics at zero, used when content could not be scored at all
    pub fn zero() -> Self {
        Self {
            readability_score: 0.0,
            pedagogical_alignment: 0.0,
            objective_coverage: 0.0,
            content_accuracy: 0.0,
            bias_detection_score: 0.0,
            generation_timestamp: Utc::now(),
        }
    }

    pub fn value(&self, metric: QualityMetric) -> f64 {
        match metric {
            QualityMetric::Readability => self.readability_score,
            QualityMetric::PedagogicalAlignment => self.pedagogical_alignment,
            QualityMetric::ObjectiveCoverage => self.objective_coverage,
            QualityMetric::ContentAccuracy => self.content_accuracy,
            QualityMetric::BiasDetection => self.bias_detection_score,
        }
    }
}

/// Names a single quality sub-metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMetric {
    Readability,
    PedagogicalAlignment,
    ObjectiveCoverage,
    ContentAccuracy,
    BiasDetection,
}

impl QualityMetric {
    pub const ALL: [QualityMetric; 5] = [
        QualityMetric::Readability,
        QualityMetric::PedagogicalAlignment,
        QualityMetric::ObjectiveCoverage,
        QualityMetric::ContentAccuracy,
        QualityMetric::BiasDetection,
    ];
}

impl std::fmt::Display for QualityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QualityMetric::Readability => "readability",
            QualityMetric::PedagogicalAlignment => "pedagogical_alignment",
            QualityMetric::ObjectiveCoverage => "objective_coverage",
            QualityMetric::ContentAccuracy => "content_accuracy",
            QualityMetric::BiasDetection => "bias_detection",
        };
        write!(f, "{}", s)
    }
}
