//! Cascade components
//!
//! The pieces the engine wires together for every analysis: the registry of
//! detector collaborators, the pre-filter, the staged orchestrator, score
//! fusion, the threshold ladder and the explanation builder.

pub mod cascade;
pub mod explanation;
pub mod prefilter;
pub mod registry;
pub mod score_aggregator;
pub mod verdict_classifier;


use crate::context::EmailContext;
use crate::error::DetectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Free-form detector findings
pub type Findings = Map<String, Value>;

/// Cascade stage a detector belongs to, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Stage A: traditional scanners, run in parallel
    Traditional,
    /// Stage B: pattern / signature matching
    Pattern,
    /// Stage C: feature-based classifier
    Feature,
    /// Stage D: heavy deep classifier
    Deep,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Traditional, Tier::Pattern, Tier::Feature, Tier::Deep];

    pub fn stage(&self) -> char {
        match self {
            Tier::Traditional => 'A',
            Tier::Pattern => 'B',
            Tier::Feature => 'C',
            Tier::Deep => 'D',
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Traditional => "traditional",
            Tier::Pattern => "pattern",
            Tier::Feature => "feature",
            Tier::Deep => "deep",
        };
        write!(f, "{} (stage {})", name, self.stage())
    }
}

/// What a detector collaborator reports for one email.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOutput {
    pub detected: bool,
    pub score: f64,
    pub confidence: f64,
    pub findings: Findings,
    pub error: Option<String>,
}

impl DetectorOutput {
    pub fn clean(confidence: f64) -> Self {
        Self {
            confidence,
            ..Default::default()
        }
    }

    pub fn detected(score: f64, confidence: f64) -> Self {
        Self {
            detected: true,
            score,
            confidence,
            ..Default::default()
        }
    }

    pub fn with_finding(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.findings.insert(key.to_string(), value.into());
        self
    }

    pub fn with_category(self, category: &str) -> Self {
        self.with_finding("categories", vec![category.to_string()])
    }

    pub fn with_indicators(self, indicators: Vec<String>) -> Self {
        self.with_finding("indicators", indicators)
    }
}

/// Capability contract for every detection layer.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn evaluate(&self, email: &EmailContext) -> Result<DetectorOutput, DetectorError>;

    /// Short description used when listing layers
    fn describe(&self) -> String {
        "external collaborator".to_string()
    }
}

/// Outcome of one detector within one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionLayerResult {
    pub layer_name: String,
    pub tier: Tier,
    pub enabled: bool,
    pub executed: bool,
    pub duration_ms: f64,
    pub detected: bool,
    pub score: f64,
    pub confidence: f64,
    pub findings: Findings,
    pub error: Option<String>,
}

impl DetectionLayerResult {
    pub fn from_output(name: &str, tier: Tier, output: DetectorOutput, duration: Duration) -> Self {
        // A collaborator that reports its own error is treated like a failed call
        if let Some(error) = output.error {
            return Self::failed(name, tier, error, duration);
        }

        Self {
            layer_name: name.to_string(),
            tier,
            enabled: true,
            executed: true,
            duration_ms: duration.as_secs_f64() * 1000.0,
            detected: output.detected,
            score: unit(output.score),
            confidence: unit(output.confidence),
            findings: output.findings,
            error: None,
        }
    }

    pub fn failed(name: &str, tier: Tier, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            layer_name: name.to_string(),
            tier,
            enabled: true,
            executed: false,
            duration_ms: duration.as_secs_f64() * 1000.0,
            detected: false,
            score: 0.0,
            confidence: 0.0,
            findings: Findings::new(),
            error: Some(error.into()),
        }
    }

    /// Placeholder for an enabled layer whose stage never ran.
    pub fn skipped(name: &str, tier: Tier) -> Self {
        Self {
            layer_name: name.to_string(),
            tier,
            enabled: true,
            executed: false,
            duration_ms: 0.0,
            detected: false,
            score: 0.0,
            confidence: 0.0,
            findings: Findings::new(),
            error: None,
        }
    }

    /// Executed without error, so eligible for fusion
    pub fn is_usable(&self) -> bool {
        self.executed && self.error.is_none()
    }

    /// Categories reported under `categories` or `category`.
    pub fn categories(&self) -> Vec<String> {
        let mut categories = string_list(self.findings.get("categories"));
        if let Some(Value::String(category)) = self.findings.get("category") {
            categories.push(category.clone());
        }
        categories
    }

    /// Indicators reported under `indicators`.
    pub fn indicators(&self) -> Vec<String> {
        string_list(self.findings.get("indicators"))
    }

    /// Tags from `tags` plus the tags of every entry in `matches`.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = string_list(self.findings.get("tags"));
        if let Some(Value::Array(matches)) = self.findings.get("matches") {
            for entry in matches {
                tags.extend(string_list(entry.get("tags")));
            }
        }
        tags
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn unit(value: f64) -> f64 {
    crate::verdict::clamp_or(value, 0.0, 1.0)
}
