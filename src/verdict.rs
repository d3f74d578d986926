//! Terminal verdict produced for every analyzed email.

use crate::components::DetectionLayerResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ENGINE_VERSION: &str = concat!("APEX v", env!("CARGO_PKG_VERSION"));

/// Maximum number of indicators carried on a verdict
pub const MAX_INDICATORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Tag,
    Warn,
    Quarantine,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Clean,
    Low,
    Medium,
    High,
    Critical,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "ALLOW",
            Action::Tag => "TAG",
            Action::Warn => "WARN",
            Action::Quarantine => "QUARANTINE",
            Action::Block => "BLOCK",
        }
    }

    /// The threat level an action corresponds to on the default ladder.
    pub fn threat_level(&self) -> ThreatLevel {
        match self {
            Action::Allow => ThreatLevel::Clean,
            Action::Tag => ThreatLevel::Low,
            Action::Warn => ThreatLevel::Medium,
            Action::Quarantine => ThreatLevel::High,
            Action::Block => ThreatLevel::Critical,
        }
    }
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Clean => "CLEAN",
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub email_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub threat_level: ThreatLevel,
    pub risk_score: f64,
    pub confidence: f64,
    pub layers: Vec<DetectionLayerResult>,
    pub threat_categories: Vec<String>,
    pub indicators: Vec<String>,
    pub explanation: String,
    pub reason_codes: Vec<String>,
    pub total_duration_ms: f64,
    pub engine_version: String,
}

/// Everything needed to finalize a verdict except identity and timing.
#[derive(Debug, Clone)]
pub struct VerdictParts {
    pub action: Action,
    pub threat_level: ThreatLevel,
    pub risk_score: f64,
    pub confidence: f64,
    pub layers: Vec<DetectionLayerResult>,
    pub threat_categories: Vec<String>,
    pub indicators: Vec<String>,
    pub explanation: String,
    pub reason_codes: Vec<String>,
}

impl Verdict {
    /// Stamp creation time and clamp numeric fields into range.
    pub fn new(email_id: &str, parts: VerdictParts, total_duration_ms: f64) -> Self {
        let mut indicators = parts.indicators;
        indicators.truncate(MAX_INDICATORS);

        Self {
            email_id: email_id.to_string(),
            timestamp: Utc::now(),
            action: parts.action,
            threat_level: parts.threat_level,
            risk_score: clamp_or(parts.risk_score, 0.0, 100.0),
            confidence: clamp_or(parts.confidence, 0.0, 1.0),
            layers: parts.layers,
            threat_categories: parts.threat_categories,
            indicators,
            explanation: parts.explanation,
            reason_codes: parts.reason_codes,
            total_duration_ms,
            engine_version: ENGINE_VERSION.to_string(),
        }
    }

    pub fn is_threat(&self) -> bool {
        self.threat_level > ThreatLevel::Clean
    }

    /// Names of the layers that ran to completion
    pub fn executed_layers(&self) -> Vec<&str> {
        self.layers
            .iter()
            .filter(|l| l.executed)
            .map(|l| l.layer_name.as_str())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Clamp into [min, max]; NaN collapses to `min`.
pub(crate) fn clamp_or(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(risk: f64, confidence: f64, indicators: usize) -> VerdictParts {
        VerdictParts {
            action: Action::Warn,
            threat_level: ThreatLevel::Medium,
            risk_score: risk,
            confidence,
            layers: Vec::new(),
            threat_categories: Vec::new(),
            indicators: (0..indicators).map(|i| format!("indicator-{i}")).collect(),
            explanation: String::new(),
            reason_codes: Vec::new(),
        }
    }

    #[test]
    fn test_verdict_clamps_ranges() {
        let verdict = Verdict::new("id", parts(140.0, 1.7, 0), 1.0);
        assert_eq!(verdict.risk_score, 100.0);
        assert_eq!(verdict.confidence, 1.0);

        let verdict = Verdict::new("id", parts(f64::NAN, -0.2, 0), 1.0);
        assert_eq!(verdict.risk_score, 0.0);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_verdict_caps_indicators_in_order() {
        let verdict = Verdict::new("id", parts(50.0, 0.5, 8), 1.0);
        assert_eq!(verdict.indicators.len(), MAX_INDICATORS);
        assert_eq!(verdict.indicators[0], "indicator-0");
        assert_eq!(verdict.indicators[4], "indicator-4");
    }

    #[test]
    fn test_verdict_serializes_enums() {
        let verdict = Verdict::new("id", parts(50.0, 0.5, 1), 1.0);
        let json = verdict.to_json().unwrap();
        assert!(json.contains("\"action\": \"warn\""));
        assert!(json.contains("\"threat_level\": \"MEDIUM\""));
    }
}
