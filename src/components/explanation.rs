//! Explanation Generator Component
//!
//! Turns layer results and enrichment output into the human-readable part of
//! a verdict: rationale text, threat categories, indicators and reason codes.

use crate::components::score_aggregator::EnrichmentOutcome;
use crate::components::DetectionLayerResult;
use crate::verdict::{ThreatLevel, MAX_INDICATORS};

pub const CLEAN_EXPLANATION: &str = "No significant threats detected. Email appears legitimate.";

/// Categories named in the rationale text
const MAX_EXPLAINED_CATEGORIES: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Explanation {
    pub text: String,
    pub threat_categories: Vec<String>,
    pub indicators: Vec<String>,
    pub reason_codes: Vec<String>,
}

pub struct ExplanationGenerator;

impl ExplanationGenerator {
    pub fn generate(
        level: ThreatLevel,
        layers: &[DetectionLayerResult],
        enrichment: &EnrichmentOutcome,
    ) -> Explanation {
        let detecting: Vec<&DetectionLayerResult> = layers
            .iter()
            .filter(|l| l.is_usable() && l.detected)
            .collect();

        let mut categories = Vec::new();
        for layer in &detecting {
            for category in layer.categories() {
                push_unique(&mut categories, category);
            }
        }
        for category in &enrichment.categories {
            push_unique(&mut categories, category.clone());
        }

        let mut indicators = Vec::new();
        for layer in &detecting {
            let reported = layer.indicators();
            if reported.is_empty() {
                indicators.push(format!(
                    "{} flagged message (score {:.2})",
                    layer.layer_name, layer.score
                ));
            } else {
                indicators.extend(reported);
            }
        }
        indicators.extend(enrichment.indicators.iter().cloned());
        indicators.truncate(MAX_INDICATORS);

        let mut reason_codes = Vec::new();
        for layer in &detecting {
            push_unique(&mut reason_codes, reason_code(&layer.layer_name));
        }
        for code in &enrichment.reason_codes {
            push_unique(&mut reason_codes, code.clone());
        }

        let names: Vec<&str> = detecting.iter().map(|l| l.layer_name.as_str()).collect();
        let text = Self::describe(level, &names, &categories, &indicators);

        Explanation {
            text,
            threat_categories: categories,
            indicators,
            reason_codes,
        }
    }

    fn describe(
        level: ThreatLevel,
        layer_names: &[&str],
        categories: &[String],
        indicators: &[String],
    ) -> String {
        if level == ThreatLevel::Clean {
            return CLEAN_EXPLANATION.to_string();
        }

        let source = match layer_names {
            [] => "threat intelligence".to_string(),
            [single] => single.to_string(),
            many => format!("multiple layers ({})", many.join(", ")),
        };
        let mut text = format!("{} risk email detected by {}.", level, source);

        if !categories.is_empty() {
            let shown: Vec<&str> = categories
                .iter()
                .take(MAX_EXPLAINED_CATEGORIES)
                .map(String::as_str)
                .collect();
            text.push_str(&format!(" Threat types: {}.", shown.join(", ")));
        }

        if let Some(first) = indicators.first() {
            text.push_str(&format!(" Key indicator: {}.", first));
        }

        text
    }
}

/// `<LAYER>_DETECTED`, upper-cased with non-alphanumerics replaced by `_`.
pub fn reason_code(layer_name: &str) -> String {
    let normalized: String = layer_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{normalized}_DETECTED")
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{DetectorOutput, Tier};
    use std::time::Duration;

    fn detected(name: &str, output: DetectorOutput) -> DetectionLayerResult {
        DetectionLayerResult::from_output(name, Tier::Pattern, output, Duration::ZERO)
    }

    #[test]
    fn test_clean_text() {
        let explanation =
            ExplanationGenerator::generate(ThreatLevel::Clean, &[], &EnrichmentOutcome::default());
        assert_eq!(explanation.text, CLEAN_EXPLANATION);
        assert!(explanation.indicators.is_empty());
        assert!(explanation.reason_codes.is_empty());
    }

    #[test]
    fn test_single_layer_text() {
        let layers = vec![detected(
            "YARA",
            DetectorOutput::detected(0.8, 0.85)
                .with_category("phishing")
                .with_indicators(vec!["Credential harvesting form".to_string()]),
        )];
        let explanation =
            ExplanationGenerator::generate(ThreatLevel::High, &layers, &EnrichmentOutcome::default());
        assert_eq!(
            explanation.text,
            "HIGH risk email detected by YARA. Threat types: phishing. Key indicator: Credential harvesting form."
        );
        assert_eq!(explanation.reason_codes, vec!["YARA_DETECTED"]);
    }

    #[test]
    fn test_multiple_layers_and_generated_indicators() {
        let layers = vec![
            detected("Basic-Rules", DetectorOutput::detected(0.6, 0.7)),
            detected("Spam Assassin", DetectorOutput::detected(0.45, 0.8)),
            DetectionLayerResult::skipped("Deep-Learning", Tier::Deep),
        ];
        let explanation = ExplanationGenerator::generate(
            ThreatLevel::Medium,
            &layers,
            &EnrichmentOutcome::default(),
        );
        assert!(explanation
            .text
            .starts_with("MEDIUM risk email detected by multiple layers (Basic-Rules, Spam Assassin)."));
        assert_eq!(
            explanation.indicators,
            vec![
                "Basic-Rules flagged message (score 0.60)",
                "Spam Assassin flagged message (score 0.45)"
            ]
        );
        assert_eq!(
            explanation.reason_codes,
            vec!["BASIC_RULES_DETECTED", "SPAM_ASSASSIN_DETECTED"]
        );
    }

    #[test]
    fn test_indicator_cap_keeps_earliest() {
        let many: Vec<String> = (1..=6).map(|i| format!("layer indicator {i}")).collect();
        let layers = vec![detected(
            "Signatures",
            DetectorOutput::detected(0.9, 0.85).with_indicators(many),
        )];
        let enrichment = EnrichmentOutcome {
            categories: vec!["bec".to_string()],
            indicators: vec!["BEC: Related domains found".to_string()],
            reason_codes: vec!["OSINT_BEC".to_string()],
        };
        let explanation = ExplanationGenerator::generate(ThreatLevel::High, &layers, &enrichment);
        assert_eq!(explanation.indicators.len(), MAX_INDICATORS);
        assert_eq!(explanation.indicators[0], "layer indicator 1");
        assert_eq!(explanation.indicators[4], "layer indicator 5");
        assert_eq!(explanation.reason_codes, vec!["SIGNATURES_DETECTED", "OSINT_BEC"]);
        assert_eq!(explanation.threat_categories, vec!["bec"]);
    }

    #[test]
    fn test_categories_deduplicated_and_limited_in_text() {
        let layers = vec![
            detected(
                "A",
                DetectorOutput::detected(0.9, 0.9)
                    .with_finding("categories", serde_json::json!(["phishing", "bec"])),
            ),
            detected(
                "B",
                DetectorOutput::detected(0.9, 0.9)
                    .with_finding("categories", serde_json::json!(["bec", "malware", "spam"])),
            ),
        ];
        let explanation = ExplanationGenerator::generate(
            ThreatLevel::Critical,
            &layers,
            &EnrichmentOutcome::default(),
        );
        assert_eq!(
            explanation.threat_categories,
            vec!["phishing", "bec", "malware", "spam"]
        );
        assert!(explanation.text.contains("Threat types: phishing, bec, malware."));
    }

    #[test]
    fn test_enrichment_only_source() {
        let enrichment = EnrichmentOutcome {
            categories: Vec::new(),
            indicators: vec!["Low reputation: 0.05".to_string()],
            reason_codes: vec!["LOW_REPUTATION".to_string()],
        };
        let explanation = ExplanationGenerator::generate(ThreatLevel::Low, &[], &enrichment);
        assert_eq!(
            explanation.text,
            "LOW risk email detected by threat intelligence. Key indicator: Low reputation: 0.05."
        );
    }

    #[test]
    fn test_reason_code_normalization() {
        assert_eq!(reason_code("ClamAV"), "CLAMAV_DETECTED");
        assert_eq!(reason_code("feature-ml v2"), "FEATURE_ML_V2_DETECTED");
    }
}
