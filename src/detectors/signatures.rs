//! Regex signature matching over subject, body and raw content.

use crate::components::DetectorOutput;
use crate::context::EmailContext;
use crate::detectors::BlockingDetector;
use crate::error::DetectorError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Score contributed by each matching signature
const SCORE_PER_MATCH: f64 = 0.2;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SignaturesConfig {
    /// YAML list of signatures, appended to `rules`
    pub rules_file: Option<PathBuf>,
    pub rules: Vec<SignatureRule>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SignatureRule {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub description: String,
}

fn default_category() -> String {
    "unknown".to_string()
}

fn default_severity() -> String {
    "medium".to_string()
}

impl SignatureRule {
    fn new(name: &str, pattern: &str, tags: &[&str], category: &str, severity: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            category: category.to_string(),
            severity: severity.to_string(),
            description: String::new(),
        }
    }
}

impl Default for SignaturesConfig {
    fn default() -> Self {
        Self {
            rules_file: None,
            rules: vec![
                SignatureRule::new(
                    "prompt_injection_ignore_instructions",
                    r"ignore (all )?(previous|prior) instructions",
                    &["ai", "prompt-injection"],
                    "prompt_injection",
                    "high",
                ),
                SignatureRule::new(
                    "agent_hijack_forward_mailbox",
                    r"(assistant|agent)[,:]? (please )?(forward|send|export) (all|every) (emails|messages|files)",
                    &["ai", "agent-hijack"],
                    "agent_hijack",
                    "critical",
                ),
                SignatureRule::new(
                    "bec_gift_card_request",
                    r"(buy|purchase) .{0,40}gift ?cards?",
                    &["bec"],
                    "bec",
                    "high",
                ),
                SignatureRule::new(
                    "credential_harvest_form",
                    r"<form[^>]+action=[^>]*(login|signin|verify)",
                    &["phishing"],
                    "phishing",
                    "high",
                ),
                SignatureRule::new(
                    "macro_enable_lure",
                    r"enable (editing|content) to view",
                    &["malware-lure"],
                    "phishing",
                    "medium",
                ),
            ],
        }
    }
}

struct CompiledRule {
    rule: SignatureRule,
    regex: Regex,
}

pub struct SignatureDetector {
    rules: Vec<CompiledRule>,
}

impl SignatureDetector {
    /// Compile inline rules plus any from `rules_file`. An unreadable file or
    /// invalid pattern leaves the layer unavailable.
    pub fn load(config: &SignaturesConfig) -> Result<Self, DetectorError> {
        let mut rules = config.rules.clone();

        if let Some(path) = &config.rules_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                DetectorError::Unavailable(format!("cannot read {}: {}", path.display(), e))
            })?;
            let from_file: Vec<SignatureRule> = serde_yaml::from_str(&content).map_err(|e| {
                DetectorError::Unavailable(format!("invalid signature file {}: {}", path.display(), e))
            })?;
            log::info!("Loaded {} signatures from {}", from_file.len(), path.display());
            rules.extend(from_file);
        }

        let rules = rules
            .into_iter()
            .map(|rule| {
                let regex = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        DetectorError::Unavailable(format!("signature {}: {}", rule.name, e))
                    })?;
                Ok(CompiledRule { rule, regex })
            })
            .collect::<Result<Vec<_>, DetectorError>>()?;

        Ok(Self { rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn scan(&self, email: &EmailContext) -> DetectorOutput {
        let content = format!("{}\n{}\n{}", email.subject, email.body, email.raw_content);

        let matched: Vec<&SignatureRule> = self
            .rules
            .iter()
            .filter(|r| r.regex.is_match(&content))
            .map(|r| &r.rule)
            .collect();

        if matched.is_empty() {
            return DetectorOutput::clean(0.5)
                .with_finding("matches", Value::Array(Vec::new()))
                .with_finding("match_count", 0);
        }

        let score = (matched.len() as f64 * SCORE_PER_MATCH).min(1.0);
        let matches: Vec<Value> = matched
            .iter()
            .map(|r| {
                json!({
                    "rule": r.name,
                    "tags": r.tags,
                    "category": r.category,
                    "severity": r.severity,
                    "description": r.description,
                })
            })
            .collect();

        let mut categories: Vec<String> = Vec::new();
        for rule in &matched {
            if rule.category != "unknown" && !categories.contains(&rule.category) {
                categories.push(rule.category.clone());
            }
        }

        let indicators = matched
            .iter()
            .map(|r| format!("Signature match: {}", r.name))
            .collect();

        DetectorOutput::detected(score, 0.85)
            .with_finding("match_count", matched.len())
            .with_finding("matches", Value::Array(matches))
            .with_finding("categories", categories)
            .with_indicators(indicators)
    }
}

impl BlockingDetector for SignatureDetector {
    fn evaluate_blocking(&self, email: &EmailContext) -> Result<DetectorOutput, DetectorError> {
        Ok(self.scan(email))
    }

    fn describe(&self) -> String {
        format!("{} regex signatures", self.rules.len())
    }
}
