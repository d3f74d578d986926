//! Keyword, attachment and URL rules.

use crate::components::{Detector, DetectorOutput};
use crate::context::EmailContext;
use crate::error::DetectorError;
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BasicRulesConfig {
    pub phishing_keywords: Vec<String>,
    pub bec_keywords: Vec<String>,
    pub dangerous_extensions: Vec<String>,
    pub suspicious_domains: Vec<String>,
    pub url_patterns: Vec<String>,
}

impl Default for BasicRulesConfig {
    fn default() -> Self {
        let list = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            phishing_keywords: list(&[
                "verify your account",
                "account suspended",
                "confirm your identity",
                "unusual sign-in activity",
                "update your payment",
                "password expires",
                "click here to login",
                "urgent action required",
            ]),
            bec_keywords: list(&[
                "wire transfer",
                "gift cards",
                "change of bank details",
                "are you at your desk",
                "keep this confidential",
                "urgent payment",
            ]),
            dangerous_extensions: list(&[
                ".exe", ".scr", ".js", ".vbs", ".bat", ".cmd", ".ps1", ".jar", ".iso", ".docm",
                ".xlsm",
            ]),
            suspicious_domains: Vec::new(),
            url_patterns: list(&[
                r"http://[^/\s]+\.tk/",
                r"http://[^/\s]+\.ml/",
                r"http://[^/\s]+\.ga/",
                r"http://[^/\s]+\.cf/",
                r"bit\.ly/",
                r"tinyurl\.com/",
                r"\bt\.co/",
            ]),
        }
    }
}

pub struct BasicRulesDetector {
    phishing_keywords: Vec<String>,
    bec_keywords: Vec<String>,
    dangerous_extensions: Vec<String>,
    suspicious_domains: Vec<String>,
    url_patterns: Vec<Regex>,
}

impl BasicRulesDetector {
    pub fn new(config: &BasicRulesConfig) -> Result<Self, DetectorError> {
        let lower = |items: &[String]| -> Vec<String> { items.iter().map(|s| s.to_lowercase()).collect() };

        let url_patterns = config
            .url_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| DetectorError::Unavailable(format!("invalid URL pattern {p}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            phishing_keywords: lower(&config.phishing_keywords),
            bec_keywords: lower(&config.bec_keywords),
            dangerous_extensions: lower(&config.dangerous_extensions),
            suspicious_domains: lower(&config.suspicious_domains),
            url_patterns,
        })
    }

    /// Fraction of keywords present in `text`
    fn keyword_ratio(keywords: &[String], text: &str) -> f64 {
        if keywords.is_empty() {
            return 0.0;
        }
        let matches = keywords.iter().filter(|k| text.contains(k.as_str())).count();
        (matches as f64 / keywords.len() as f64).min(1.0)
    }

    fn check_suspicious_domain(&self, email: &EmailContext) -> bool {
        let sender = email.sender.to_lowercase();
        self.suspicious_domains
            .iter()
            .any(|domain| sender.contains(domain.as_str()))
    }

    fn dangerous_attachment(&self, email: &EmailContext) -> Option<String> {
        email
            .attachments
            .iter()
            .find(|a| {
                let filename = a.filename.to_lowercase();
                self.dangerous_extensions
                    .iter()
                    .any(|ext| filename.ends_with(ext.as_str()))
            })
            .map(|a| a.filename.clone())
    }

    fn url_ratio(&self, body: &str) -> f64 {
        if self.url_patterns.is_empty() {
            return 0.0;
        }
        let matches = self.url_patterns.iter().filter(|re| re.is_match(body)).count();
        (matches as f64 / self.url_patterns.len() as f64).min(1.0)
    }

    pub fn analyze(&self, email: &EmailContext) -> DetectorOutput {
        let text = email.searchable_text().to_lowercase();
        let mut score = 0.0;
        let mut categories: Vec<String> = Vec::new();
        let mut indicators = Vec::new();

        let phishing = Self::keyword_ratio(&self.phishing_keywords, &text);
        if phishing > 0.0 {
            score += phishing * 0.4;
            categories.push("phishing".to_string());
            indicators.push(format!("Phishing keywords detected: {phishing:.2}"));
        }

        if self.check_suspicious_domain(email) {
            score += 0.3;
            categories.push("suspicious_domain".to_string());
            indicators.push(format!("Suspicious domain: {}", email.sender));
        }

        if let Some(filename) = self.dangerous_attachment(email) {
            score += 0.5;
            // A name match alone is not a scanner verdict
            categories.push("dangerous_attachment".to_string());
            indicators.push(format!("Dangerous attachment type: {filename}"));
        }

        let bec = Self::keyword_ratio(&self.bec_keywords, &text);
        if bec > 0.0 {
            score += bec * 0.4;
            categories.push("bec".to_string());
            indicators.push(format!("BEC indicators: {bec:.2}"));
        }

        let urls = self.url_ratio(&email.body);
        if urls > 0.0 {
            score += urls * 0.3;
            categories.push("suspicious_url".to_string());
            indicators.push("Suspicious URL patterns".to_string());
        }

        if categories.is_empty() {
            return DetectorOutput::clean(0.5);
        }

        DetectorOutput::detected(score.min(1.0), 0.8)
            .with_finding("categories", categories)
            .with_indicators(indicators)
    }
}

#[async_trait]
impl Detector for BasicRulesDetector {
    async fn evaluate(&self, email: &EmailContext) -> Result<DetectorOutput, DetectorError> {
        Ok(self.analyze(email))
    }

    fn describe(&self) -> String {
        format!(
            "basic rules ({} phishing, {} BEC keywords, {} URL patterns)",
            self.phishing_keywords.len(),
            self.bec_keywords.len(),
            self.url_patterns.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{DetectionLayerResult, Tier};
    use std::time::Duration;

    fn detector() -> BasicRulesDetector {
        let config = BasicRulesConfig {
            suspicious_domains: vec!["paypa1.com".to_string()],
            ..Default::default()
        };
        BasicRulesDetector::new(&config).unwrap()
    }

    #[test]
    fn test_clean_email() {
        let email = EmailContext::new(
            "1",
            "friend@example.com",
            "Lunch on Friday?",
            "Want to grab lunch at noon?",
        );
        let output = detector().analyze(&email);
        assert!(!output.detected);
        assert_eq!(output.score, 0.0);
        assert_eq!(output.confidence, 0.5);
    }

    #[test]
    fn test_phishing_and_suspicious_domain() {
        let email = EmailContext::new(
            "2",
            "security@paypa1.com",
            "Urgent action required",
            "Your account suspended. Verify your account at http://login.tk/now",
        );
        let output = detector().analyze(&email);
        assert!(output.detected);
        assert_eq!(output.confidence, 0.8);

        let result =
            DetectionLayerResult::from_output("Basic-Rules", Tier::Traditional, output, Duration::ZERO);
        let categories = result.categories();
        assert_eq!(categories, vec!["phishing", "suspicious_domain", "suspicious_url"]);
        assert_eq!(result.indicators()[1], "Suspicious domain: security@paypa1.com");
    }

    #[test]
    fn test_risky_attachment_is_not_malware() {
        let email = EmailContext::new("3", "a@b.com", "Invoice", "See attached")
            .with_attachment("Invoice.EXE", "application/x-msdownload");
        let output = detector().analyze(&email);
        assert!(output.detected);
        assert!((output.score - 0.5).abs() < 1e-9);
        let result =
            DetectionLayerResult::from_output("Basic-Rules", Tier::Traditional, output, Duration::ZERO);
        assert_eq!(result.categories(), vec!["dangerous_attachment"]);
        assert_eq!(result.indicators(), vec!["Dangerous attachment type: Invoice.EXE"]);
    }

    #[test]
    fn test_invalid_url_pattern_is_unavailable() {
        let config = BasicRulesConfig {
            url_patterns: vec!["(unclosed".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            BasicRulesDetector::new(&config),
            Err(DetectorError::Unavailable(_))
        ));
    }
}
