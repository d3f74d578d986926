//! Pre-Filter Component
//!
//! Sender whitelist / blacklist short-circuit that runs before any detector.
//! Whitelist takes precedence over blacklist.

use crate::context::EmailContext;
use crate::enrichment::OsintProvider;
use crate::verdict::{Action, ThreatLevel, VerdictParts};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum PreFilterDecision {
    Whitelisted(String),
    Blacklisted(String),
    Continue,
}

pub struct PreFilter {
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

impl PreFilter {
    pub fn new(whitelist: &[String], blacklist: &[String]) -> Self {
        Self {
            whitelist: whitelist.iter().map(|s| s.trim().to_lowercase()).collect(),
            blacklist: blacklist.iter().map(|s| s.trim().to_lowercase()).collect(),
        }
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    /// Exact match of sender address or sender domain.
    pub fn check(&self, email: &EmailContext) -> PreFilterDecision {
        let sender = email.sender.trim().to_lowercase();
        let domain = email.sender_domain.trim().to_lowercase();

        if let Some(hit) = Self::lookup(&self.whitelist, &sender, &domain) {
            log::info!("Email whitelisted: {}", email.sender);
            return PreFilterDecision::Whitelisted(hit);
        }

        if let Some(hit) = Self::lookup(&self.blacklist, &sender, &domain) {
            log::warn!("Email blacklisted: {}", email.sender);
            return PreFilterDecision::Blacklisted(hit);
        }

        PreFilterDecision::Continue
    }

    fn lookup(list: &HashSet<String>, sender: &str, domain: &str) -> Option<String> {
        if !sender.is_empty() && list.contains(sender) {
            Some(sender.to_string())
        } else if !domain.is_empty() && list.contains(domain) {
            Some(domain.to_string())
        } else {
            None
        }
    }

    /// Fire-and-forget sender validity check. The outcome is only logged.
    pub fn spawn_sender_verification(provider: Arc<dyn OsintProvider>, sender: &str) {
        if sender.is_empty() {
            return;
        }
        let sender = sender.to_string();
        tokio::spawn(async move {
            match provider.verify(&sender).await {
                Ok(report) if !report.valid => {
                    log::warn!("Sender address failed validity check: {}", sender)
                }
                Ok(_) => log::debug!("Sender address verified: {}", sender),
                Err(e) => log::debug!("Sender verification error for {}: {}", sender, e),
            }
        });
    }
}

impl PreFilterDecision {
    /// Terminal verdict contents, or `None` to continue into the cascade.
    pub fn into_parts(self) -> Option<VerdictParts> {
        match self {
            PreFilterDecision::Whitelisted(entry) => Some(VerdictParts {
                action: Action::Allow,
                threat_level: ThreatLevel::Clean,
                risk_score: 0.0,
                confidence: 1.0,
                layers: Vec::new(),
                threat_categories: Vec::new(),
                indicators: vec!["whitelisted_sender".to_string()],
                explanation: format!("Sender is whitelisted ({entry})"),
                reason_codes: vec!["WHITELIST".to_string()],
            }),
            PreFilterDecision::Blacklisted(entry) => Some(VerdictParts {
                action: Action::Block,
                threat_level: ThreatLevel::Critical,
                risk_score: 100.0,
                confidence: 1.0,
                layers: Vec::new(),
                threat_categories: vec!["blacklisted".to_string()],
                indicators: vec!["blacklisted_sender".to_string()],
                explanation: format!("Sender is blacklisted ({entry})"),
                reason_codes: vec!["BLACKLIST".to_string()],
            }),
            PreFilterDecision::Continue => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefilter() -> PreFilter {
        PreFilter::new(
            &["alice@trusted.com".to_string(), "partner.org".to_string()],
            &["evil.com".to_string(), "Spammer@Bulk.net".to_string()],
        )
    }

    #[test]
    fn test_whitelist_by_address_and_domain() {
        let pf = prefilter();
        let email = EmailContext::new("1", "alice@trusted.com", "Hi", "");
        assert_eq!(
            pf.check(&email),
            PreFilterDecision::Whitelisted("alice@trusted.com".to_string())
        );

        let email = EmailContext::new("2", "bob@partner.org", "Hi", "");
        assert_eq!(
            pf.check(&email),
            PreFilterDecision::Whitelisted("partner.org".to_string())
        );

        // Other addresses on trusted.com are not whitelisted
        let email = EmailContext::new("3", "mallory@trusted.com", "Hi", "");
        assert_eq!(pf.check(&email), PreFilterDecision::Continue);
    }

    #[test]
    fn test_blacklist_is_case_insensitive() {
        let pf = prefilter();
        let email = EmailContext::new("1", "ceo@EVIL.com", "Wire", "");
        assert_eq!(
            pf.check(&email),
            PreFilterDecision::Blacklisted("evil.com".to_string())
        );

        let email = EmailContext::new("2", "spammer@bulk.net", "Deals", "");
        assert!(matches!(pf.check(&email), PreFilterDecision::Blacklisted(_)));
    }

    #[test]
    fn test_whitelist_wins_over_blacklist() {
        let pf = PreFilter::new(&["both.com".to_string()], &["both.com".to_string()]);
        let email = EmailContext::new("1", "x@both.com", "", "");
        assert!(matches!(pf.check(&email), PreFilterDecision::Whitelisted(_)));
    }

    #[test]
    fn test_terminal_parts() {
        let parts = PreFilterDecision::Blacklisted("evil.com".to_string())
            .into_parts()
            .unwrap();
        assert_eq!(parts.action, Action::Block);
        assert_eq!(parts.threat_level, ThreatLevel::Critical);
        assert_eq!(parts.risk_score, 100.0);
        assert_eq!(parts.indicators, vec!["blacklisted_sender"]);

        let parts = PreFilterDecision::Whitelisted("trusted.com".to_string())
            .into_parts()
            .unwrap();
        assert_eq!(parts.action, Action::Allow);
        assert_eq!(parts.confidence, 1.0);
        assert_eq!(parts.indicators, vec!["whitelisted_sender"]);

        assert!(PreFilterDecision::Continue.into_parts().is_none());
    }

    #[test]
    fn test_empty_sender_never_matches() {
        let pf = PreFilter::new(&[String::new()], &[]);
        let email = EmailContext::default();
        assert_eq!(pf.check(&email), PreFilterDecision::Continue);
    }
}
