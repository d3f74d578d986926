//! Verdict Classifier Component
//!
//! Maps a 0-100 risk score onto the action / threat-level ladder.

use crate::config::ActionThresholds;
use crate::verdict::{Action, ThreatLevel};

pub struct VerdictClassifier {
    thresholds: ActionThresholds,
}

impl VerdictClassifier {
    pub fn new(thresholds: ActionThresholds) -> Self {
        Self { thresholds }
    }

    /// Inclusive lower bounds, checked from the top of the ladder down.
    pub fn classify(&self, risk_score: f64) -> (Action, ThreatLevel) {
        let action = self.determine_action(risk_score);
        (action, action.threat_level())
    }

    fn determine_action(&self, risk_score: f64) -> Action {
        let t = &self.thresholds;
        if risk_score >= t.block {
            Action::Block
        } else if risk_score >= t.quarantine {
            Action::Quarantine
        } else if risk_score >= t.warn {
            Action::Warn
        } else if risk_score >= t.tag {
            Action::Tag
        } else {
            Action::Allow
        }
    }
}

impl Default for VerdictClassifier {
    fn default() -> Self {
        Self::new(ActionThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_boundaries() {
        let classifier = VerdictClassifier::default();
        let cases = [
            (100.0, Action::Block, ThreatLevel::Critical),
            (90.0, Action::Block, ThreatLevel::Critical),
            (89.99, Action::Quarantine, ThreatLevel::High),
            (70.0, Action::Quarantine, ThreatLevel::High),
            (69.99, Action::Warn, ThreatLevel::Medium),
            (50.0, Action::Warn, ThreatLevel::Medium),
            (30.0, Action::Tag, ThreatLevel::Low),
            (29.99, Action::Allow, ThreatLevel::Clean),
            (0.0, Action::Allow, ThreatLevel::Clean),
        ];
        for (score, action, level) in cases {
            assert_eq!(classifier.classify(score), (action, level), "score {score}");
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let classifier = VerdictClassifier::new(ActionThresholds {
            block: 80.0,
            quarantine: 60.0,
            warn: 40.0,
            tag: 20.0,
        });
        assert_eq!(classifier.classify(85.0).0, Action::Block);
        assert_eq!(classifier.classify(45.0).0, Action::Warn);
        assert_eq!(classifier.classify(19.0).0, Action::Allow);
    }
}
