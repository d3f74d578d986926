//! Score Aggregator Component
//!
//! Confidence-weighted fusion of layer results and OSINT enrichment signals.

use crate::components::DetectionLayerResult;
use crate::config::{EnrichmentConfig, ReputationStrategy};
use crate::enrichment::OsintProvider;
use crate::verdict::clamp_or;
use std::collections::HashMap;

/// Confidence reported when nothing usable contributed
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
struct PooledSignal {
    score: f64,
    confidence: f64,
    weight: f64,
}

/// Categories, indicators and reason codes contributed by enrichment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentOutcome {
    pub categories: Vec<String>,
    pub indicators: Vec<String>,
    pub reason_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fusion {
    /// 0-100
    pub risk_score: f64,
    /// 0-1
    pub confidence: f64,
    pub enrichment: EnrichmentOutcome,
}

pub struct ScoreAggregator {
    weights: HashMap<String, f64>,
    enrichment: EnrichmentConfig,
}

impl ScoreAggregator {
    pub fn new(weights: HashMap<String, f64>, enrichment: EnrichmentConfig) -> Self {
        Self {
            weights,
            enrichment,
        }
    }

    /// Fused score on the 0-1 scale over layer results only. Zero when
    /// nothing usable exists.
    pub fn intermediate_score(&self, results: &[DetectionLayerResult]) -> f64 {
        let pool = self.layer_pool(results);
        compute(&pool).map(|(score, _)| score).unwrap_or(0.0)
    }

    /// Final fusion including enrichment signals for `sender`.
    pub async fn fuse(
        &self,
        results: &[DetectionLayerResult],
        sender: &str,
        osint: Option<&dyn OsintProvider>,
    ) -> Fusion {
        let mut pool = self.layer_pool(results);
        let mut enrichment = EnrichmentOutcome::default();

        if let Some(provider) = osint {
            if self.enrichment.enabled && !sender.is_empty() {
                self.enrich(provider, sender, &mut pool, &mut enrichment).await;
            }
        }

        let (score, confidence) = compute(&pool).unwrap_or((0.0, NEUTRAL_CONFIDENCE));

        Fusion {
            risk_score: score * 100.0,
            confidence,
            enrichment,
        }
    }

    fn layer_pool(&self, results: &[DetectionLayerResult]) -> Vec<PooledSignal> {
        results
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| {
                let layer_weight = self.weights.get(&r.layer_name).copied().unwrap_or(1.0);
                PooledSignal {
                    score: r.score,
                    confidence: r.confidence,
                    weight: r.confidence * layer_weight,
                }
            })
            .collect()
    }

    async fn enrich(
        &self,
        provider: &dyn OsintProvider,
        sender: &str,
        pool: &mut Vec<PooledSignal>,
        outcome: &mut EnrichmentOutcome,
    ) {
        let cfg = &self.enrichment;
        let (bec, ato, reputation) = tokio::join!(
            provider.check_bec(sender),
            provider.check_ato(sender),
            provider.reputation(sender)
        );

        // Appended in a fixed order regardless of which call finished first
        match bec {
            Ok(report) if report.detected => {
                push_trusted(pool, report.score, cfg.bec_trust);
                outcome.categories.push("bec".to_string());
                outcome.reason_codes.push("OSINT_BEC".to_string());
                let reason = if report.reason.is_empty() {
                    "Related domains found".to_string()
                } else {
                    report.reason
                };
                outcome.indicators.push(format!("BEC: {reason}"));
                if !report.suspicious_domains.is_empty() {
                    let domains: Vec<_> = report.suspicious_domains.iter().take(3).cloned().collect();
                    outcome
                        .indicators
                        .push(format!("Lookalike domains: {}", domains.join(", ")));
                }
            }
            Ok(_) => {}
            Err(e) => log::debug!("BEC enrichment skipped: {}", e),
        }

        match ato {
            Ok(report) if report.detected => {
                push_trusted(pool, report.score, cfg.ato_trust);
                outcome.categories.push("account_takeover".to_string());
                outcome.reason_codes.push("OSINT_ATO".to_string());
                let reason = if report.reason.is_empty() {
                    "Email in breaches".to_string()
                } else {
                    report.reason
                };
                outcome.indicators.push(format!("ATO: {reason}"));
                if report.breach_count > 0 {
                    outcome
                        .indicators
                        .push(format!("Found in {} breach(es)", report.breach_count));
                }
            }
            Ok(_) => {}
            Err(e) => log::debug!("ATO enrichment skipped: {}", e),
        }

        match reputation {
            Ok(report) => {
                let score = clamp_or(report.score, 0.0, 1.0);
                if score < cfg.low_reputation_threshold {
                    push_trusted(pool, cfg.low_reputation_score, cfg.low_reputation_trust);
                    outcome.reason_codes.push("LOW_REPUTATION".to_string());
                    outcome
                        .indicators
                        .push(format!("Low reputation: {score:.2}"));
                } else if score > cfg.high_reputation_threshold {
                    apply_reputation_strategy(pool, cfg.reputation_strategy);
                }
            }
            Err(e) => log::debug!("Reputation enrichment skipped: {}", e),
        }
    }
}

fn push_trusted(pool: &mut Vec<PooledSignal>, score: f64, trust: f64) {
    pool.push(PooledSignal {
        score: clamp_or(score, 0.0, 1.0),
        confidence: trust,
        weight: trust,
    });
}

fn apply_reputation_strategy(pool: &mut [PooledSignal], strategy: ReputationStrategy) {
    match strategy {
        ReputationStrategy::DiscountLast { amount } => {
            if let Some(last) = pool.last_mut() {
                last.score = (last.score - amount).max(0.0);
            }
        }
        ReputationStrategy::DiscountAll { amount } => {
            for signal in pool.iter_mut() {
                signal.score = (signal.score - amount).max(0.0);
            }
        }
        ReputationStrategy::Ignore => {}
    }
}

/// Weighted mean score and plain mean confidence, or `None` when the total
/// weight is zero.
fn compute(pool: &[PooledSignal]) -> Option<(f64, f64)> {
    let total_weight: f64 = pool.iter().map(|s| s.weight).sum();
    if pool.is_empty() || total_weight <= 0.0 {
        return None;
    }

    let weighted: f64 = pool.iter().map(|s| s.score * s.weight).sum();
    let mean_confidence = pool.iter().map(|s| s.confidence).sum::<f64>() / pool.len() as f64;

    Some((
        clamp_or(weighted / total_weight, 0.0, 1.0),
        clamp_or(mean_confidence, 0.0, 1.0),
    ))
}
