//! Cascade Orchestrator
//!
//! Drives the staged detector fan-out for one email:
//!
//! * Stage A runs every active traditional scanner concurrently. A detected
//!   critical category ends the analysis with a BLOCK verdict.
//! * Stage B (pattern matching) always runs afterwards.
//! * Stage C runs only while the intermediate score sits inside the
//!   uncertain band.
//! * Stage D runs inside its own band, or whenever a detected result carries
//!   a complex-threat tag.
//!
//! Results are recorded in registration order, never completion order.

use crate::components::explanation::{Explanation, ExplanationGenerator};
use crate::components::registry::DetectorRegistry;
use crate::components::score_aggregator::{EnrichmentOutcome, ScoreAggregator};
use crate::components::verdict_classifier::VerdictClassifier;
use crate::components::{DetectionLayerResult, Detector, Tier};
use crate::config::{Config, EnrichmentConfig, EnsembleConfig};
use crate::context::EmailContext;
use crate::enrichment::OsintProvider;
use crate::error::{CascadeError, DetectorError};
use crate::verdict::{Action, ThreatLevel, VerdictParts};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

/// Confidence attached to a critical short-circuit
const CRITICAL_CONFIDENCE: f64 = 0.99;

/// Scored verdict contents plus which stages actually ran.
#[derive(Debug, Clone)]
pub struct CascadeReport {
    pub parts: VerdictParts,
    pub critical_short_circuit: bool,
    pub stage_c_ran: bool,
    pub stage_d_ran: bool,
}

pub struct CascadeOrchestrator {
    registry: DetectorRegistry,
    aggregator: ScoreAggregator,
    classifier: VerdictClassifier,
    ensemble: EnsembleConfig,
    deadline: Duration,
}

impl CascadeOrchestrator {
    pub fn new(
        registry: DetectorRegistry,
        ensemble: EnsembleConfig,
        enrichment: EnrichmentConfig,
    ) -> Self {
        let aggregator = ScoreAggregator::new(registry.weights(), enrichment);
        let classifier = VerdictClassifier::new(ensemble.action_thresholds);
        let deadline = ensemble.analysis_timeout();

        Self {
            registry,
            aggregator,
            classifier,
            ensemble,
            deadline,
        }
    }

    pub fn from_config(config: &Config, external: &HashMap<String, Arc<dyn Detector>>) -> Self {
        Self::new(
            DetectorRegistry::from_config(config, external),
            config.ensemble.clone(),
            config.enrichment.clone(),
        )
    }

    /// Override the outer analysis deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Run the whole cascade under the outer deadline.
    pub async fn evaluate(
        &self,
        email: Arc<EmailContext>,
        osint: Option<&dyn OsintProvider>,
    ) -> Result<CascadeReport, CascadeError> {
        tokio::time::timeout(self.deadline, self.run(email, osint))
            .await
            .map_err(|_| CascadeError::Deadline(self.deadline))?
    }

    async fn run(
        &self,
        email: Arc<EmailContext>,
        osint: Option<&dyn OsintProvider>,
    ) -> Result<CascadeReport, CascadeError> {
        // Stage A: traditional scanners
        let mut layers = self.run_stage(Tier::Traditional, &email).await;

        if let Some(layer_name) = self.critical_finding(&layers) {
            log::warn!(
                "Critical finding from {} for {}, skipping remaining stages",
                layer_name,
                email.id
            );
            for tier in [Tier::Pattern, Tier::Feature, Tier::Deep] {
                layers.extend(self.skip_stage(tier));
            }
            return Ok(self.critical_report(layers));
        }

        // Stage B: pattern matching
        layers.extend(self.run_stage(Tier::Pattern, &email).await);
        let mut intermediate = self.aggregator.intermediate_score(&layers);
        log::debug!("Intermediate score after stage B: {:.3}", intermediate);

        // Stage C: feature classifier inside the uncertain band
        let stage_c_ran = self.ensemble.stage_c_band.contains(intermediate)
            && self.has_active(Tier::Feature);
        if stage_c_ran {
            layers.extend(self.run_stage(Tier::Feature, &email).await);
            intermediate = self.aggregator.intermediate_score(&layers);
            log::debug!("Intermediate score after stage C: {:.3}", intermediate);
        } else {
            layers.extend(self.skip_stage(Tier::Feature));
        }

        // Stage D: deep classifier for uncertain or complex threats
        let complex = self.is_complex_threat(&layers);
        let stage_d_ran = (self.ensemble.stage_d_band.contains(intermediate) || complex)
            && self.has_active(Tier::Deep);
        if stage_d_ran {
            log::debug!(
                "Running stage D (score {:.3}, complex threat: {})",
                intermediate,
                complex
            );
            layers.extend(self.run_stage(Tier::Deep, &email).await);
        } else {
            layers.extend(self.skip_stage(Tier::Deep));
        }

        let fusion = self.aggregator.fuse(&layers, &email.sender, osint).await;
        if !fusion.risk_score.is_finite() || !fusion.confidence.is_finite() {
            return Err(CascadeError::NonFiniteScore(fusion.risk_score));
        }

        let (action, threat_level) = self.classifier.classify(fusion.risk_score);
        let explanation = ExplanationGenerator::generate(threat_level, &layers, &fusion.enrichment);

        Ok(CascadeReport {
            parts: assemble(
                action,
                threat_level,
                fusion.risk_score,
                fusion.confidence,
                layers,
                explanation,
            ),
            critical_short_circuit: false,
            stage_c_ran,
            stage_d_ran,
        })
    }

    /// Invoke every active detector of `tier` concurrently and collect the
    /// results in registration order.
    async fn run_stage(&self, tier: Tier, email: &Arc<EmailContext>) -> Vec<DetectionLayerResult> {
        let stage_start = Instant::now();
        let active = self.registry.active(tier);

        let handles: Vec<_> = active
            .iter()
            .filter_map(|layer| layer.detector().map(|d| (*layer, Arc::clone(d))))
            .map(|(layer, detector)| {
                let email = Arc::clone(email);
                let timeout = layer.timeout;
                let handle = tokio::spawn(async move {
                    let start = Instant::now();
                    let outcome = tokio::time::timeout(timeout, detector.evaluate(&email)).await;
                    (outcome, start.elapsed())
                });
                (layer, handle)
            })
            .collect();

        // Outstanding detector tasks are aborted if the outer deadline
        // drops this future.
        let _guard = AbortOnDrop(handles.iter().map(|(_, h)| h.abort_handle()).collect());

        let mut results = Vec::with_capacity(handles.len());
        for (layer, handle) in handles {
            let result = match handle.await {
                Ok((Ok(Ok(output)), elapsed)) => {
                    DetectionLayerResult::from_output(&layer.name, tier, output, elapsed)
                }
                Ok((Ok(Err(e)), elapsed)) => {
                    log::warn!("{} failed: {}", layer.name, e);
                    DetectionLayerResult::failed(&layer.name, tier, e.to_string(), elapsed)
                }
                Ok((Err(_), elapsed)) => {
                    let e = DetectorError::Timeout(layer.timeout);
                    log::warn!("{} failed: {}", layer.name, e);
                    DetectionLayerResult::failed(&layer.name, tier, e.to_string(), elapsed)
                }
                Err(join_error) => {
                    let e = DetectorError::Panicked(join_error.to_string());
                    log::warn!("{} failed: {}", layer.name, e);
                    DetectionLayerResult::failed(
                        &layer.name,
                        tier,
                        e.to_string(),
                        stage_start.elapsed(),
                    )
                }
            };

            if let Some(error) = &result.error {
                log::debug!("{} recorded with error: {}", layer.name, error);
            }
            results.push(result);
        }

        log::debug!(
            "Stage {} finished {} layer(s) in {:?}",
            tier.stage(),
            results.len(),
            stage_start.elapsed()
        );
        results
    }

    fn skip_stage(&self, tier: Tier) -> Vec<DetectionLayerResult> {
        self.registry
            .active(tier)
            .iter()
            .map(|layer| DetectionLayerResult::skipped(&layer.name, tier))
            .collect()
    }

    fn has_active(&self, tier: Tier) -> bool {
        !self.registry.active(tier).is_empty()
    }

    /// Name of the first executed Stage A layer that detected a critical
    /// category.
    fn critical_finding(&self, layers: &[DetectionLayerResult]) -> Option<String> {
        layers
            .iter()
            .filter(|l| l.is_usable() && l.detected)
            .find(|l| {
                l.categories()
                    .iter()
                    .any(|c| contains_ignore_case(&self.ensemble.critical_categories, c))
            })
            .map(|l| l.layer_name.clone())
    }

    fn is_complex_threat(&self, layers: &[DetectionLayerResult]) -> bool {
        let tags = &self.ensemble.complex_threat_tags;
        layers
            .iter()
            .filter(|l| l.is_usable() && l.detected)
            .any(|l| {
                l.tags()
                    .iter()
                    .chain(l.categories().iter())
                    .any(|t| contains_ignore_case(tags, t))
            })
    }

    fn critical_report(&self, layers: Vec<DetectionLayerResult>) -> CascadeReport {
        let mut explanation =
            ExplanationGenerator::generate(ThreatLevel::Critical, &layers, &EnrichmentOutcome::default());
        explanation
            .reason_codes
            .insert(0, "CRITICAL_FINDING".to_string());

        CascadeReport {
            parts: assemble(
                Action::Block,
                ThreatLevel::Critical,
                100.0,
                CRITICAL_CONFIDENCE,
                layers,
                explanation,
            ),
            critical_short_circuit: true,
            stage_c_ran: false,
            stage_d_ran: false,
        }
    }

    /// Fail-safe verdict contents for an analysis that could not be scored.
    pub fn failure_parts(&self, error: &CascadeError) -> VerdictParts {
        let action = self.ensemble.failure_action;
        VerdictParts {
            action,
            threat_level: action.threat_level(),
            risk_score: self.ensemble.action_thresholds.lower_bound(action),
            confidence: 0.0,
            layers: Vec::new(),
            threat_categories: Vec::new(),
            indicators: Vec::new(),
            explanation: format!("Analysis failed ({error}). Applied fail-safe action {action}."),
            reason_codes: vec!["PIPELINE_FAILURE".to_string()],
        }
    }
}

fn assemble(
    action: Action,
    threat_level: ThreatLevel,
    risk_score: f64,
    confidence: f64,
    layers: Vec<DetectionLayerResult>,
    explanation: Explanation,
) -> VerdictParts {
    VerdictParts {
        action,
        threat_level,
        risk_score,
        confidence,
        layers,
        threat_categories: explanation.threat_categories,
        indicators: explanation.indicators,
        explanation: explanation.text,
        reason_codes: explanation.reason_codes,
    }
}

/// Aborts the wrapped detector tasks when dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn contains_ignore_case(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value))
}
