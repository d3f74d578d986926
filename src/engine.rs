//! APEX Engine
//!
//! Owns the active configuration snapshot and wires the pre-filter, the
//! cascade and statistics together for every analysis request.

use crate::components::cascade::CascadeOrchestrator;
use crate::components::prefilter::PreFilter;
use crate::components::registry::Availability;
use crate::components::{Detector, Tier};
use crate::config::Config;
use crate::context::EmailContext;
use crate::enrichment::{CommandOsintProvider, OsintProvider};
use crate::error::ConfigError;
use crate::statistics::{GlobalStats, LayerStats, StatEvent, StatisticsCollector};
use crate::verdict::{Verdict, ENGINE_VERSION};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Immutable per-configuration state shared by in-flight requests.
pub struct EngineState {
    pub config: Config,
    pub prefilter: PreFilter,
    pub cascade: CascadeOrchestrator,
    osint: Option<Arc<dyn OsintProvider>>,
}

/// One row of the layer listing.
#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub tier: Tier,
    pub weight: f64,
    pub timeout_seconds: f64,
    pub availability: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatistics {
    pub version: String,
    pub active_layers: Vec<String>,
    pub whitelist_size: usize,
    pub blacklist_size: usize,
    pub global: GlobalStats,
    pub layers: Vec<LayerStats>,
}

pub struct ApexEngineBuilder {
    config: Config,
    external: HashMap<String, Arc<dyn Detector>>,
    osint: Option<Arc<dyn OsintProvider>>,
}

impl ApexEngineBuilder {
    /// Supply the collaborator for an `External` layer.
    pub fn with_detector(mut self, layer_name: &str, detector: Arc<dyn Detector>) -> Self {
        self.external.insert(layer_name.to_string(), detector);
        self
    }

    /// Use `provider` instead of the one described in `enrichment.provider`.
    pub fn with_osint(mut self, provider: Arc<dyn OsintProvider>) -> Self {
        self.osint = Some(provider);
        self
    }

    pub fn build(self) -> Result<ApexEngine, ConfigError> {
        let state = build_state(self.config, &self.external, self.osint.as_ref())?;

        log::info!(
            "{} initialized - active layers: {:?}",
            ENGINE_VERSION,
            state.cascade.registry().active_layer_names()
        );

        Ok(ApexEngine {
            state: RwLock::new(Arc::new(state)),
            external: self.external,
            osint: self.osint,
            statistics: StatisticsCollector::new(),
        })
    }
}

pub struct ApexEngine {
    state: RwLock<Arc<EngineState>>,
    external: HashMap<String, Arc<dyn Detector>>,
    osint: Option<Arc<dyn OsintProvider>>,
    statistics: StatisticsCollector,
}

impl ApexEngine {
    pub fn builder(config: Config) -> ApexEngineBuilder {
        ApexEngineBuilder {
            config,
            external: HashMap::new(),
            osint: None,
        }
    }

    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    /// Current configuration snapshot. Requests hold their own `Arc`, so a
    /// concurrent reload never changes an analysis already in flight.
    pub fn snapshot(&self) -> Arc<EngineState> {
        match self.state.read() {
            Ok(state) => Arc::clone(&state),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Analyze one email. Always returns a verdict.
    pub async fn analyze(&self, email: EmailContext) -> Verdict {
        let start = Instant::now();
        let state = self.snapshot();
        let email = Arc::new(email.normalized());

        log::debug!("Analyzing email {} from {}", email.id, email.sender);

        if let Some(osint) = &state.osint {
            let enrichment = &state.config.enrichment;
            if enrichment.enabled && enrichment.verify_sender {
                PreFilter::spawn_sender_verification(Arc::clone(osint), &email.sender);
            }
        }

        let parts = if let Some(parts) = state.prefilter.check(&email).into_parts() {
            self.statistics.record_event(StatEvent::PrefilterShortCircuit);
            parts
        } else {
            match state
                .cascade
                .evaluate(Arc::clone(&email), state.osint.as_deref())
                .await
            {
                Ok(report) => {
                    if report.critical_short_circuit {
                        self.statistics.record_event(StatEvent::CriticalShortCircuit);
                    }
                    if report.stage_c_ran {
                        self.statistics.record_event(StatEvent::StageRun(Tier::Feature));
                    }
                    if report.stage_d_ran {
                        self.statistics.record_event(StatEvent::StageRun(Tier::Deep));
                    }
                    report.parts
                }
                Err(e) => {
                    log::error!("Analysis of {} failed: {}", email.id, e);
                    self.statistics.record_event(StatEvent::PipelineFailure);
                    state.cascade.failure_parts(&e)
                }
            }
        };

        let verdict = Verdict::new(&email.id, parts, start.elapsed().as_secs_f64() * 1000.0);
        self.statistics.record_verdict(&verdict);

        log::info!(
            "Verdict for {}: {} ({}) risk={:.1} confidence={:.2} in {:.1}ms",
            verdict.email_id,
            verdict.action,
            verdict.threat_level,
            verdict.risk_score,
            verdict.confidence,
            verdict.total_duration_ms
        );

        verdict
    }

    /// Swap in a new configuration. On error the current one stays active.
    pub fn reload(&self, config: Config) -> Result<(), ConfigError> {
        let state = build_state(config, &self.external, self.osint.as_ref())?;
        let active = state.cascade.registry().active_layer_names();

        match self.state.write() {
            Ok(mut current) => *current = Arc::new(state),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(state),
        }

        log::info!("Configuration reloaded - active layers: {:?}", active);
        Ok(())
    }

    pub fn reload_from<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        self.reload(Config::load(path)?)
    }

    pub fn active_layers(&self) -> Vec<String> {
        self.snapshot().cascade.registry().active_layer_names()
    }

    pub fn layers(&self) -> Vec<LayerSummary> {
        let state = self.snapshot();
        state
            .cascade
            .registry()
            .layers()
            .iter()
            .map(|layer| LayerSummary {
                name: layer.name.clone(),
                tier: layer.tier,
                weight: layer.weight,
                timeout_seconds: layer.timeout.as_secs_f64(),
                availability: layer.availability.to_string(),
                description: match layer.availability {
                    Availability::Active => layer.describe(),
                    _ => "-".to_string(),
                },
            })
            .collect()
    }

    pub fn statistics(&self) -> EngineStatistics {
        let state = self.snapshot();
        let (global, layers) = self.statistics.get_stats();

        EngineStatistics {
            version: ENGINE_VERSION.to_string(),
            active_layers: state.cascade.registry().active_layer_names(),
            whitelist_size: state.prefilter.whitelist_len(),
            blacklist_size: state.prefilter.blacklist_len(),
            global,
            layers,
        }
    }
}

fn build_state(
    config: Config,
    external: &HashMap<String, Arc<dyn Detector>>,
    osint_override: Option<&Arc<dyn OsintProvider>>,
) -> Result<EngineState, ConfigError> {
    config.validate()?;

    let osint = match (osint_override, &config.enrichment.provider) {
        (Some(provider), _) => Some(Arc::clone(provider)),
        (None, Some(provider)) => {
            Some(Arc::new(CommandOsintProvider::new(provider)) as Arc<dyn OsintProvider>)
        }
        (None, None) => None,
    };
    if config.enrichment.enabled && osint.is_none() {
        log::warn!("Enrichment enabled but no OSINT provider configured");
    }

    Ok(EngineState {
        prefilter: PreFilter::new(&config.whitelist, &config.blacklist),
        cascade: CascadeOrchestrator::from_config(&config, external),
        osint,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::DetectorOutput;
    use crate::config::{DetectorKind, LayerConfig};
    use crate::enrichment::{AtoReport, BecReport, ReputationReport, VerificationReport};
    use crate::error::{DetectorError, EnrichmentError};
    use crate::verdict::{Action, ThreatLevel};
    use async_trait::async_trait;

    struct Fixed(DetectorOutput);

    #[async_trait]
    impl Detector for Fixed {
        async fn evaluate(&self, _email: &EmailContext) -> Result<DetectorOutput, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct Stalled;

    #[async_trait]
    impl Detector for Stalled {
        async fn evaluate(&self, _email: &EmailContext) -> Result<DetectorOutput, DetectorError> {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            Ok(DetectorOutput::clean(0.5))
        }
    }

    struct LowReputation;

    #[async_trait]
    impl OsintProvider for LowReputation {
        async fn check_bec(&self, _address: &str) -> Result<BecReport, EnrichmentError> {
            Ok(BecReport::default())
        }

        async fn check_ato(&self, _address: &str) -> Result<AtoReport, EnrichmentError> {
            Err(EnrichmentError::Provider("quota exceeded".to_string()))
        }

        async fn reputation(&self, _address: &str) -> Result<ReputationReport, EnrichmentError> {
            Ok(ReputationReport { score: 0.05 })
        }

        async fn verify(&self, _address: &str) -> Result<VerificationReport, EnrichmentError> {
            Ok(VerificationReport { valid: false })
        }
    }

    fn external_layer(name: &str, tier: Tier) -> LayerConfig {
        LayerConfig {
            name: name.to_string(),
            tier,
            enabled: true,
            weight: 1.0,
            timeout_seconds: None,
            detector: DetectorKind::External,
        }
    }

    /// One external layer that flags everything as high-risk phishing
    fn alarmist_engine(config: Config) -> ApexEngine {
        let mut config = config;
        config.layers = vec![external_layer("Scanner", Tier::Traditional)];
        ApexEngine::builder(config)
            .with_detector(
                "Scanner",
                Arc::new(Fixed(
                    DetectorOutput::detected(0.95, 0.9).with_category("phishing"),
                )),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_whitelist_overrides_detectors() {
        let mut config = Config::default();
        config.whitelist = vec!["alice@trusted.com".to_string()];
        let engine = alarmist_engine(config);

        let verdict = engine
            .analyze(EmailContext::new("1", "alice@trusted.com", "Hi", "Wire transfer now"))
            .await;
        assert_eq!(verdict.action, Action::Allow);
        assert_eq!(verdict.threat_level, ThreatLevel::Clean);
        assert_eq!(verdict.risk_score, 0.0);
        assert!(verdict.layers.is_empty());
        assert_eq!(verdict.indicators, vec!["whitelisted_sender"]);
    }

    #[tokio::test]
    async fn test_blacklisted_domain_blocks() {
        let mut config = Config::default();
        config.blacklist = vec!["evil.com".to_string()];
        let engine = ApexEngine::new(config).unwrap();

        let verdict = engine
            .analyze(EmailContext::new("2", "ceo@evil.com", "Hello", "Just checking in"))
            .await;
        assert_eq!(verdict.action, Action::Block);
        assert_eq!(verdict.threat_level, ThreatLevel::Critical);
        assert_eq!(verdict.risk_score, 100.0);
        assert_eq!(verdict.reason_codes, vec!["BLACKLIST"]);
        assert_eq!(verdict.email_id, "2");
    }

    #[tokio::test]
    async fn test_external_detector_drives_verdict() {
        let engine = alarmist_engine(Config::default());
        let verdict = engine
            .analyze(EmailContext::new("3", "x@example.com", "Reset", "Click"))
            .await;
        assert_eq!(verdict.action, Action::Block);
        assert_eq!(verdict.threat_categories, vec!["phishing"]);
        assert_eq!(verdict.reason_codes, vec!["SCANNER_DETECTED"]);
        assert_eq!(verdict.executed_layers(), vec!["Scanner"]);
        assert!(verdict.engine_version.starts_with("APEX v"));
    }

    #[tokio::test]
    async fn test_default_layers_flag_phishing_keywords() {
        let engine = ApexEngine::new(Config::default()).unwrap();
        assert_eq!(engine.active_layers(), vec!["Basic-Rules", "Signatures"]);

        let verdict = engine
            .analyze(EmailContext::new(
                "4",
                "security@bank-alerts.example",
                "Urgent action required",
                "Your account suspended. Verify your account to restore access.",
            ))
            .await;

        assert_eq!(verdict.executed_layers(), vec!["Basic-Rules", "Signatures"]);
        assert!(verdict.layers[0].detected);
        assert!(verdict.indicators[0].starts_with("Phishing keywords detected"));
        assert!(verdict.reason_codes.contains(&"BASIC_RULES_DETECTED".to_string()));
        assert_eq!(verdict.threat_categories, vec!["phishing"]);
    }

    #[tokio::test]
    async fn test_enrichment_joins_the_pool() {
        let mut config = Config::default();
        config.layers = vec![external_layer("Scanner", Tier::Traditional)];
        config.enrichment.enabled = true;

        let engine = ApexEngine::builder(config)
            .with_detector("Scanner", Arc::new(Fixed(DetectorOutput::clean(0.5))))
            .with_osint(Arc::new(LowReputation))
            .build()
            .unwrap();

        let verdict = engine
            .analyze(EmailContext::new("5", "new@fresh.example", "Hi", "Hello"))
            .await;
        // (0 * 0.5 + 0.7 * 0.7) / (0.5 + 0.7)
        assert!((verdict.risk_score - 0.49 / 1.2 * 100.0).abs() < 1e-9);
        assert_eq!(verdict.reason_codes, vec!["LOW_REPUTATION"]);
        assert_eq!(verdict.indicators, vec!["Low reputation: 0.05"]);
        assert_eq!(verdict.action, Action::Tag);
    }

    #[tokio::test]
    async fn test_reload_swaps_snapshot() {
        let engine = ApexEngine::new(Config::default()).unwrap();
        let email = || EmailContext::new("6", "bob@spam.example", "Offer", "Cheap");

        assert_ne!(engine.analyze(email()).await.action, Action::Block);

        let mut config = Config::default();
        config.blacklist = vec!["spam.example".to_string()];
        engine.reload(config).unwrap();
        assert_eq!(engine.analyze(email()).await.action, Action::Block);
        assert_eq!(engine.statistics().blacklist_size, 1);
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_current_config() {
        let mut config = Config::default();
        config.whitelist = vec!["ok.example".to_string()];
        let engine = ApexEngine::new(config).unwrap();

        let mut bad = Config::default();
        bad.ensemble.failure_action = Action::Allow;
        assert!(engine.reload(bad).is_err());
        assert_eq!(engine.statistics().whitelist_size, 1);
    }

    #[tokio::test]
    async fn test_statistics_track_outcomes() {
        let mut config = Config::default();
        config.blacklist = vec!["evil.com".to_string()];
        let engine = alarmist_engine(config);

        engine
            .analyze(EmailContext::new("7", "a@evil.com", "", ""))
            .await;
        engine
            .analyze(EmailContext::new("8", "b@example.com", "", ""))
            .await;

        let stats = engine.statistics();
        assert_eq!(stats.global.total_emails, 2);
        assert_eq!(stats.global.total_blocks, 2);
        assert_eq!(stats.global.prefilter_short_circuits, 1);
        assert_eq!(stats.active_layers, vec!["Scanner"]);
        assert_eq!(stats.layers.len(), 1);
        assert_eq!(stats.layers[0].executions, 1);
        assert_eq!(stats.layers[0].detections, 1);
    }

    #[tokio::test]
    async fn test_macro_attachment_does_not_short_circuit() {
        let engine = ApexEngine::new(Config::default()).unwrap();
        let verdict = engine
            .analyze(
                EmailContext::new("11", "hr@company.example", "Budget", "Numbers attached, thanks.")
                    .with_attachment("budget.xlsm", "application/vnd.ms-excel.sheet.macroEnabled.12"),
            )
            .await;

        assert_ne!(verdict.action, Action::Block);
        assert_ne!(verdict.threat_level, ThreatLevel::Critical);
        assert!(!verdict.reason_codes.contains(&"CRITICAL_FINDING".to_string()));
        assert!(verdict.threat_categories.contains(&"dangerous_attachment".to_string()));
        assert_eq!(verdict.executed_layers(), vec!["Basic-Rules", "Signatures"]);
        assert_eq!(engine.statistics().global.critical_short_circuits, 0);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_applies_failure_action() {
        let mut config = Config::default();
        config.layers = vec![external_layer("Stuck", Tier::Traditional)];
        config.ensemble.analysis_timeout_seconds = 1;
        let engine = ApexEngine::builder(config)
            .with_detector("Stuck", Arc::new(Stalled))
            .build()
            .unwrap();

        let verdict = engine
            .analyze(EmailContext::new("12", "someone@example.com", "Hi", "Hello"))
            .await;

        assert_eq!(verdict.action, Action::Quarantine);
        assert_eq!(verdict.threat_level, ThreatLevel::High);
        assert_eq!(verdict.risk_score, 70.0);
        assert_eq!(verdict.confidence, 0.0);
        assert_eq!(verdict.reason_codes, vec!["PIPELINE_FAILURE"]);
        assert!(verdict.layers.is_empty());

        let stats = engine.statistics();
        assert_eq!(stats.global.pipeline_failures, 1);
        assert_eq!(stats.global.total_quarantines, 1);
    }

    #[test]
    fn test_layer_listing_reports_availability() {
        let engine = ApexEngine::new(Config::default()).unwrap();
        let layers = engine.layers();
        assert_eq!(layers.len(), 6);
        assert_eq!(layers[0].availability, "active");
        assert_eq!(layers[1].name, "ClamAV");
        assert_eq!(layers[1].availability, "disabled");
        assert_eq!(layers[1].description, "-");
    }

    #[test]
    fn test_invalid_config_is_rejected_at_build() {
        let mut config = Config::default();
        config.ensemble.action_thresholds.warn = 95.0;
        assert!(ApexEngine::new(config).is_err());
    }
}
