use crate::components::Tier;
use crate::detectors::basic_rules::BasicRulesConfig;
use crate::detectors::command::CommandConfig;
use crate::detectors::signatures::SignaturesConfig;
use crate::error::ConfigError;
use crate::verdict::Action;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub layers: Vec<LayerConfig>,
    pub ensemble: EnsembleConfig,
    pub enrichment: EnrichmentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LayerConfig {
    pub name: String,
    pub tier: Tier,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Overrides `ensemble.detector_timeout_seconds` for this layer
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    pub detector: DetectorKind,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type")]
pub enum DetectorKind {
    BasicRules(BasicRulesConfig),
    Signatures(SignaturesConfig),
    Command(CommandConfig),
    /// Supplied programmatically through `ApexEngine::builder().with_detector`
    External,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Band {
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Open interval check: both bounds are exclusive.
    pub fn contains(&self, score: f64) -> bool {
        self.low < score && score < self.high
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ActionThresholds {
    pub block: f64,
    pub quarantine: f64,
    pub warn: f64,
    pub tag: f64,
}

impl Default for ActionThresholds {
    fn default() -> Self {
        Self {
            block: 90.0,
            quarantine: 70.0,
            warn: 50.0,
            tag: 30.0,
        }
    }
}

impl ActionThresholds {
    /// Lowest risk score that maps to `action`
    pub fn lower_bound(&self, action: Action) -> f64 {
        match action {
            Action::Block => self.block,
            Action::Quarantine => self.quarantine,
            Action::Warn => self.warn,
            Action::Tag => self.tag,
            Action::Allow => 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EnsembleConfig {
    pub stage_c_band: Band,
    pub stage_d_band: Band,
    pub action_thresholds: ActionThresholds,
    pub critical_categories: Vec<String>,
    pub complex_threat_tags: Vec<String>,
    pub detector_timeout_seconds: u64,
    pub analysis_timeout_seconds: u64,
    pub failure_action: Action,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            stage_c_band: Band::new(0.3, 0.7),
            stage_d_band: Band::new(0.4, 0.8),
            action_thresholds: ActionThresholds::default(),
            critical_categories: vec!["malware".to_string(), "virus".to_string()],
            complex_threat_tags: vec![
                "ai".to_string(),
                "agent-hijack".to_string(),
                "bec".to_string(),
                "prompt-injection".to_string(),
            ],
            detector_timeout_seconds: 30,
            analysis_timeout_seconds: 120,
            failure_action: Action::Quarantine,
        }
    }
}

impl EnsembleConfig {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_seconds)
    }
}

/// What to do with pooled scores when the sender has a high reputation.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReputationStrategy {
    DiscountLast { amount: f64 },
    DiscountAll { amount: f64 },
    Ignore,
}

impl Default for ReputationStrategy {
    fn default() -> Self {
        ReputationStrategy::DiscountLast { amount: 0.1 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub bec_trust: f64,
    pub ato_trust: f64,
    pub low_reputation_threshold: f64,
    pub low_reputation_score: f64,
    pub low_reputation_trust: f64,
    pub high_reputation_threshold: f64,
    pub reputation_strategy: ReputationStrategy,
    pub verify_sender: bool,
    pub provider: Option<OsintProviderConfig>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bec_trust: 0.8,
            ato_trust: 0.85,
            low_reputation_threshold: 0.3,
            low_reputation_score: 0.7,
            low_reputation_trust: 0.7,
            high_reputation_threshold: 0.7,
            reputation_strategy: ReputationStrategy::default(),
            verify_sender: true,
            provider: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OsintProviderConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_osint_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn default_osint_timeout() -> u64 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            layers: vec![
                LayerConfig {
                    name: "Basic-Rules".to_string(),
                    tier: Tier::Traditional,
                    enabled: true,
                    weight: 1.0,
                    timeout_seconds: Some(5),
                    detector: DetectorKind::BasicRules(BasicRulesConfig::default()),
                },
                LayerConfig {
                    name: "ClamAV".to_string(),
                    tier: Tier::Traditional,
                    enabled: false,
                    weight: 1.0,
                    timeout_seconds: Some(30),
                    detector: DetectorKind::Command(CommandConfig::clamscan()),
                },
                LayerConfig {
                    name: "SpamAssassin".to_string(),
                    tier: Tier::Traditional,
                    enabled: false,
                    weight: 1.0,
                    timeout_seconds: Some(30),
                    detector: DetectorKind::Command(CommandConfig::spamc()),
                },
                LayerConfig {
                    name: "Signatures".to_string(),
                    tier: Tier::Pattern,
                    enabled: true,
                    weight: 1.0,
                    timeout_seconds: Some(10),
                    detector: DetectorKind::Signatures(SignaturesConfig::default()),
                },
                LayerConfig {
                    name: "Feature-ML".to_string(),
                    tier: Tier::Feature,
                    enabled: false,
                    weight: 1.0,
                    timeout_seconds: None,
                    detector: DetectorKind::External,
                },
                LayerConfig {
                    name: "Deep-Learning".to_string(),
                    tier: Tier::Deep,
                    enabled: false,
                    weight: 1.0,
                    timeout_seconds: Some(60),
                    detector: DetectorKind::External,
                },
            ],
            ensemble: EnsembleConfig::default(),
            enrichment: EnrichmentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&content)?;
        log::info!(
            "Loaded configuration from {} ({} layers)",
            path.display(),
            config.layers.len()
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for layer in &self.layers {
            if layer.name.trim().is_empty() {
                return Err(ConfigError::invalid("layers.name", "layer name is empty"));
            }
            if !names.insert(layer.name.as_str()) {
                return Err(ConfigError::invalid(
                    "layers.name",
                    format!("duplicate layer '{}'", layer.name),
                ));
            }
            if !layer.weight.is_finite() || layer.weight < 0.0 {
                return Err(ConfigError::invalid(
                    format!("layers.{}.weight", layer.name),
                    format!("weight must be a non-negative number, got {}", layer.weight),
                ));
            }
            if layer.timeout_seconds == Some(0) {
                return Err(ConfigError::invalid(
                    format!("layers.{}.timeout_seconds", layer.name),
                    "timeout must be at least one second",
                ));
            }
        }

        validate_band("ensemble.stage_c_band", &self.ensemble.stage_c_band)?;
        validate_band("ensemble.stage_d_band", &self.ensemble.stage_d_band)?;

        let t = &self.ensemble.action_thresholds;
        let ladder = [t.block, t.quarantine, t.warn, t.tag];
        if ladder.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > 100.0) {
            return Err(ConfigError::invalid(
                "ensemble.action_thresholds",
                "thresholds must lie within [0, 100]",
            ));
        }
        if !ladder.windows(2).all(|pair| pair[0] > pair[1]) {
            return Err(ConfigError::invalid(
                "ensemble.action_thresholds",
                "thresholds must be strictly descending (block > quarantine > warn > tag)",
            ));
        }

        if self.ensemble.failure_action == Action::Allow {
            return Err(ConfigError::invalid(
                "ensemble.failure_action",
                "a failed analysis must not resolve to allow",
            ));
        }
        if self.ensemble.detector_timeout_seconds == 0 || self.ensemble.analysis_timeout_seconds == 0
        {
            return Err(ConfigError::invalid(
                "ensemble",
                "timeouts must be at least one second",
            ));
        }

        let e = &self.enrichment;
        for (key, value) in [
            ("enrichment.bec_trust", e.bec_trust),
            ("enrichment.ato_trust", e.ato_trust),
            ("enrichment.low_reputation_threshold", e.low_reputation_threshold),
            ("enrichment.low_reputation_score", e.low_reputation_score),
            ("enrichment.low_reputation_trust", e.low_reputation_trust),
            ("enrichment.high_reputation_threshold", e.high_reputation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(key, format!("{value} is outside [0, 1]")));
            }
        }
        match e.reputation_strategy {
            ReputationStrategy::DiscountLast { amount } | ReputationStrategy::DiscountAll { amount }
                if !(0.0..=1.0).contains(&amount) =>
            {
                return Err(ConfigError::invalid(
                    "enrichment.reputation_strategy.amount",
                    format!("{amount} is outside [0, 1]"),
                ));
            }
            _ => {}
        }

        Ok(())
    }
}

fn validate_band(key: &str, band: &Band) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&band.low) || !(0.0..=1.0).contains(&band.high) {
        return Err(ConfigError::invalid(key, "band bounds must lie within [0, 1]"));
    }
    if band.low >= band.high {
        return Err(ConfigError::invalid(key, "band low must be below band high"));
    }
    Ok(())
}
