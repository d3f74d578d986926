pub mod components;
pub mod config;
pub mod context;
pub mod detectors;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod statistics;
pub mod verdict;

pub use components::{DetectionLayerResult, Detector, DetectorOutput, Tier};
pub use config::Config;
pub use context::EmailContext;
pub use engine::{ApexEngine, ApexEngineBuilder, EngineStatistics};
pub use enrichment::OsintProvider;
pub use error::{CascadeError, ConfigError, DetectorError, EnrichmentError};
pub use statistics::{StatEvent, StatisticsCollector};
pub use verdict::{Action, ThreatLevel, Verdict};
