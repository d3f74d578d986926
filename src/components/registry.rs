//! Detector Registry
//!
//! Holds every configured layer with its availability. Layers that are
//! disabled or fail to construct stay listed but never run.

use crate::components::{Detector, Tier};
use crate::config::{Config, DetectorKind, LayerConfig};
use crate::detectors;
use crate::error::DetectorError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Availability {
    Active,
    Disabled,
    Unavailable(String),
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Active => f.write_str("active"),
            Availability::Disabled => f.write_str("disabled"),
            Availability::Unavailable(reason) => write!(f, "unavailable ({reason})"),
        }
    }
}

pub struct RegisteredLayer {
    pub name: String,
    pub tier: Tier,
    pub weight: f64,
    pub timeout: Duration,
    pub availability: Availability,
    detector: Option<Arc<dyn Detector>>,
}

impl RegisteredLayer {
    pub fn detector(&self) -> Option<&Arc<dyn Detector>> {
        self.detector.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.availability == Availability::Active
    }

    pub fn describe(&self) -> String {
        match &self.detector {
            Some(detector) => detector.describe(),
            None => "-".to_string(),
        }
    }
}

#[derive(Default)]
pub struct DetectorRegistry {
    layers: Vec<RegisteredLayer>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Build every configured layer. `external` supplies collaborators for
    /// layers of kind `External`, keyed by layer name.
    pub fn from_config(config: &Config, external: &HashMap<String, Arc<dyn Detector>>) -> Self {
        let mut registry = Self::new();
        let default_timeout = Duration::from_secs(config.ensemble.detector_timeout_seconds);

        for layer in &config.layers {
            // Disabled layers are never constructed
            let detector = match &layer.detector {
                _ if !layer.enabled => Err(DetectorError::Unavailable("disabled".to_string())),
                DetectorKind::External => external.get(&layer.name).cloned().ok_or_else(|| {
                    DetectorError::Unavailable("no collaborator supplied".to_string())
                }),
                _ => detectors::build(layer),
            };
            registry.register(layer, default_timeout, detector);
        }

        log::info!(
            "Detector registry ready - active layers: {:?}",
            registry.active_layer_names()
        );
        registry
    }

    /// Record a layer. A construction failure marks it unavailable.
    pub fn register(
        &mut self,
        config: &LayerConfig,
        default_timeout: Duration,
        detector: Result<Arc<dyn Detector>, DetectorError>,
    ) {
        let timeout = config
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);

        let (availability, detector) = if !config.enabled {
            (Availability::Disabled, None)
        } else {
            match detector {
                Ok(detector) => {
                    log::info!("Loaded {} detector for {}", config.name, config.tier);
                    (Availability::Active, Some(detector))
                }
                Err(e) => {
                    log::warn!("{} not available: {}", config.name, e);
                    (Availability::Unavailable(e.to_string()), None)
                }
            }
        };

        self.layers.push(RegisteredLayer {
            name: config.name.clone(),
            tier: config.tier,
            weight: config.weight,
            timeout,
            availability,
            detector,
        });
    }

    /// Active layers of one tier, in registration order
    pub fn active(&self, tier: Tier) -> Vec<&RegisteredLayer> {
        self.layers
            .iter()
            .filter(|l| l.tier == tier && l.is_active())
            .collect()
    }

    pub fn layers(&self) -> &[RegisteredLayer] {
        &self.layers
    }

    pub fn active_layer_names(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|l| l.is_active())
            .map(|l| l.name.clone())
            .collect()
    }

    /// Fusion weight per layer name
    pub fn weights(&self) -> HashMap<String, f64> {
        self.layers
            .iter()
            .map(|l| (l.name.clone(), l.weight))
            .collect()
    }
}
