//! Built-in detector collaborators
//!
//! Thin adapters only: keyword rules, regex signatures and external scanner
//! programs. Heavier classifiers are supplied through the engine builder.

pub mod basic_rules;
pub mod command;
pub mod signatures;

use crate::components::{Detector, DetectorOutput};
use crate::config::{DetectorKind, LayerConfig};
use crate::context::EmailContext;
use crate::error::DetectorError;
use async_trait::async_trait;
use std::sync::Arc;

/// Construct the built-in detector a layer names. `External` layers have no
/// built-in implementation.
pub fn build(layer: &LayerConfig) -> Result<Arc<dyn Detector>, DetectorError> {
    match &layer.detector {
        DetectorKind::BasicRules(config) => {
            Ok(Arc::new(basic_rules::BasicRulesDetector::new(config)?))
        }
        DetectorKind::Signatures(config) => Ok(Arc::new(Blocking::new(
            signatures::SignatureDetector::load(config)?,
        ))),
        DetectorKind::Command(config) => Ok(Arc::new(command::CommandDetector::new(config)?)),
        DetectorKind::External => Err(DetectorError::Unavailable(format!(
            "{} requires an externally supplied detector",
            layer.name
        ))),
    }
}

/// Synchronous, CPU-bound detector.
pub trait BlockingDetector: Send + Sync + 'static {
    fn evaluate_blocking(&self, email: &EmailContext) -> Result<DetectorOutput, DetectorError>;

    fn describe(&self) -> String;
}

/// Runs a [`BlockingDetector`] on the blocking thread pool.
pub struct Blocking<D> {
    inner: Arc<D>,
}

impl<D: BlockingDetector> Blocking<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

#[async_trait]
impl<D: BlockingDetector> Detector for Blocking<D> {
    async fn evaluate(&self, email: &EmailContext) -> Result<DetectorOutput, DetectorError> {
        let inner = Arc::clone(&self.inner);
        let email = email.clone();
        tokio::task::spawn_blocking(move || inner.evaluate_blocking(&email))
            .await
            .map_err(|e| DetectorError::Panicked(e.to_string()))?
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}
