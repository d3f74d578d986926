//! OSINT enrichment collaborators
//!
//! Breach history, lookalike-domain and reputation signals for the sender.
//! Everything here is advisory: callers swallow every `EnrichmentError`.

use crate::config::OsintProviderConfig;
use crate::error::EnrichmentError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BecReport {
    pub detected: bool,
    pub score: f64,
    pub reason: String,
    pub suspicious_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtoReport {
    pub detected: bool,
    pub score: f64,
    pub reason: String,
    pub breach_count: u32,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationReport {
    pub score: f64,
}

impl Default for ReputationReport {
    // Neutral reputation when the provider has no opinion
    fn default() -> Self {
        Self { score: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationReport {
    pub valid: bool,
}

impl Default for VerificationReport {
    fn default() -> Self {
        Self { valid: true }
    }
}

#[async_trait]
pub trait OsintProvider: Send + Sync {
    async fn check_bec(&self, address: &str) -> Result<BecReport, EnrichmentError>;
    async fn check_ato(&self, address: &str) -> Result<AtoReport, EnrichmentError>;
    async fn reputation(&self, address: &str) -> Result<ReputationReport, EnrichmentError>;
    async fn verify(&self, address: &str) -> Result<VerificationReport, EnrichmentError>;
}

/// Runs `<program> [args..] <operation> <address>` and parses JSON from stdout.
pub struct CommandOsintProvider {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandOsintProvider {
    pub fn new(config: &OsintProviderConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    async fn run<T: DeserializeOwned>(
        &self,
        operation: &str,
        address: &str,
    ) -> Result<T, EnrichmentError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(operation)
            .arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| EnrichmentError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(EnrichmentError::Provider(format!(
                "{} {} exited with {}: {}",
                self.program,
                operation,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl OsintProvider for CommandOsintProvider {
    async fn check_bec(&self, address: &str) -> Result<BecReport, EnrichmentError> {
        self.run("bec", address).await
    }

    async fn check_ato(&self, address: &str) -> Result<AtoReport, EnrichmentError> {
        self.run("ato", address).await
    }

    async fn reputation(&self, address: &str) -> Result<ReputationReport, EnrichmentError> {
        self.run("reputation", address).await
    }

    async fn verify(&self, address: &str) -> Result<VerificationReport, EnrichmentError> {
        self.run("verify", address).await
    }
}
