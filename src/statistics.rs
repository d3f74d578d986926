use crate::components::{DetectionLayerResult, Tier};
use crate::verdict::{Action, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerStats {
    pub layer_name: String,
    pub executions: u64,
    pub errors: u64,
    pub detections: u64,
    pub total_processing_time_ms: f64,
}

impl LayerStats {
    fn new(layer_name: &str) -> Self {
        Self {
            layer_name: layer_name.to_string(),
            executions: 0,
            errors: 0,
            detections: 0,
            total_processing_time_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_emails: u64,
    pub total_allows: u64,
    pub total_tags: u64,
    pub total_warns: u64,
    pub total_quarantines: u64,
    pub total_blocks: u64,
    pub prefilter_short_circuits: u64,
    pub critical_short_circuits: u64,
    pub stage_c_runs: u64,
    pub stage_d_runs: u64,
    pub pipeline_failures: u64,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl GlobalStats {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            total_emails: 0,
            total_allows: 0,
            total_tags: 0,
            total_warns: 0,
            total_quarantines: 0,
            total_blocks: 0,
            prefilter_short_circuits: 0,
            critical_short_circuits: 0,
            stage_c_runs: 0,
            stage_d_runs: 0,
            pipeline_failures: 0,
            start_time: now,
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StatEvent {
    EmailProcessed { action: Action },
    LayerOutcome {
        layer_name: String,
        executed: bool,
        failed: bool,
        detected: bool,
        processing_time_ms: f64,
    },
    PrefilterShortCircuit,
    CriticalShortCircuit,
    StageRun(Tier),
    PipelineFailure,
}

#[derive(Debug)]
struct StatsState {
    global: GlobalStats,
    layers: HashMap<String, LayerStats>,
}

/// In-memory counters for the lifetime of the engine.
#[derive(Debug)]
pub struct StatisticsCollector {
    state: Mutex<StatsState>,
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StatsState {
                global: GlobalStats::new(),
                layers: HashMap::new(),
            }),
        }
    }

    pub fn record_event(&self, event: StatEvent) {
        match self.state.lock() {
            Ok(mut state) => Self::process_event(event, &mut state),
            Err(e) => log::warn!("Failed to record statistics event: {e}"),
        }
    }

    /// Record the action and every layer outcome carried by a verdict.
    pub fn record_verdict(&self, verdict: &Verdict) {
        for layer in &verdict.layers {
            self.record_event(Self::layer_event(layer));
        }
        self.record_event(StatEvent::EmailProcessed {
            action: verdict.action,
        });
    }

    fn layer_event(layer: &DetectionLayerResult) -> StatEvent {
        StatEvent::LayerOutcome {
            layer_name: layer.layer_name.clone(),
            executed: layer.executed,
            failed: layer.error.is_some(),
            detected: layer.detected,
            processing_time_ms: layer.duration_ms,
        }
    }

    fn process_event(event: StatEvent, state: &mut StatsState) {
        let global = &mut state.global;
        global.last_updated = Utc::now();

        match event {
            StatEvent::EmailProcessed { action } => {
                global.total_emails += 1;
                match action {
                    Action::Allow => global.total_allows += 1,
                    Action::Tag => global.total_tags += 1,
                    Action::Warn => global.total_warns += 1,
                    Action::Quarantine => global.total_quarantines += 1,
                    Action::Block => global.total_blocks += 1,
                }
            }
            StatEvent::LayerOutcome {
                layer_name,
                executed,
                failed,
                detected,
                processing_time_ms,
            } => {
                // Skipped layers are not counted
                if !executed && !failed {
                    return;
                }
                let stats = state
                    .layers
                    .entry(layer_name.clone())
                    .or_insert_with(|| LayerStats::new(&layer_name));
                stats.executions += 1;
                stats.total_processing_time_ms += processing_time_ms;
                if failed {
                    stats.errors += 1;
                } else if detected {
                    stats.detections += 1;
                }
            }
            StatEvent::PrefilterShortCircuit => global.prefilter_short_circuits += 1,
            StatEvent::CriticalShortCircuit => global.critical_short_circuits += 1,
            StatEvent::StageRun(Tier::Feature) => global.stage_c_runs += 1,
            StatEvent::StageRun(Tier::Deep) => global.stage_d_runs += 1,
            StatEvent::StageRun(_) => {}
            StatEvent::PipelineFailure => global.pipeline_failures += 1,
        }
    }

    /// Global counters plus per-layer stats sorted by layer name.
    pub fn get_stats(&self) -> (GlobalStats, Vec<LayerStats>) {
        match self.state.lock() {
            Ok(state) => {
                let mut layers: Vec<LayerStats> = state.layers.values().cloned().collect();
                layers.sort_by(|a, b| a.layer_name.cmp(&b.layer_name));
                (state.global.clone(), layers)
            }
            Err(e) => {
                log::warn!("Failed to read statistics: {e}");
                (GlobalStats::new(), Vec::new())
            }
        }
    }

    pub fn reset_stats(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.global = GlobalStats::new();
            state.layers.clear();
        }
    }
}
