//! Simulation / production parameters for a swarm run.
//!
//! A `SwarmConfig` is built once (defaults, JSON file, or CLI flags),
//! validated, and then handed by value to the coordinator or runtime.
//! Nothing reads configuration from global state.

use crate::error::{Result, SwarmError};
use crate::swarm::adaptive::AdaptivePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a multi-agent sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Number of independent agents
    pub agent_count: usize,

    /// Outcomes each agent records (one per tick)
    pub outcomes_per_agent: usize,

    /// Probability a sampled outcome's underlying rate is perturbed
    pub drift_rate: f64,

    /// Whether agents exchange deltas at all
    pub sync_enabled: bool,

    /// Outcomes an agent buffers before its deltas are harvested
    pub sync_interval_outcomes: u32,

    /// Probability each drained delta is lost in transit
    pub sync_failure_rate: f64,

    /// Decay applied to every posterior once per synced tick
    pub forgetting_factor: f64,

    /// Seed for outcome sampling and the loss channel
    pub seed: u64,

    /// Drift-adaptive interval and forgetting; `None` keeps both fixed
    pub adaptive: Option<AdaptivePolicy>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            agent_count: 3,
            outcomes_per_agent: 500,
            drift_rate: 0.25,
            sync_enabled: true,
            sync_interval_outcomes: 10,
            sync_failure_rate: 0.0,
            forgetting_factor: 0.95,
            seed: 42,
            adaptive: None,
        }
    }
}

impl SwarmConfig {
    /// Load from a JSON file; absent fields fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SwarmConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed parameters before any tick runs.
    pub fn validate(&self) -> Result<()> {
        if self.agent_count == 0 {
            return Err(SwarmError::invalid("agent_count", "must be at least 1"));
        }
        validate_unit_interval("drift_rate", self.drift_rate)?;
        validate_unit_interval("sync_failure_rate", self.sync_failure_rate)?;
        validate_sync_interval(self.sync_interval_outcomes)?;
        validate_forgetting_factor(self.forgetting_factor)?;
        if let Some(policy) = &self.adaptive {
            policy.validate()?;
        }
        Ok(())
    }
}

/// `factor` must lie in (0, 1].
pub fn validate_forgetting_factor(factor: f64) -> Result<()> {
    if factor > 0.0 && factor <= 1.0 {
        Ok(())
    } else {
        Err(SwarmError::invalid(
            "forgetting_factor",
            format!("{factor} is outside (0, 1]"),
        ))
    }
}

pub fn validate_sync_interval(interval: u32) -> Result<()> {
    if interval == 0 {
        return Err(SwarmError::invalid(
            "sync_interval_outcomes",
            "must be at least 1",
        ));
    }
    Ok(())
}

fn validate_unit_interval(name: &'static str, value: f64) -> Result<()> {
    // Written so NaN fails the check
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SwarmError::invalid(name, format!("{value} is outside [0, 1]")))
    }
}
