//! Cross-agent disagreement.
//!
//! Drift for a key is the population standard deviation of every agent's
//! mean for that key. An agent that has never seen the key counts with the
//! prior mean 0.5, so drift is inflated (or deflated) until all agents have
//! met the key. Observability only; nothing in the protocol reads it.

use crate::swarm::agent::Agent;
use crate::types::PosteriorKey;
use std::collections::{BTreeMap, BTreeSet};

/// Per-key drift snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriftMap {
    pub by_key: BTreeMap<PosteriorKey, f64>,
}

impl DriftMap {
    /// Average of per-key drift, 0 when no key is known
    pub fn aggregate(&self) -> f64 {
        if self.by_key.is_empty() {
            return 0.0;
        }
        self.by_key.values().sum::<f64>() / self.by_key.len() as f64
    }

    pub fn get(&self, key: &PosteriorKey) -> Option<f64> {
        self.by_key.get(key).copied()
    }

    /// Keys rendered for reports
    pub fn to_display_map(&self) -> BTreeMap<String, f64> {
        self.by_key
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }
}

/// Drift across the union of keys known to any agent
pub fn compute_drift(agents: &[Agent]) -> DriftMap {
    let keys: BTreeSet<&PosteriorKey> = agents.iter().flat_map(|a| a.keys()).collect();

    let by_key = keys
        .into_iter()
        .map(|key| {
            let means: Vec<f64> = agents.iter().map(|a| a.get_probability(key)).collect();
            (key.clone(), population_std(&means))
        })
        .collect();

    DriftMap { by_key }
}

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Tracks aggregate drift over a run
#[derive(Debug, Clone, Default)]
pub struct DriftMonitor {
    history: Vec<f64>,
}

impl DriftMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute drift for the current state and remember its aggregate
    pub fn observe(&mut self, agents: &[Agent]) -> DriftMap {
        let drift = compute_drift(agents);
        self.history.push(drift.aggregate());
        drift
    }

    /// Aggregate drift per observed tick
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn peak(&self) -> f64 {
        self.history.iter().copied().fold(0.0, f64::max)
    }

    pub fn into_history(self) -> Vec<f64> {
        self.history
    }
}
