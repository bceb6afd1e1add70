//! Accuracy and calibration bookkeeping.
//!
//! Read-only with respect to agents: the reporter only sees predictions the
//! coordinator hands it and agent state through shared references.

use crate::config::SwarmConfig;
use crate::swarm::agent::{Agent, PRIOR_MEAN};
use crate::swarm::coordinator::SyncStats;
use crate::swarm::drift::DriftMap;
use crate::types::{PosteriorKey, TickRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outputs of one run, consumed by the CLI and tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmReport {
    pub config: SwarmConfig,
    /// Fraction of predictions on the right side of 0.5
    pub accuracy: f64,
    /// Mean squared error of prediction vs. binary outcome
    pub brier_score: f64,
    /// Aggregate drift at the end of the run
    pub average_drift: f64,
    pub mean_absolute_error_from_truth: f64,
    pub consensus_probability_by_key: BTreeMap<String, f64>,
    pub drift_by_key: BTreeMap<String, f64>,
    /// Aggregate drift after every tick
    pub drift_trace: Vec<f64>,
    pub sync_stats: SyncStats,
}

/// Collects (prediction, outcome) pairs over a run
#[derive(Debug, Clone, Default)]
pub struct MetricsReporter {
    predictions: Vec<f64>,
    outcomes: Vec<bool>,
}

impl MetricsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a prediction made before the outcome was known
    pub fn observe(&mut self, prediction: f64, success: bool) {
        self.predictions.push(prediction);
        self.outcomes.push(success);
    }

    pub fn observe_tick(&mut self, records: &[TickRecord]) {
        for record in records {
            self.observe(record.prediction, record.success);
        }
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// Classification accuracy at threshold 0.5 (>= 0.5 predicts success)
    pub fn accuracy(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let correct = self
            .predictions
            .iter()
            .zip(&self.outcomes)
            .filter(|(p, o)| (**p >= 0.5) == **o)
            .count();
        correct as f64 / self.len() as f64
    }

    /// Brier score (lower is better calibrated)
    pub fn brier_score(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .predictions
            .iter()
            .zip(&self.outcomes)
            .map(|(p, o)| {
                let target = if *o { 1.0 } else { 0.0 };
                (p - target).powi(2)
            })
            .sum();
        total / self.len() as f64
    }

    /// Build the run report from final agent state
    pub fn report(
        &self,
        config: &SwarmConfig,
        agents: &[Agent],
        ground_truth: &BTreeMap<PosteriorKey, f64>,
        drift: &DriftMap,
        drift_trace: Vec<f64>,
        sync_stats: SyncStats,
    ) -> SwarmReport {
        // Ground-truth keys when known, otherwise whatever the agents learned
        let keys: Vec<PosteriorKey> = if ground_truth.is_empty() {
            drift.by_key.keys().cloned().collect()
        } else {
            ground_truth.keys().cloned().collect()
        };

        let consensus_probability_by_key = keys
            .iter()
            .map(|k| (k.to_string(), consensus_probability(agents, k)))
            .collect();

        SwarmReport {
            config: config.clone(),
            accuracy: self.accuracy(),
            brier_score: self.brier_score(),
            average_drift: drift.aggregate(),
            mean_absolute_error_from_truth: mean_absolute_error(agents, ground_truth),
            consensus_probability_by_key,
            drift_by_key: drift.to_display_map(),
            drift_trace,
            sync_stats,
        }
    }
}

/// Average belief across agents (prior mean for an empty swarm)
pub fn consensus_probability(agents: &[Agent], key: &PosteriorKey) -> f64 {
    if agents.is_empty() {
        return PRIOR_MEAN;
    }
    let sum: f64 = agents.iter().map(|a| a.get_probability(key)).sum();
    sum / agents.len() as f64
}

/// Mean absolute error of consensus beliefs against true success rates
pub fn mean_absolute_error(agents: &[Agent], ground_truth: &BTreeMap<PosteriorKey, f64>) -> f64 {
    if ground_truth.is_empty() {
        return 0.0;
    }
    let total: f64 = ground_truth
        .iter()
        .map(|(key, truth)| (consensus_probability(agents, key) - truth).abs())
        .sum();
    total / ground_truth.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_reporter() {
        let metrics = MetricsReporter::new();
        assert_eq!(metrics.accuracy(), 0.0);
        assert_eq!(metrics.brier_score(), 0.0);
    }

    #[test]
    fn test_accuracy_threshold_and_brier() {
        let mut metrics = MetricsReporter::new();
        metrics.observe(0.5, true); // correct: 0.5 predicts success
        metrics.observe(0.5, false); // wrong
        metrics.observe(0.9, true); // correct
        metrics.observe(0.2, false); // correct

        assert!((metrics.accuracy() - 0.75).abs() < 1e-12);
        let expected_brier = (0.25 + 0.25 + 0.01 + 0.04) / 4.0;
        assert!((metrics.brier_score() - expected_brier).abs() < 1e-12);
    }

    #[test]
    fn test_consensus_and_mae() {
        let key = PosteriorKey::new("yagni", "architecture");
        let mut a = Agent::new("a", 10, 0.95).unwrap();
        let b = Agent::new("b", 10, 0.95).unwrap();
        for _ in 0..2 {
            a.record_outcome(&key, true);
        }
        // a: 3/4, b: prior 0.5
        let agents = vec![a, b];
        assert!((consensus_probability(&agents, &key) - 0.625).abs() < 1e-12);

        let truth: BTreeMap<_, _> = [(key.clone(), 0.75)].into_iter().collect();
        assert!((mean_absolute_error(&agents, &truth) - 0.125).abs() < 1e-12);
        assert_eq!(mean_absolute_error(&agents, &BTreeMap::new()), 0.0);
    }
}
