//! Drift-adaptive sync tuning, off unless a policy is configured.
//!
//! Each merge round that brings in peer evidence is classified as drifting
//! or stable. A peer delta's implied mean is compared with the last one seen
//! for the same key; a jump larger than `drift_threshold` marks the round.
//! Drifting rounds boost peer weight and halve the sync interval. Stable
//! rounds grow it back one step at a time. The long-run share of drifting
//! rounds selects the forgetting factor.

use crate::config::{validate_forgetting_factor, validate_sync_interval};
use crate::error::{Result, SwarmError};
use crate::types::{PosteriorDelta, PosteriorKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Keeps the implied mean defined for an all-zero delta
const MEAN_SMOOTHING: f64 = 0.001;

/// Tuning knobs for drift-adaptive agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptivePolicy {
    /// Jump in a peer's implied mean (absolute) that counts as drift
    pub drift_threshold: f64,

    /// Multiplier on peer weight for the rest of a drifting round
    pub learning_boost: f64,

    /// Cap on a boosted peer weight
    pub max_peer_weight: f64,

    /// Drift ratio above which decay turns aggressive
    pub aggressive_drift_ratio: f64,

    /// Drift ratio above which decay is moderate
    pub moderate_drift_ratio: f64,

    pub aggressive_forgetting: f64,
    pub moderate_forgetting: f64,
    pub stable_forgetting: f64,

    /// Floor for the halved interval
    pub min_sync_interval: u32,

    /// Ceiling for the grown interval
    pub max_sync_interval: u32,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            drift_threshold: 0.02,
            learning_boost: 1.5,
            max_peer_weight: 0.8,
            aggressive_drift_ratio: 0.30,
            moderate_drift_ratio: 0.15,
            aggressive_forgetting: 0.92,
            moderate_forgetting: 0.95,
            stable_forgetting: 0.98,
            min_sync_interval: 3,
            max_sync_interval: 20,
        }
    }
}

impl AdaptivePolicy {
    pub fn validate(&self) -> Result<()> {
        if !(self.drift_threshold.is_finite() && self.drift_threshold >= 0.0) {
            return Err(SwarmError::invalid(
                "adaptive.drift_threshold",
                format!("must be finite and non-negative, got {}", self.drift_threshold),
            ));
        }
        if !(self.learning_boost.is_finite() && self.learning_boost >= 1.0) {
            return Err(SwarmError::invalid(
                "adaptive.learning_boost",
                format!("must be finite and at least 1, got {}", self.learning_boost),
            ));
        }
        if !(self.max_peer_weight > 0.0 && self.max_peer_weight <= 1.0) {
            return Err(SwarmError::invalid(
                "adaptive.max_peer_weight",
                format!("{} is outside (0, 1]", self.max_peer_weight),
            ));
        }
        for ratio in [self.moderate_drift_ratio, self.aggressive_drift_ratio] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(SwarmError::invalid(
                    "adaptive.drift_ratio",
                    format!("{ratio} is outside [0, 1]"),
                ));
            }
        }
        if self.moderate_drift_ratio > self.aggressive_drift_ratio {
            return Err(SwarmError::invalid(
                "adaptive.drift_ratio",
                "moderate threshold exceeds aggressive threshold",
            ));
        }
        validate_forgetting_factor(self.aggressive_forgetting)?;
        validate_forgetting_factor(self.moderate_forgetting)?;
        validate_forgetting_factor(self.stable_forgetting)?;
        validate_sync_interval(self.min_sync_interval)?;
        if self.max_sync_interval < self.min_sync_interval {
            return Err(SwarmError::invalid(
                "adaptive.max_sync_interval",
                format!(
                    "{} is below min_sync_interval {}",
                    self.max_sync_interval, self.min_sync_interval
                ),
            ));
        }
        Ok(())
    }

    /// Forgetting factor for a long-run drift ratio
    pub fn forgetting_for(&self, drift_ratio: f64) -> f64 {
        if drift_ratio > self.aggressive_drift_ratio {
            self.aggressive_forgetting
        } else if drift_ratio > self.moderate_drift_ratio {
            self.moderate_forgetting
        } else {
            self.stable_forgetting
        }
    }

    /// Boosting never lowers a weight that is already above the cap
    fn boost(&self, peer_weight: f64) -> f64 {
        (peer_weight * self.learning_boost)
            .min(self.max_peer_weight)
            .max(peer_weight)
    }
}

/// Per-agent drift bookkeeping under an [`AdaptivePolicy`]
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveState {
    policy: AdaptivePolicy,
    peer_means: HashMap<PosteriorKey, f64>,
    total_syncs: u64,
    drift_syncs: u64,
    high_drift_count: u32,
}

impl AdaptiveState {
    pub fn new(policy: AdaptivePolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            peer_means: HashMap::new(),
            total_syncs: 0,
            drift_syncs: 0,
            high_drift_count: 0,
        })
    }

    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }

    /// Merge rounds that carried peer evidence
    pub fn total_syncs(&self) -> u64 {
        self.total_syncs
    }

    pub fn drift_syncs(&self) -> u64 {
        self.drift_syncs
    }

    /// Recent drifting rounds not yet cancelled by stable ones
    pub fn high_drift_count(&self) -> u32 {
        self.high_drift_count
    }

    pub fn long_term_drift_ratio(&self) -> f64 {
        if self.total_syncs == 0 {
            return 0.0;
        }
        self.drift_syncs as f64 / self.total_syncs as f64
    }

    /// Population std of the last implied mean seen per key
    pub fn drift_level(&self) -> f64 {
        if self.peer_means.is_empty() {
            return 0.0;
        }
        let n = self.peer_means.len() as f64;
        let mean = self.peer_means.values().sum::<f64>() / n;
        let variance = self
            .peer_means
            .values()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / n;
        variance.sqrt()
    }

    pub fn is_high_drift_mode(&self) -> bool {
        self.high_drift_count > 0
    }

    pub fn is_aggressive_decay_mode(&self) -> bool {
        self.long_term_drift_ratio() > self.policy.aggressive_drift_ratio
    }

    /// Record a peer delta's implied mean; true if it jumped past the threshold
    pub(crate) fn observe_peer(&mut self, delta: &PosteriorDelta) -> bool {
        let implied =
            delta.alpha_delta / (delta.alpha_delta + delta.beta_delta + MEAN_SMOOTHING);
        self.peer_means
            .insert(delta.key.clone(), implied)
            .is_some_and(|last| (implied - last).abs() > self.policy.drift_threshold)
    }

    pub(crate) fn boosted_weight(&self, peer_weight: f64) -> f64 {
        self.policy.boost(peer_weight)
    }

    /// Close a merge round. Returns the new forgetting factor and sync interval.
    pub(crate) fn end_round(&mut self, drift_detected: bool, sync_interval: u32) -> (f64, u32) {
        self.total_syncs += 1;
        if drift_detected {
            self.drift_syncs += 1;
            self.high_drift_count += 1;
        } else {
            self.high_drift_count = self.high_drift_count.saturating_sub(1);
        }

        let forgetting = self.policy.forgetting_for(self.long_term_drift_ratio());
        let interval = if drift_detected {
            (sync_interval / 2).max(self.policy.min_sync_interval)
        } else if self.high_drift_count == 0 && sync_interval < self.policy.max_sync_interval {
            sync_interval + 1
        } else {
            sync_interval
        };
        (forgetting, interval)
    }

    pub fn snapshot(&self) -> AdaptiveSnapshot {
        let mut peer_means: Vec<PeerMean> = self
            .peer_means
            .iter()
            .map(|(key, mean)| PeerMean {
                key: key.clone(),
                mean: *mean,
            })
            .collect();
        peer_means.sort_by(|a, b| a.key.cmp(&b.key));

        AdaptiveSnapshot {
            policy: self.policy.clone(),
            peer_means,
            total_syncs: self.total_syncs,
            drift_syncs: self.drift_syncs,
            high_drift_count: self.high_drift_count,
        }
    }

    pub fn from_snapshot(snapshot: AdaptiveSnapshot) -> Result<Self> {
        let mut state = Self::new(snapshot.policy)?;
        if snapshot.drift_syncs > snapshot.total_syncs {
            return Err(SwarmError::invalid(
                "snapshot",
                format!(
                    "drift_syncs {} exceeds total_syncs {}",
                    snapshot.drift_syncs, snapshot.total_syncs
                ),
            ));
        }
        if let Some(bad) = snapshot
            .peer_means
            .iter()
            .find(|p| !(0.0..=1.0).contains(&p.mean))
        {
            return Err(SwarmError::invalid(
                "snapshot",
                format!("peer mean {} for {} is outside [0, 1]", bad.mean, bad.key),
            ));
        }

        state.peer_means = snapshot
            .peer_means
            .into_iter()
            .map(|p| (p.key, p.mean))
            .collect();
        state.total_syncs = snapshot.total_syncs;
        state.drift_syncs = snapshot.drift_syncs;
        state.high_drift_count = snapshot.high_drift_count;
        Ok(state)
    }
}

/// Last implied mean seen for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMean {
    pub key: PosteriorKey,
    pub mean: f64,
}

/// Persisted form of an [`AdaptiveState`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveSnapshot {
    pub policy: AdaptivePolicy,
    pub peer_means: Vec<PeerMean>,
    pub total_syncs: u64,
    pub drift_syncs: u64,
    pub high_drift_count: u32,
}
