//! Outcome sources for simulated agents
//!
//! - `DriftingOracle`: synthetic outcomes from known success rates, with
//!   per-agent drift so agents see slightly different worlds
//! - `ReplayOracle`: recorded real outcomes, cycled in order

use crate::error::{Result, SwarmError};
use crate::types::{Observation, OutcomeOracle, PosteriorKey};
use rand::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Maximum absolute shift applied to a rate when drift kicks in
pub const MAX_DRIFT_SHIFT: f64 = 0.20;

/// Bounds a drifted rate is clamped into
pub const MIN_DRIFTED_RATE: f64 = 0.1;
pub const MAX_DRIFTED_RATE: f64 = 0.9;

/// Canonical principle/domain pairs and their true success rates
const CANONICAL_RATES: [(&str, &str, f64); 8] = [
    ("yagni", "architecture", 0.75),
    ("kiss", "architecture", 0.70),
    ("tdd", "testing", 0.80),
    ("red-green-refactor", "testing", 0.65),
    ("horizontal-scale", "scaling", 0.60),
    ("brooks-law", "management", 0.85),
    ("defense-in-depth", "security", 0.70),
    ("measure-first", "performance", 0.75),
];

/// The world agents learn about: keys, true rates, and how often each agent
/// sees a distorted version of it
#[derive(Debug, Clone, PartialEq)]
pub struct DriftScenario {
    keys: Vec<PosteriorKey>,
    ground_truth: BTreeMap<PosteriorKey, f64>,
    drift_rate: f64,
}

impl DriftScenario {
    /// The eight canonical principles with the given drift rate
    pub fn canonical(drift_rate: f64) -> Result<Self> {
        let rates = CANONICAL_RATES
            .iter()
            .map(|(p, d, r)| (PosteriorKey::new(*p, *d), *r))
            .collect();
        Self::new(rates, drift_rate)
    }

    /// Custom scenario. Keys are sampled in the order given.
    pub fn new(rates: Vec<(PosteriorKey, f64)>, drift_rate: f64) -> Result<Self> {
        if rates.is_empty() {
            return Err(SwarmError::invalid("scenario", "needs at least one key"));
        }
        if !(0.0..=1.0).contains(&drift_rate) {
            return Err(SwarmError::invalid(
                "drift_rate",
                format!("must be in [0, 1], got {drift_rate}"),
            ));
        }
        for (key, rate) in &rates {
            if !(0.0..=1.0).contains(rate) {
                return Err(SwarmError::invalid(
                    "scenario",
                    format!("rate for {key} must be in [0, 1], got {rate}"),
                ));
            }
        }

        let keys = rates.iter().map(|(k, _)| k.clone()).collect();
        let ground_truth = rates.into_iter().collect();
        Ok(Self {
            keys,
            ground_truth,
            drift_rate,
        })
    }

    /// Same keys and rates, different drift rate
    pub fn with_drift_rate(&self, drift_rate: f64) -> Result<Self> {
        let rates = self
            .keys
            .iter()
            .map(|k| (k.clone(), self.base_rate(k)))
            .collect();
        Self::new(rates, drift_rate)
    }

    pub fn keys(&self) -> &[PosteriorKey] {
        &self.keys
    }

    pub fn ground_truth(&self) -> &BTreeMap<PosteriorKey, f64> {
        &self.ground_truth
    }

    pub fn drift_rate(&self) -> f64 {
        self.drift_rate
    }

    /// True rate for a key (0.5 for keys outside the scenario)
    pub fn base_rate(&self, key: &PosteriorKey) -> f64 {
        self.ground_truth.get(key).copied().unwrap_or(0.5)
    }
}

/// Synthetic outcomes for one agent.
///
/// Even-indexed agents drift up and odd-indexed agents drift down by the
/// same draw, so the swarm disagrees systematically rather than randomly.
pub struct DriftingOracle {
    agent_index: usize,
    scenario: Arc<DriftScenario>,
    rng: StdRng,
}

impl DriftingOracle {
    pub fn new(agent_index: usize, seed: u64, scenario: Arc<DriftScenario>) -> Self {
        Self {
            agent_index,
            scenario,
            rng: StdRng::seed_from_u64(agent_seed(seed, agent_index)),
        }
    }

    /// Rate this agent sees for `key` on one draw
    fn effective_rate(&mut self, key: &PosteriorKey) -> f64 {
        let base = self.scenario.base_rate(key);
        if self.rng.gen::<f64>() >= self.scenario.drift_rate {
            return base;
        }

        let mut shift = self.rng.gen_range(-MAX_DRIFT_SHIFT..=MAX_DRIFT_SHIFT);
        if self.agent_index % 2 == 1 {
            shift = -shift;
        }
        (base + shift).clamp(MIN_DRIFTED_RATE, MAX_DRIFTED_RATE)
    }
}

impl OutcomeOracle for DriftingOracle {
    fn next_observation(&mut self) -> Observation {
        let scenario = Arc::clone(&self.scenario);
        let key = scenario.keys[self.rng.gen_range(0..scenario.keys.len())].clone();
        let rate = self.effective_rate(&key);
        let success = self.rng.gen::<f64>() < rate;
        Observation { key, success }
    }
}

/// Independent stream per agent derived from the run seed
fn agent_seed(seed: u64, agent_index: usize) -> u64 {
    seed ^ (agent_index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Recorded outcomes played back in order, wrapping at the end
#[derive(Debug, Clone)]
pub struct ReplayOracle {
    observations: Arc<Vec<Observation>>,
    cursor: usize,
}

impl ReplayOracle {
    /// `offset` staggers agents sharing one recording
    pub fn new(observations: Arc<Vec<Observation>>, offset: usize) -> Result<Self> {
        if observations.is_empty() {
            return Err(SwarmError::invalid("replay", "recording has no observations"));
        }
        let cursor = offset % observations.len();
        Ok(Self {
            observations,
            cursor,
        })
    }

    /// Load a JSON array of `{ "key": {..}, "success": bool }`
    pub fn load_recording(path: &Path) -> Result<Vec<Observation>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl OutcomeOracle for ReplayOracle {
    fn next_observation(&mut self) -> Observation {
        let observation = self.observations[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.observations.len();
        observation
    }
}

/// Ground truth estimated from a recording: per-key success frequency
pub fn empirical_rates(observations: &[Observation]) -> BTreeMap<PosteriorKey, f64> {
    let mut counts: BTreeMap<PosteriorKey, (u32, u32)> = BTreeMap::new();
    for obs in observations {
        let entry = counts.entry(obs.key.clone()).or_default();
        entry.1 += 1;
        if obs.success {
            entry.0 += 1;
        }
    }
    counts
        .into_iter()
        .map(|(key, (wins, total))| (key, f64::from(wins) / f64::from(total)))
        .collect()
}
