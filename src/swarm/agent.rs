//! A single learning agent with private posteriors.
//!
//! Protocol, from the agent's side:
//! 1. Record an outcome → local posterior update (immediate)
//! 2. Buffer a delta describing that update
//! 3. When the coordinator harvests, hand over the buffer exactly once
//! 4. Merge peer deltas, weighted by relative confidence
//! 5. Decay every posterior toward the prior
//!
//! With an [`AdaptivePolicy`] attached, step 4 also tunes the agent's own
//! sync interval and forgetting factor (see [`crate::swarm::adaptive`]).

use crate::config::{validate_forgetting_factor, validate_sync_interval};
use crate::error::{Result, SwarmError};
use crate::swarm::adaptive::{AdaptivePolicy, AdaptiveSnapshot, AdaptiveState};
use crate::swarm::posterior::Posterior;
use crate::types::{PosteriorDelta, PosteriorKey};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Mean reported for a key the agent has never seen
pub const PRIOR_MEAN: f64 = 0.5;

/// Variance reported for a key the agent has never seen
pub const PRIOR_VARIANCE: f64 = 0.25;

/// Independent learner owning its posteriors exclusively
#[derive(Debug)]
pub struct Agent {
    id: String,
    posteriors: HashMap<PosteriorKey, Posterior>,
    pending_deltas: Vec<PosteriorDelta>,
    sync_interval: u32,
    outcomes_since_sync: u32,
    forgetting_factor: f64,
    adaptive: Option<AdaptiveState>,
}

impl Agent {
    pub fn new(id: impl Into<String>, sync_interval: u32, forgetting_factor: f64) -> Result<Self> {
        validate_sync_interval(sync_interval)?;
        validate_forgetting_factor(forgetting_factor)?;
        Ok(Self {
            id: id.into(),
            posteriors: HashMap::new(),
            pending_deltas: Vec::new(),
            sync_interval,
            outcomes_since_sync: 0,
            forgetting_factor,
            adaptive: None,
        })
    }

    /// Let merge rounds retune this agent's interval and forgetting factor
    pub fn with_adaptive(mut self, policy: AdaptivePolicy) -> Result<Self> {
        self.adaptive = Some(AdaptiveState::new(policy)?);
        Ok(self)
    }

    pub fn adaptive(&self) -> Option<&AdaptiveState> {
        self.adaptive.as_ref()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sync_interval(&self) -> u32 {
        self.sync_interval
    }

    pub fn forgetting_factor(&self) -> f64 {
        self.forgetting_factor
    }

    /// Record an outcome, update the local posterior and buffer a delta for peers
    pub fn record_outcome(&mut self, key: &PosteriorKey, success: bool) -> &PosteriorDelta {
        let posterior = get_or_create(&mut self.posteriors, key);

        let old_alpha = posterior.alpha;
        let old_beta = posterior.beta;
        posterior.update(success);

        let delta = PosteriorDelta {
            agent_id: self.id.clone(),
            key: key.clone(),
            alpha_delta: posterior.alpha - old_alpha,
            beta_delta: posterior.beta - old_beta,
            confidence: posterior.confidence(),
        };

        self.outcomes_since_sync += 1;
        self.pending_deltas.push(delta);
        &self.pending_deltas[self.pending_deltas.len() - 1]
    }

    /// Check if the buffer reached the sync threshold
    pub fn needs_sync(&self) -> bool {
        self.outcomes_since_sync >= self.sync_interval
    }

    /// Hand over all buffered deltas and reset the counter.
    ///
    /// At-most-once: a drained delta that is lost in transit is gone.
    pub fn drain_deltas(&mut self) -> Vec<PosteriorDelta> {
        self.outcomes_since_sync = 0;
        std::mem::take(&mut self.pending_deltas)
    }

    pub fn pending_len(&self) -> usize {
        self.pending_deltas.len()
    }

    /// Merge one peer delta, weighted by relative confidence.
    ///
    /// Returns `false` for the agent's own deltas, which are never merged,
    /// and for malformed ones (see [`PosteriorDelta::is_well_formed`]).
    /// Not idempotent: merging the same delta twice counts its evidence
    /// twice, so each delta must reach a recipient at most once.
    pub fn apply_peer_delta(&mut self, delta: &PosteriorDelta) -> bool {
        self.apply_peer_deltas(std::slice::from_ref(delta)) == 1
    }

    /// Merge a batch as one round, returning how many deltas were applied
    pub fn apply_peer_deltas(&mut self, deltas: &[PosteriorDelta]) -> usize {
        let mut drift_detected = false;
        let applied = deltas
            .iter()
            .filter(|delta| self.merge(delta, &mut drift_detected))
            .count();

        if applied > 0 {
            if let Some(adaptive) = self.adaptive.as_mut() {
                let (factor, interval) = adaptive.end_round(drift_detected, self.sync_interval);
                self.forgetting_factor = factor;
                self.sync_interval = interval;
            }
        }
        applied
    }

    /// Once drift shows up in a round, every later delta of that round is boosted
    fn merge(&mut self, delta: &PosteriorDelta, drift_detected: &mut bool) -> bool {
        if delta.agent_id == self.id {
            return false;
        }
        if !delta.is_well_formed() {
            warn!(
                agent = %self.id,
                from = %delta.agent_id,
                key = %delta.key,
                "rejecting malformed peer delta"
            );
            return false;
        }

        if let Some(adaptive) = self.adaptive.as_mut() {
            *drift_detected |= adaptive.observe_peer(delta);
        }

        let posterior = get_or_create(&mut self.posteriors, &delta.key);
        let local_confidence = posterior.confidence();
        let mut peer_weight = delta.confidence / (local_confidence + delta.confidence);
        if *drift_detected {
            if let Some(adaptive) = &self.adaptive {
                peer_weight = adaptive.boosted_weight(peer_weight);
            }
        }

        posterior.alpha += delta.alpha_delta * peer_weight;
        posterior.beta += delta.beta_delta * peer_weight;
        true
    }

    /// Apply the forgetting factor to all posteriors
    pub fn apply_decay(&mut self) {
        let factor = self.forgetting_factor;
        for posterior in self.posteriors.values_mut() {
            // Factor validated at construction
            let _ = posterior.decay(factor);
        }
    }

    /// Success probability, or the prior mean for an unseen key
    pub fn get_probability(&self, key: &PosteriorKey) -> f64 {
        self.posteriors
            .get(key)
            .map(|p| p.mean())
            .unwrap_or(PRIOR_MEAN)
    }

    /// Uncertainty, or the prior default for an unseen key
    pub fn get_variance(&self, key: &PosteriorKey) -> f64 {
        self.posteriors
            .get(key)
            .map(|p| p.variance())
            .unwrap_or(PRIOR_VARIANCE)
    }

    pub fn get_observations(&self, key: &PosteriorKey) -> u32 {
        self.posteriors
            .get(key)
            .map(|p| p.observations)
            .unwrap_or(0)
    }

    /// Thompson sample; uniform on an unseen key
    pub fn sample_probability(&self, key: &PosteriorKey, rng: &mut impl Rng) -> f64 {
        match self.posteriors.get(key) {
            Some(p) => p.sample(rng),
            None => Posterior::default().sample(rng),
        }
    }

    pub fn posterior(&self, key: &PosteriorKey) -> Option<&Posterior> {
        self.posteriors.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PosteriorKey> {
        self.posteriors.keys()
    }

    /// Serializable copy of the full agent state, pending deltas included
    pub fn snapshot(&self) -> AgentSnapshot {
        let mut posteriors: Vec<PosteriorEntry> = self
            .posteriors
            .iter()
            .map(|(key, posterior)| PosteriorEntry {
                key: key.clone(),
                posterior: posterior.clone(),
            })
            .collect();
        posteriors.sort_by(|a, b| a.key.cmp(&b.key));

        AgentSnapshot {
            agent_id: self.id.clone(),
            sync_interval: self.sync_interval,
            forgetting_factor: self.forgetting_factor,
            outcomes_since_sync: self.outcomes_since_sync,
            posteriors,
            pending_deltas: self
                .pending_deltas
                .iter()
                .map(|d| PosteriorDelta {
                    agent_id: d.agent_id.clone(),
                    key: d.key.clone(),
                    alpha_delta: d.alpha_delta,
                    beta_delta: d.beta_delta,
                    confidence: d.confidence,
                })
                .collect(),
            adaptive: self.adaptive.as_ref().map(AdaptiveState::snapshot),
        }
    }

    /// Rebuild an agent from a snapshot, re-validating all of it.
    ///
    /// Posteriors must be valid Beta parameters and pending deltas well
    /// formed; a corrupt file or row fails here instead of poisoning merges.
    pub fn from_snapshot(snapshot: AgentSnapshot) -> Result<Self> {
        if let Some(entry) = snapshot.posteriors.iter().find(|e| !e.posterior.is_valid()) {
            return Err(SwarmError::invalid(
                "snapshot",
                format!(
                    "posterior {} has alpha {} beta {}, both must be finite and at least 1",
                    entry.key, entry.posterior.alpha, entry.posterior.beta
                ),
            ));
        }
        if let Some(delta) = snapshot.pending_deltas.iter().find(|d| !d.is_well_formed()) {
            return Err(SwarmError::invalid(
                "snapshot",
                format!(
                    "pending delta for {} has non-finite or negative values",
                    delta.key
                ),
            ));
        }

        let mut agent = Agent::new(
            snapshot.agent_id,
            snapshot.sync_interval,
            snapshot.forgetting_factor,
        )?;
        agent.adaptive = snapshot
            .adaptive
            .map(AdaptiveState::from_snapshot)
            .transpose()?;
        agent.outcomes_since_sync = snapshot.outcomes_since_sync;
        agent.pending_deltas = snapshot.pending_deltas;
        agent.posteriors = snapshot
            .posteriors
            .into_iter()
            .map(|entry| (entry.key, entry.posterior))
            .collect();
        Ok(agent)
    }

    /// Export state for persistence
    pub fn export(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Import state from persistence
    pub fn import(json: &str) -> Result<Self> {
        let snapshot: AgentSnapshot = serde_json::from_str(json)?;
        Agent::from_snapshot(snapshot)
    }
}

/// Get-or-create with the uniform prior. The only path that inserts a
/// posterior; reads never do.
fn get_or_create<'a>(
    posteriors: &'a mut HashMap<PosteriorKey, Posterior>,
    key: &PosteriorKey,
) -> &'a mut Posterior {
    posteriors.entry(key.clone()).or_default()
}

/// One posterior in a snapshot (JSON object keys must be strings, so the
/// map is stored as a list)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorEntry {
    pub key: PosteriorKey,
    pub posterior: Posterior,
}

/// Persisted form of an [`Agent`]
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub sync_interval: u32,
    pub forgetting_factor: f64,
    pub outcomes_since_sync: u32,
    pub posteriors: Vec<PosteriorEntry>,
    pub pending_deltas: Vec<PosteriorDelta>,
    /// Absent for agents without an adaptive policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive: Option<AdaptiveSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PosteriorKey {
        PosteriorKey::new("yagni", "architecture")
    }

    fn agent(id: &str) -> Agent {
        Agent::new(id, 10, 0.95).unwrap()
    }

    #[test]
    fn test_record_outcome_updates_immediately() {
        let mut a = agent("agent-1");
        let delta = a.record_outcome(&key(), true);

        assert_eq!(delta.agent_id, "agent-1");
        assert_eq!(delta.alpha_delta, 1.0);
        assert_eq!(delta.beta_delta, 0.0);
        // Beta(2, 1): variance = 2 / (9 * 4)
        assert!((delta.confidence - 1.0 / (1.0 + 2.0 / 36.0)).abs() < 1e-12);

        assert!((a.get_probability(&key()) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(a.pending_len(), 1);
    }

    #[test]
    fn test_single_agent_history_without_decay() {
        let mut a = agent("solo");
        for _ in 0..10 {
            a.record_outcome(&key(), true);
        }
        for _ in 0..10 {
            a.record_outcome(&key(), false);
        }

        let posterior = a.posterior(&key()).unwrap();
        assert_eq!(posterior.alpha, 11.0);
        assert_eq!(posterior.beta, 11.0);
        assert_eq!(a.get_probability(&key()), 0.5);
        assert_eq!(a.get_observations(&key()), 20);
    }

    #[test]
    fn test_unseen_key_returns_prior_without_inserting() {
        let a = agent("agent-1");
        assert_eq!(a.get_probability(&key()), PRIOR_MEAN);
        assert_eq!(a.get_variance(&key()), PRIOR_VARIANCE);
        assert_eq!(a.get_observations(&key()), 0);
        assert!(a.posterior(&key()).is_none());
        assert_eq!(a.keys().count(), 0);
    }

    #[test]
    fn test_needs_sync_and_drain() {
        let mut a = Agent::new("agent-1", 3, 0.95).unwrap();
        a.record_outcome(&key(), true);
        a.record_outcome(&key(), false);
        assert!(!a.needs_sync());
        a.record_outcome(&key(), true);
        assert!(a.needs_sync());

        let drained = a.drain_deltas();
        assert_eq!(drained.len(), 3);
        assert!(!a.needs_sync());
        assert_eq!(a.pending_len(), 0);
        assert!(a.drain_deltas().is_empty());
    }

    #[test]
    fn test_own_deltas_are_ignored() {
        let mut a = agent("agent-1");
        a.record_outcome(&key(), true);
        let deltas = a.drain_deltas();
        let before = a.posterior(&key()).cloned();

        assert_eq!(a.apply_peer_deltas(&deltas), 0);
        assert_eq!(a.posterior(&key()).cloned(), before);
    }

    #[test]
    fn test_zero_confidence_delta_is_inert() {
        let mut a = agent("agent-1");
        a.record_outcome(&key(), true);
        let before = a.posterior(&key()).cloned().unwrap();

        let delta = PosteriorDelta {
            agent_id: "peer".to_string(),
            key: key(),
            alpha_delta: 5.0,
            beta_delta: 0.0,
            confidence: 0.0,
        };
        assert!(a.apply_peer_delta(&delta));
        assert_eq!(a.posterior(&key()).cloned().unwrap(), before);
    }

    #[test]
    fn test_confident_peer_delta_applies_nearly_fully() {
        let mut a = agent("agent-1");
        let delta = PosteriorDelta {
            agent_id: "peer".to_string(),
            key: key(),
            alpha_delta: 1.0,
            beta_delta: 0.0,
            confidence: 1e9,
        };
        a.apply_peer_delta(&delta);

        // Recipient started from the prior, the least confident state possible
        let posterior = a.posterior(&key()).unwrap();
        assert!((posterior.alpha - 2.0).abs() < 1e-8);
        assert_eq!(posterior.beta, 1.0);
    }

    #[test]
    fn test_equal_confidence_splits_weight() {
        let mut a = agent("agent-1");
        let delta = PosteriorDelta {
            agent_id: "peer".to_string(),
            key: key(),
            alpha_delta: 1.0,
            beta_delta: 0.0,
            confidence: Posterior::default().confidence(),
        };
        a.apply_peer_delta(&delta);
        assert!((a.posterior(&key()).unwrap().alpha - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_reapplying_delta_double_counts() {
        let mut a = agent("agent-1");
        let mut b = agent("agent-2");
        let delta = PosteriorDelta {
            agent_id: "peer".to_string(),
            key: key(),
            alpha_delta: 1.0,
            beta_delta: 0.0,
            confidence: 0.9,
        };

        a.apply_peer_delta(&delta);
        b.apply_peer_delta(&delta);
        b.apply_peer_delta(&delta);

        let once = a.posterior(&key()).unwrap().alpha - 1.0;
        let twice = b.posterior(&key()).unwrap().alpha - 1.0;
        assert!(twice > once * 1.5, "second merge must add evidence again");
    }

    #[test]
    fn test_two_agents_converge_after_exchange() {
        let mut a = agent("agent-1");
        let mut b = agent("agent-2");
        for _ in 0..10 {
            a.record_outcome(&key(), true);
            b.record_outcome(&key(), false);
        }
        let a_before = a.get_probability(&key());
        let b_before = b.get_probability(&key());
        assert!(a_before > 0.8);
        assert!(b_before < 0.2);

        let from_a = a.drain_deltas();
        let from_b = b.drain_deltas();
        a.apply_peer_deltas(&from_b);
        b.apply_peer_deltas(&from_a);

        let diff_before = (a_before - b_before).abs();
        let diff_after = (a.get_probability(&key()) - b.get_probability(&key())).abs();
        assert!(diff_after < diff_before);
    }

    #[test]
    fn test_decay_applies_to_every_posterior() {
        let mut a = Agent::new("agent-1", 10, 0.5).unwrap();
        let other = PosteriorKey::new("kiss", "architecture");
        for _ in 0..4 {
            a.record_outcome(&key(), true);
            a.record_outcome(&other, false);
        }
        a.apply_decay();
        assert_eq!(a.get_observations(&key()), 2);
        assert_eq!(a.get_observations(&other), 2);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(Agent::new("a", 0, 0.95).is_err());
        assert!(Agent::new("a", 10, 0.0).is_err());
        assert!(Agent::new("a", 10, 1.2).is_err());
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut a = Agent::new("agent-7", 4, 0.9).unwrap();
        a.record_outcome(&key(), true);
        a.record_outcome(&PosteriorKey::new("tdd", "testing"), false);

        let json = a.export().unwrap();
        let restored = Agent::import(&json).unwrap();

        assert_eq!(restored.snapshot(), a.snapshot());
        assert_eq!(restored.pending_len(), 2);
        assert_eq!(restored.get_probability(&key()), a.get_probability(&key()));
    }

    #[test]
    fn test_negative_peer_delta_is_rejected() {
        let mut a = agent("agent-1");
        a.record_outcome(&key(), true);
        let before = a.snapshot();

        let hostile = PosteriorDelta {
            agent_id: "peer".to_string(),
            key: key(),
            alpha_delta: 0.0,
            beta_delta: -10.0,
            confidence: 1.0,
        };
        assert!(!a.apply_peer_delta(&hostile));
        assert_eq!(a.snapshot(), before);

        // A bad delta in a batch does not block the good ones
        let batch = vec![
            hostile,
            PosteriorDelta {
                agent_id: "peer".to_string(),
                key: key(),
                alpha_delta: f64::NAN,
                beta_delta: 0.0,
                confidence: 0.9,
            },
            PosteriorDelta {
                agent_id: "peer".to_string(),
                key: key(),
                alpha_delta: 1.0,
                beta_delta: 0.0,
                confidence: f64::INFINITY,
            },
            PosteriorDelta {
                agent_id: "peer".to_string(),
                key: key(),
                alpha_delta: 1.0,
                beta_delta: 0.0,
                confidence: 0.9,
            },
        ];
        assert_eq!(a.apply_peer_deltas(&batch), 1);
        let posterior = a.posterior(&key()).unwrap();
        assert!(posterior.is_valid());
        assert!(posterior.alpha > 2.0);
        assert_eq!(posterior.beta, 1.0);
    }

    #[test]
    fn test_import_rejects_invalid_posterior() {
        let mut a = agent("agent-1");
        a.record_outcome(&key(), true);
        let mut snapshot = a.snapshot();
        snapshot.posteriors[0].posterior.alpha = 0.0;
        snapshot.posteriors[0].posterior.beta = 0.0;
        let json = serde_json::to_string(&snapshot).unwrap();

        assert!(matches!(
            Agent::import(&json),
            Err(SwarmError::InvalidParameter { name: "snapshot", .. })
        ));
    }

    #[test]
    fn test_from_snapshot_rejects_malformed_pending_delta() {
        let mut a = agent("agent-1");
        a.record_outcome(&key(), false);
        let mut snapshot = a.snapshot();
        snapshot.pending_deltas[0].beta_delta = -3.0;
        assert!(Agent::from_snapshot(snapshot).is_err());

        let mut snapshot = a.snapshot();
        snapshot.pending_deltas[0].confidence = f64::NAN;
        assert!(Agent::from_snapshot(snapshot).is_err());
    }

    fn flip_flopping_peer(rounds: usize) -> Vec<Vec<PosteriorDelta>> {
        (0..rounds)
            .map(|round| {
                let success = round % 2 == 0;
                vec![PosteriorDelta {
                    agent_id: "peer".to_string(),
                    key: key(),
                    alpha_delta: if success { 1.0 } else { 0.0 },
                    beta_delta: if success { 0.0 } else { 1.0 },
                    confidence: 0.95,
                }]
            })
            .collect()
    }

    #[test]
    fn test_without_policy_interval_and_forgetting_are_fixed() {
        let mut a = agent("agent-1");
        assert!(a.adaptive().is_none());
        for round in flip_flopping_peer(10) {
            a.apply_peer_deltas(&round);
        }
        assert_eq!(a.sync_interval(), 10);
        assert_eq!(a.forgetting_factor(), 0.95);
        assert!(a.snapshot().adaptive.is_none());
    }

    #[test]
    fn test_adaptive_agent_reacts_to_drift() {
        let mut a = agent("agent-1").with_adaptive(AdaptivePolicy::default()).unwrap();
        for round in flip_flopping_peer(10) {
            a.apply_peer_deltas(&round);
        }

        let adaptive = a.adaptive().unwrap();
        assert_eq!(adaptive.total_syncs(), 10);
        // Every round after the first flips the implied mean
        assert_eq!(adaptive.drift_syncs(), 9);
        assert!(adaptive.is_high_drift_mode());
        assert!(adaptive.is_aggressive_decay_mode());
        assert_eq!(a.sync_interval(), 3);
        assert_eq!(a.forgetting_factor(), 0.92);
    }

    #[test]
    fn test_adaptive_boost_moves_recipient_further() {
        let mut plain = agent("agent-1");
        let mut adaptive = agent("agent-2").with_adaptive(AdaptivePolicy::default()).unwrap();
        let rounds = flip_flopping_peer(2);
        for round in &rounds {
            plain.apply_peer_deltas(round);
            adaptive.apply_peer_deltas(round);
        }

        // Round 1 is identical; round 2 drifts and the boosted failure lands harder
        let plain_beta = plain.posterior(&key()).unwrap().beta;
        let adaptive_beta = adaptive.posterior(&key()).unwrap().beta;
        assert!(adaptive_beta > plain_beta);
    }

    #[test]
    fn test_adaptive_state_survives_export() {
        let mut a = agent("agent-1").with_adaptive(AdaptivePolicy::default()).unwrap();
        for round in flip_flopping_peer(4) {
            a.apply_peer_deltas(&round);
        }

        let restored = Agent::import(&a.export().unwrap()).unwrap();
        assert_eq!(restored.snapshot(), a.snapshot());
        assert_eq!(restored.adaptive(), a.adaptive());
    }

    #[test]
    fn test_snapshot_without_adaptive_field_still_imports() {
        let json = r#"{
            "agent_id": "legacy",
            "sync_interval": 10,
            "forgetting_factor": 0.95,
            "outcomes_since_sync": 0,
            "posteriors": [],
            "pending_deltas": []
        }"#;
        let restored = Agent::import(json).unwrap();
        assert!(restored.adaptive().is_none());
    }
}
