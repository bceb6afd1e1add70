//! Deterministic tick driver for a swarm of agents.
//!
//! One tick:
//! 1. Every agent records exactly one outcome from its own oracle
//! 2. Agents whose buffer reached the threshold are drained, in index order
//! 3. Each drained delta is independently lost with `sync_failure_rate`
//! 4. Every agent merges the surviving pool (skipping its own deltas)
//! 5. Every agent decays
//!
//! With sync disabled, steps 2-5 never run and agents learn in isolation.

use crate::config::SwarmConfig;
use crate::error::{Result, SwarmError};
use crate::swarm::agent::Agent;
use crate::swarm::metrics;
use crate::types::{OutcomeOracle, PosteriorDelta, PosteriorKey, TickRecord};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Salt separating the loss stream from outcome sampling, so changing the
/// failure rate never changes which outcomes agents see.
const LOSS_STREAM_SALT: u64 = 0x5EED_1055_C4A7_7E12;

/// Sync statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Ticks in which at least one agent was harvested
    pub sync_rounds: u64,
    pub deltas_drained: u64,
    /// Deltas lost in transit
    pub deltas_dropped: u64,
    /// Deltas that survived and were broadcast
    pub deltas_delivered: u64,
    /// Individual peer merges (a delivered delta merges into N-1 agents)
    pub merges_applied: u64,
}

impl SyncStats {
    /// Share of drained deltas that were lost
    pub fn loss_ratio(&self) -> f64 {
        if self.deltas_drained == 0 {
            return 0.0;
        }
        self.deltas_dropped as f64 / self.deltas_drained as f64
    }
}

/// Unreliable transport between agents: drops each delta independently
#[derive(Debug)]
pub struct LossyChannel {
    failure_rate: f64,
    rng: StdRng,
}

impl LossyChannel {
    pub fn new(failure_rate: f64, seed: u64) -> Self {
        Self {
            failure_rate,
            rng: StdRng::seed_from_u64(seed ^ LOSS_STREAM_SALT),
        }
    }

    /// Survivors of one harvest, in their original order
    pub fn transmit(
        &mut self,
        deltas: Vec<PosteriorDelta>,
        stats: &mut SyncStats,
    ) -> Vec<PosteriorDelta> {
        let drained = deltas.len() as u64;
        let survivors: Vec<PosteriorDelta> = deltas
            .into_iter()
            .filter(|_| self.rng.gen::<f64>() >= self.failure_rate)
            .collect();

        stats.deltas_drained += drained;
        stats.deltas_dropped += drained - survivors.len() as u64;
        stats.deltas_delivered += survivors.len() as u64;
        survivors
    }
}

/// Stable agent naming shared by the coordinator and the async runtime
pub fn agent_id(index: usize) -> String {
    format!("agent-{index}")
}

pub(crate) fn build_agents(config: &SwarmConfig) -> Result<Vec<Agent>> {
    (0..config.agent_count)
        .map(|i| {
            let agent = Agent::new(
                agent_id(i),
                config.sync_interval_outcomes,
                config.forgetting_factor,
            )?;
            match &config.adaptive {
                Some(policy) => agent.with_adaptive(policy.clone()),
                None => Ok(agent),
            }
        })
        .collect()
}

/// Step 1 for a single agent: predict, then record
pub(crate) fn record_one<O: OutcomeOracle + ?Sized>(
    agent_index: usize,
    agent: &mut Agent,
    oracle: &mut O,
) -> TickRecord {
    let observation = oracle.next_observation();
    let prediction = agent.get_probability(&observation.key);
    agent.record_outcome(&observation.key, observation.success);

    TickRecord {
        agent_index,
        key: observation.key,
        prediction,
        success: observation.success,
    }
}

/// Step 4: every agent merges the full pool, returns total merges
pub(crate) fn deliver(agents: &mut [Agent], pool: &[PosteriorDelta]) -> u64 {
    agents
        .iter_mut()
        .map(|agent| agent.apply_peer_deltas(pool) as u64)
        .sum()
}

/// Sequential swarm coordinator for local simulation
#[derive(Debug)]
pub struct SyncCoordinator {
    config: SwarmConfig,
    agents: Vec<Agent>,
    channel: LossyChannel,
    ticks: u64,
    stats: SyncStats,
}

impl SyncCoordinator {
    /// Validates the configuration and creates `agent_count` agents
    pub fn new(config: SwarmConfig) -> Result<Self> {
        config.validate()?;
        let agents = build_agents(&config)?;
        let channel = LossyChannel::new(config.sync_failure_rate, config.seed);

        Ok(Self {
            config,
            agents,
            channel,
            ticks: 0,
            stats: SyncStats::default(),
        })
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, index: usize) -> Option<&Agent> {
        self.agents.get(index)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn into_agents(self) -> Vec<Agent> {
        self.agents
    }

    /// Run one tick with one oracle per agent, in agent order
    pub fn tick<O: OutcomeOracle>(&mut self, oracles: &mut [O]) -> Result<Vec<TickRecord>> {
        if oracles.len() != self.agents.len() {
            return Err(SwarmError::OracleMismatch {
                expected: self.agents.len(),
                got: oracles.len(),
            });
        }

        let records = self
            .agents
            .iter_mut()
            .zip(oracles.iter_mut())
            .enumerate()
            .map(|(i, (agent, oracle))| record_one(i, agent, oracle))
            .collect();

        if self.config.sync_enabled {
            self.sync_round();
        }
        self.ticks += 1;
        Ok(records)
    }

    /// Steps 2-5: harvest, lose, broadcast, decay. Returns the pool size.
    pub fn sync_round(&mut self) -> usize {
        let mut pool = Vec::new();
        let mut harvested = 0usize;

        for agent in self.agents.iter_mut() {
            if agent.needs_sync() {
                let deltas = agent.drain_deltas();
                harvested += deltas.len();
                pool.extend(self.channel.transmit(deltas, &mut self.stats));
            }
        }

        if harvested > 0 {
            self.stats.sync_rounds += 1;
            debug!(
                tick = self.ticks,
                harvested,
                delivered = pool.len(),
                "sync round"
            );
        }

        self.stats.merges_applied += deliver(&mut self.agents, &pool);
        for agent in self.agents.iter_mut() {
            agent.apply_decay();
        }
        pool.len()
    }

    /// Drain every pending delta regardless of threshold and deliver it.
    ///
    /// Used at shutdown so unsynced evidence is not silently dropped. No
    /// decay is applied. Does nothing when sync is disabled.
    pub fn flush(&mut self) -> usize {
        if !self.config.sync_enabled {
            return 0;
        }

        let mut pool = Vec::new();
        for agent in self.agents.iter_mut() {
            if agent.pending_len() > 0 {
                let deltas = agent.drain_deltas();
                pool.extend(self.channel.transmit(deltas, &mut self.stats));
            }
        }

        self.stats.merges_applied += deliver(&mut self.agents, &pool);
        debug!(delivered = pool.len(), "flushed pending deltas");
        pool.len()
    }

    /// Average belief across agents
    pub fn consensus_probability(&self, key: &PosteriorKey) -> f64 {
        metrics::consensus_probability(&self.agents, key)
    }
}
