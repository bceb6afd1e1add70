//! Core types shared by agents, the coordinator and the reporting layer
//!
//! Keys are structured values, never `"principle:domain"` strings, so a
//! principle id that happens to contain a colon cannot collide with
//! another pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A (principle, domain) pair - the unit every posterior is kept for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PosteriorKey {
    pub principle_id: String,
    pub domain: String,
}

impl PosteriorKey {
    pub fn new(principle_id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            principle_id: principle_id.into(),
            domain: domain.into(),
        }
    }
}

/// Display form for reports only; never parsed back.
impl fmt::Display for PosteriorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.principle_id, self.domain)
    }
}

/// Incremental change to one posterior, shared with peers.
///
/// Deliberately not `Clone`: a delta is drained from its agent exactly once
/// and then either lost or delivered by reference to every peer.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct PosteriorDelta {
    /// Agent that generated this delta
    pub agent_id: String,
    pub key: PosteriorKey,
    /// Alpha increment
    pub alpha_delta: f64,
    /// Beta increment
    pub beta_delta: f64,
    /// 1 / (1 + variance) of the source posterior right after the update
    pub confidence: f64,
}

impl PosteriorDelta {
    /// Increments and confidence are finite and non-negative.
    ///
    /// A delta only ever adds evidence; anything else would let a peer
    /// drive a recipient's alpha or beta below the prior.
    pub fn is_well_formed(&self) -> bool {
        [self.alpha_delta, self.beta_delta, self.confidence]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// One outcome supplied by an oracle to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub key: PosteriorKey,
    pub success: bool,
}

/// Injected source of outcomes for one agent.
///
/// Synthetic formulas and recorded real outcomes both sit behind this; the
/// swarm core never decides success itself.
pub trait OutcomeOracle {
    fn next_observation(&mut self) -> Observation;
}

impl<O: OutcomeOracle + ?Sized> OutcomeOracle for Box<O> {
    fn next_observation(&mut self) -> Observation {
        (**self).next_observation()
    }
}

/// What one agent predicted and observed during one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub agent_index: usize,
    pub key: PosteriorKey,
    /// `get_probability` before the outcome was recorded
    pub prediction: f64,
    pub success: bool,
}
