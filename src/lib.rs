//! minds-swarm - swarm-shared Beta posteriors
//!
//! Multiple agents learn, independently, how often each principle works in
//! each domain, and keep their beliefs aligned by exchanging small evidence
//! deltas instead of full state. Delivery is best-effort: a lost delta is
//! simply never seen.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use minds_swarm::{run_simulation, DriftScenario, SwarmConfig};
//!
//! let config = SwarmConfig::default();
//! let scenario = DriftScenario::canonical(config.drift_rate)?;
//! let report = run_simulation(&config, &scenario)?;
//! println!("accuracy {:.1}%", report.accuracy * 100.0);
//! ```
//!
//! Driving agents by hand:
//!
//! ```rust,ignore
//! use minds_swarm::{Agent, PosteriorKey};
//!
//! let key = PosteriorKey::new("tdd", "testing");
//! let mut a = Agent::new("a", 10, 0.95)?;
//! let mut b = Agent::new("b", 10, 0.95)?;
//! a.record_outcome(&key, true);
//! b.apply_peer_deltas(&a.drain_deltas());
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   agent-0    │   │   agent-1    │   │   agent-N    │
//! │  posteriors  │   │  posteriors  │   │  posteriors  │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │ deltas every `sync_interval_outcomes`│
//!        ▼                  ▼                  ▼
//! ┌─────────────────────────────────────────────────────┐
//! │   lossy channel → pool → merge into peers → decay   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod eval;
pub mod swarm;
pub mod types;

pub use config::SwarmConfig;
pub use db::init_db;
pub use error::{Result, SwarmError};
pub use eval::oracle::{DriftScenario, DriftingOracle, ReplayOracle};
pub use eval::{run_simulation, run_simulation_async};
pub use swarm::{AdaptivePolicy, Agent, Posterior, SwarmReport, SwarmRuntime, SyncCoordinator};
pub use types::*;
