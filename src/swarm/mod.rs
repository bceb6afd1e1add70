//! Swarm-shared posteriors
//!
//! Each agent learns a Beta posterior per (principle, domain) from its own
//! outcomes and periodically shares incremental deltas with its peers. A
//! peer's delta is blended in proportion to how confident the sender was
//! relative to the receiver, and accumulated evidence is decayed after each
//! sync so that stale beliefs can be overturned.
//!
//! - `posterior`: the Beta-Bernoulli state and its decay
//! - `agent`: one learner with its pending outbound deltas
//! - `adaptive`: opt-in drift response (interval and forgetting tuning)
//! - `coordinator`: deterministic sequential driver with a lossy channel
//! - `runtime`: the same protocol with one tokio task per agent
//! - `drift` / `metrics`: read-only observers of the swarm

pub mod adaptive;
pub mod agent;
pub mod coordinator;
pub mod drift;
pub mod metrics;
pub mod posterior;
pub mod runtime;

pub use adaptive::{AdaptivePolicy, AdaptiveState};
pub use agent::{Agent, AgentSnapshot};
pub use coordinator::{SyncCoordinator, SyncStats};
pub use drift::{compute_drift, DriftMap, DriftMonitor};
pub use metrics::{MetricsReporter, SwarmReport};
pub use posterior::Posterior;
pub use runtime::SwarmRuntime;
