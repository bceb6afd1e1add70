//! Simulation harness for the swarm
//!
//! Drives a swarm with one oracle per agent, records every prediction and
//! the drift after every tick, and folds it all into a [`SwarmReport`]:
//! - `run_simulation`: sequential coordinator, synthetic drifting outcomes
//! - `run_simulation_async`: the same run on the tokio runtime
//! - `run_replay`: recorded outcomes instead of a synthetic scenario
//! - `benchmark`: the canonical drift/sync/loss benchmark suite

pub mod benchmark;
pub mod oracle;

use crate::config::SwarmConfig;
use crate::error::Result;
use crate::swarm::agent::Agent;
use crate::swarm::coordinator::SyncCoordinator;
use crate::swarm::drift::{compute_drift, DriftMonitor};
use crate::swarm::metrics::{MetricsReporter, SwarmReport};
use crate::swarm::runtime::SwarmRuntime;
use crate::types::{Observation, OutcomeOracle, PosteriorKey};
use oracle::{empirical_rates, DriftScenario, DriftingOracle, ReplayOracle};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Report plus the final agents, for callers that persist state
#[derive(Debug)]
pub struct SimulationRun {
    pub report: SwarmReport,
    pub agents: Vec<Agent>,
}

/// Run the synthetic drift scenario sequentially.
///
/// `config.drift_rate` overrides the scenario's own rate.
pub fn run_simulation(config: &SwarmConfig, scenario: &DriftScenario) -> Result<SwarmReport> {
    Ok(simulate(config, scenario)?.report)
}

/// Like [`run_simulation`], keeping the agents (pending deltas flushed)
pub fn simulate(config: &SwarmConfig, scenario: &DriftScenario) -> Result<SimulationRun> {
    config.validate()?;
    let scenario = Arc::new(scenario.with_drift_rate(config.drift_rate)?);
    let oracles = drifting_oracles(config, &scenario);
    simulate_with(config, scenario.ground_truth(), oracles)
}

/// Drive `outcomes_per_agent` ticks over the given oracles, one per agent
pub fn simulate_with<O: OutcomeOracle>(
    config: &SwarmConfig,
    ground_truth: &BTreeMap<PosteriorKey, f64>,
    mut oracles: Vec<O>,
) -> Result<SimulationRun> {
    let mut coordinator = SyncCoordinator::new(config.clone())?;
    info!(
        agents = config.agent_count,
        outcomes = config.outcomes_per_agent,
        drift_rate = config.drift_rate,
        sync = config.sync_enabled,
        "simulation started"
    );

    let mut metrics = MetricsReporter::new();
    let mut monitor = DriftMonitor::new();
    for _ in 0..config.outcomes_per_agent {
        let records = coordinator.tick(&mut oracles)?;
        metrics.observe_tick(&records);
        monitor.observe(coordinator.agents());
    }

    let drift = compute_drift(coordinator.agents());
    let report = metrics.report(
        config,
        coordinator.agents(),
        ground_truth,
        &drift,
        monitor.into_history(),
        coordinator.stats().clone(),
    );
    log_finished(&report);

    // Report is taken at the last tick; leftovers only matter to the agents
    coordinator.flush();
    let agents = coordinator.into_agents();

    Ok(SimulationRun { report, agents })
}

/// Run the synthetic drift scenario with one tokio task per agent.
///
/// Produces the same report as [`run_simulation`] for the same inputs.
pub async fn run_simulation_async(
    config: &SwarmConfig,
    scenario: &DriftScenario,
) -> Result<SwarmReport> {
    Ok(simulate_async(config, scenario).await?.report)
}

/// Like [`run_simulation_async`], keeping the agents. The report reflects
/// the swarm at its last tick; pending deltas are flushed afterwards as the
/// runtime shuts down.
pub async fn simulate_async(
    config: &SwarmConfig,
    scenario: &DriftScenario,
) -> Result<SimulationRun> {
    config.validate()?;
    let scenario = Arc::new(scenario.with_drift_rate(config.drift_rate)?);
    let seed = config.seed;
    let oracle_scenario = Arc::clone(&scenario);
    let mut runtime = SwarmRuntime::spawn(config.clone(), move |i| {
        DriftingOracle::new(i, seed, Arc::clone(&oracle_scenario))
    })?;
    info!(
        agents = config.agent_count,
        outcomes = config.outcomes_per_agent,
        "async simulation started"
    );

    let mut metrics = MetricsReporter::new();
    let mut monitor = DriftMonitor::new();
    for _ in 0..config.outcomes_per_agent {
        let records = runtime.tick().await?;
        metrics.observe_tick(&records);
        monitor.observe(&runtime.snapshot().await?);
    }

    let last = runtime.snapshot().await?;
    let report = metrics.report(
        config,
        &last,
        scenario.ground_truth(),
        &compute_drift(&last),
        monitor.into_history(),
        runtime.stats().clone(),
    );
    let (agents, _) = runtime.shutdown().await?;
    log_finished(&report);

    Ok(SimulationRun { report, agents })
}

/// Run recorded outcomes through the swarm; ground truth is the empirical
/// success rate of each key in the recording
pub fn run_replay(config: &SwarmConfig, recording: Vec<Observation>) -> Result<SimulationRun> {
    let ground_truth = empirical_rates(&recording);
    let recording = Arc::new(recording);
    let oracles = (0..config.agent_count)
        .map(|i| ReplayOracle::new(Arc::clone(&recording), i))
        .collect::<Result<Vec<_>>>()?;
    simulate_with(config, &ground_truth, oracles)
}

/// One oracle per agent over a shared scenario, seeded from the run seed
pub fn drifting_oracles(config: &SwarmConfig, scenario: &Arc<DriftScenario>) -> Vec<DriftingOracle> {
    (0..config.agent_count)
        .map(|i| DriftingOracle::new(i, config.seed, Arc::clone(scenario)))
        .collect()
}

fn log_finished(report: &SwarmReport) {
    info!(
        accuracy = report.accuracy,
        brier = report.brier_score,
        drift = report.average_drift,
        mae = report.mean_absolute_error_from_truth,
        "simulation finished"
    );
}

/// Print a run report in a human-readable format
pub fn print_report(title: &str, report: &SwarmReport) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ 🌊 {:<57}│", title);
    println!("└─────────────────────────────────────────────────────────────┘\n");

    let c = &report.config;
    println!("CONFIGURATION:");
    println!("   Agents:             {:>8}", c.agent_count);
    println!("   Outcomes/agent:     {:>8}", c.outcomes_per_agent);
    println!("   Drift rate:         {:>7.0}%", c.drift_rate * 100.0);
    if c.sync_enabled {
        println!("   Sync interval:      {:>8}", c.sync_interval_outcomes);
        println!("   Message loss:       {:>7.0}%", c.sync_failure_rate * 100.0);
        println!("   Forgetting factor:  {:>8.2}", c.forgetting_factor);
        if c.adaptive.is_some() {
            println!("   Adaptive:            enabled");
        }
    } else {
        println!("   Sync:               disabled");
    }

    println!("\nMETRICS:");
    println!("   Accuracy:           {:>7.1}%", report.accuracy * 100.0);
    println!("   Brier score:        {:>8.3}", report.brier_score);
    println!("   Avg drift:          {:>6.1}pp", report.average_drift * 100.0);
    println!("   MAE from truth:     {:>8.3}", report.mean_absolute_error_from_truth);

    if !report.consensus_probability_by_key.is_empty() {
        println!("\nCONSENSUS:");
        for (key, p) in &report.consensus_probability_by_key {
            let drift = report.drift_by_key.get(key).copied().unwrap_or(0.0);
            let bar = "█".repeat((p * 20.0).round() as usize);
            println!("   {:32} {:>5.1}% ±{:>4.1}pp {}", key, p * 100.0, drift * 100.0, bar);
        }
    }

    if c.sync_enabled {
        let s = &report.sync_stats;
        println!("\nSYNC:");
        println!("   Rounds:             {:>8}", s.sync_rounds);
        println!("   Deltas drained:     {:>8}", s.deltas_drained);
        println!(
            "   Deltas dropped:     {:>8} ({:.1}%)",
            s.deltas_dropped,
            s.loss_ratio() * 100.0
        );
        println!("   Peer merges:        {:>8}", s.merges_applied);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SwarmError;
    use crate::swarm::adaptive::AdaptivePolicy;

    fn canonical() -> DriftScenario {
        DriftScenario::canonical(0.25).unwrap()
    }

    fn small(sync_enabled: bool) -> SwarmConfig {
        SwarmConfig {
            outcomes_per_agent: 120,
            sync_enabled,
            ..Default::default()
        }
    }

    /// Everything the agents learned, ignoring transport bookkeeping
    fn assert_same_learning(a: &SwarmReport, b: &SwarmReport) {
        assert_eq!(a.accuracy, b.accuracy);
        assert_eq!(a.brier_score, b.brier_score);
        assert_eq!(a.average_drift, b.average_drift);
        assert_eq!(a.mean_absolute_error_from_truth, b.mean_absolute_error_from_truth);
        assert_eq!(a.consensus_probability_by_key, b.consensus_probability_by_key);
        assert_eq!(a.drift_by_key, b.drift_by_key);
        assert_eq!(a.drift_trace, b.drift_trace);
    }

    #[test]
    fn test_fixed_seed_is_byte_identical() {
        let config = small(true);
        let first = serde_json::to_string(&run_simulation(&config, &canonical()).unwrap()).unwrap();
        let second = serde_json::to_string(&run_simulation(&config, &canonical()).unwrap()).unwrap();
        assert_eq!(first, second);

        let other_seed = SwarmConfig { seed: 7, ..config };
        let third = serde_json::to_string(&run_simulation(&other_seed, &canonical()).unwrap()).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn test_report_shape() {
        let config = small(true);
        let report = run_simulation(&config, &canonical()).unwrap();

        assert_eq!(report.drift_trace.len(), config.outcomes_per_agent);
        assert_eq!(report.consensus_probability_by_key.len(), 8);
        assert!(report.consensus_probability_by_key.contains_key("brooks-law:management"));
        assert!((0.0..=1.0).contains(&report.accuracy));
        assert!(report.brier_score >= 0.0 && report.brier_score <= 1.0);
        assert!(report.sync_stats.deltas_drained > 0);
        assert_eq!(report.sync_stats.deltas_dropped, 0);
        assert_eq!(report.config, config);
    }

    #[test]
    fn test_sync_does_not_increase_drift() {
        let scenario = canonical();
        let with_sync = run_simulation(&SwarmConfig::default(), &scenario).unwrap();
        let without = run_simulation(
            &SwarmConfig {
                sync_enabled: false,
                ..Default::default()
            },
            &scenario,
        )
        .unwrap();

        assert!(
            with_sync.average_drift <= without.average_drift,
            "sync drift {} > isolated drift {}",
            with_sync.average_drift,
            without.average_drift
        );
    }

    #[test]
    fn test_total_loss_matches_no_sync() {
        let lossy = SwarmConfig {
            sync_failure_rate: 1.0,
            forgetting_factor: 1.0,
            ..small(true)
        };
        let isolated = SwarmConfig {
            forgetting_factor: 1.0,
            ..small(false)
        };

        let lossy_report = run_simulation(&lossy, &canonical()).unwrap();
        let isolated_report = run_simulation(&isolated, &canonical()).unwrap();

        assert_same_learning(&lossy_report, &isolated_report);
        assert_eq!(lossy_report.sync_stats.deltas_delivered, 0);
        assert_eq!(
            lossy_report.sync_stats.deltas_dropped,
            lossy_report.sync_stats.deltas_drained
        );
    }

    #[test]
    fn test_config_drift_rate_wins() {
        let config = SwarmConfig {
            drift_rate: 0.0,
            ..small(true)
        };
        let from_quarter = run_simulation(&config, &DriftScenario::canonical(0.25).unwrap()).unwrap();
        let from_half = run_simulation(&config, &DriftScenario::canonical(0.5).unwrap()).unwrap();
        assert_eq!(from_quarter, from_half);
    }

    #[test]
    fn test_adaptive_policy_is_opt_in() {
        // A config file that never mentions the policy runs exactly as before
        let from_json: SwarmConfig =
            serde_json::from_str(r#"{"outcomes_per_agent": 120}"#).unwrap();
        assert!(from_json.adaptive.is_none());
        let baseline = run_simulation(&small(true), &canonical()).unwrap();
        assert_eq!(run_simulation(&from_json, &canonical()).unwrap(), baseline);

        let adaptive = SwarmConfig {
            adaptive: Some(AdaptivePolicy::default()),
            ..small(true)
        };
        let run = simulate(&adaptive, &canonical()).unwrap();
        assert_ne!(run.report.drift_trace, baseline.drift_trace);
        assert!(run.agents.iter().all(|a| a.adaptive().is_some()));
        assert!(run
            .agents
            .iter()
            .all(|a| a.adaptive().unwrap().total_syncs() > 0));
    }

    #[test]
    fn test_invalid_config_fails_before_running() {
        let bad = SwarmConfig {
            sync_interval_outcomes: 0,
            ..Default::default()
        };
        assert!(matches!(
            run_simulation(&bad, &canonical()),
            Err(SwarmError::InvalidParameter { name: "sync_interval_outcomes", .. })
        ));
    }

    #[test]
    fn test_zero_outcomes() {
        let config = SwarmConfig {
            outcomes_per_agent: 0,
            ..Default::default()
        };
        let report = run_simulation(&config, &canonical()).unwrap();
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.average_drift, 0.0);
        assert!(report.drift_trace.is_empty());
        // Untouched agents sit at the prior
        assert!(report
            .consensus_probability_by_key
            .values()
            .all(|p| *p == 0.5));
    }

    #[test]
    fn test_simulate_flushes_agents() {
        let config = SwarmConfig {
            outcomes_per_agent: 15,
            ..Default::default()
        };
        let run = simulate(&config, &canonical()).unwrap();
        assert_eq!(run.agents.len(), 3);
        assert!(run.agents.iter().all(|a| a.pending_len() == 0));
    }

    #[tokio::test]
    async fn test_async_matches_sequential() {
        let config = SwarmConfig {
            sync_failure_rate: 0.3,
            ..small(true)
        };
        let sequential = simulate(&config, &canonical()).unwrap();
        let concurrent = simulate_async(&config, &canonical()).await.unwrap();

        assert_eq!(concurrent.report, sequential.report);
        for (a, b) in concurrent.agents.iter().zip(&sequential.agents) {
            assert_eq!(a.snapshot(), b.snapshot());
        }
    }

    #[test]
    fn test_replay_learns_recorded_rates() {
        let key = PosteriorKey::new("tdd", "testing");
        let recording: Vec<Observation> = (0..10)
            .map(|i| Observation {
                key: key.clone(),
                success: i % 5 != 0,
            })
            .collect();
        let config = SwarmConfig {
            outcomes_per_agent: 50,
            sync_enabled: false,
            ..Default::default()
        };

        let run = run_replay(&config, recording).unwrap();
        let truth = run.report.consensus_probability_by_key["tdd:testing"];
        assert!((truth - 0.8).abs() < 0.05, "consensus {truth}");
        assert!(run.report.mean_absolute_error_from_truth < 0.05);

        assert!(run_replay(&config, Vec::new()).is_err());
    }
}
