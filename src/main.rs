//! swarm-bench - run and inspect swarm posterior simulations
//!
//! Run with: cargo run -- --bench
//! Logs go to stderr; set RUST_LOG=minds_swarm=debug to see sync rounds.

use anyhow::{bail, Context, Result};
use minds_swarm::{
    config::SwarmConfig,
    db,
    eval::{self, benchmark, oracle::DriftScenario, oracle::ReplayOracle},
    swarm::{AdaptivePolicy, Agent},
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let json_output = args.iter().any(|a| a == "--json");

    match args.get(1).map(|s| s.as_str()) {
        None | Some("--bench") | Some("--json") => run_bench_cmd(&args, json_output),
        Some(s) if s.starts_with("--seed=") => run_bench_cmd(&args, json_output),
        Some("--simulate") => run_simulate(&args, json_output).await,
        Some(s) if s.starts_with("--replay=") => {
            let path = PathBuf::from(s.trim_start_matches("--replay="));
            run_replay(&path, &args, json_output)
        }
        Some(s) if s.starts_with("--show-snapshot") => {
            let path = s
                .strip_prefix("--show-snapshot=")
                .map(PathBuf::from)
                .unwrap_or_else(db::default_db_path);
            run_show_snapshot(&path)
        }
        Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("Unknown command: {}", other)
        }
    }
}

fn print_usage() {
    println!("swarm-bench - swarm posterior synchronization benchmarks\n");
    println!("USAGE:");
    println!("  swarm-bench [--bench] [--seed=N] [--json]");
    println!("  swarm-bench --simulate [OPTIONS] [--async] [--json] [--save[=PATH]]");
    println!("  swarm-bench --replay=PATH [OPTIONS] [--json] [--save[=PATH]]");
    println!("  swarm-bench --show-snapshot[=PATH]");
    println!("\nOPTIONS:");
    println!("  --config=PATH      JSON config, missing fields use defaults");
    println!("  --agents=N         number of agents (3)");
    println!("  --outcomes=N       outcomes per agent (500)");
    println!("  --drift=F          drift rate in [0,1] (0.25)");
    println!("  --no-sync          agents learn in isolation");
    println!("  --interval=N       outcomes between syncs (10)");
    println!("  --loss=F           delta loss rate in [0,1] (0.0)");
    println!("  --forgetting=F     forgetting factor in (0,1] (0.95)");
    println!("  --seed=N           random seed (42)");
    println!("  --adaptive         retune interval and forgetting when drift is detected");
}

/// Parse `--name=value`, if present
fn flag_value<T: FromStr>(args: &[String], name: &str) -> Result<Option<T>> {
    let prefix = format!("{}=", name);
    match args.iter().find_map(|a| a.strip_prefix(prefix.as_str())) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", name, raw)),
        None => Ok(None),
    }
}

/// Config file (or defaults) with command-line overrides applied
fn build_config(args: &[String]) -> Result<SwarmConfig> {
    let mut config = match flag_value::<PathBuf>(args, "--config")? {
        Some(path) => SwarmConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => SwarmConfig::default(),
    };

    if let Some(n) = flag_value(args, "--agents")? {
        config.agent_count = n;
    }
    if let Some(n) = flag_value(args, "--outcomes")? {
        config.outcomes_per_agent = n;
    }
    if let Some(f) = flag_value(args, "--drift")? {
        config.drift_rate = f;
    }
    if args.iter().any(|a| a == "--no-sync") {
        config.sync_enabled = false;
    }
    if let Some(n) = flag_value(args, "--interval")? {
        config.sync_interval_outcomes = n;
    }
    if let Some(f) = flag_value(args, "--loss")? {
        config.sync_failure_rate = f;
    }
    if let Some(f) = flag_value(args, "--forgetting")? {
        config.forgetting_factor = f;
    }
    if let Some(n) = flag_value(args, "--seed")? {
        config.seed = n;
    }
    if args.iter().any(|a| a == "--adaptive") && config.adaptive.is_none() {
        config.adaptive = Some(AdaptivePolicy::default());
    }

    config.validate().context("Invalid swarm configuration")?;
    Ok(config)
}

/// `--save` alone uses the default database
fn save_target(args: &[String]) -> Option<PathBuf> {
    args.iter().find_map(|a| {
        if a == "--save" {
            Some(db::default_db_path())
        } else {
            a.strip_prefix("--save=").map(PathBuf::from)
        }
    })
}

fn run_bench_cmd(args: &[String], json_output: bool) -> Result<()> {
    let seed = flag_value(args, "--seed")?.unwrap_or(SwarmConfig::default().seed);
    let results = benchmark::run_benchmark_suite(seed)?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        benchmark::print_benchmark_summary(&results);
    }
    Ok(())
}

async fn run_simulate(args: &[String], json_output: bool) -> Result<()> {
    let config = build_config(args)?;
    let scenario = DriftScenario::canonical(config.drift_rate)?;

    let run = if args.iter().any(|a| a == "--async") {
        eval::simulate_async(&config, &scenario).await?
    } else {
        eval::simulate(&config, &scenario)?
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&run.report)?);
    } else {
        eval::print_report("SWARM SIMULATION", &run.report);
    }

    if let Some(path) = save_target(args) {
        save_swarm(&path, &run.agents)?;
    }
    Ok(())
}

fn run_replay(path: &Path, args: &[String], json_output: bool) -> Result<()> {
    let config = build_config(args)?;
    let recording = ReplayOracle::load_recording(path)
        .with_context(|| format!("Failed to load recording from {:?}", path))?;
    let observations = recording.len();

    let run = eval::run_replay(&config, recording)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&run.report)?);
    } else {
        eval::print_report(&format!("REPLAY ({} recorded outcomes)", observations), &run.report);
    }

    if let Some(path) = save_target(args) {
        save_swarm(&path, &run.agents)?;
    }
    Ok(())
}

fn save_swarm(path: &Path, agents: &[Agent]) -> Result<()> {
    let conn = db::init_db(path)
        .with_context(|| format!("Failed to open snapshot database at {:?}", path))?;
    db::save_agents(&conn, agents)?;
    tracing::info!("Saved {} agents to {:?}", agents.len(), path);
    Ok(())
}

fn run_show_snapshot(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("No snapshot database at {:?}", path);
    }
    let conn = db::init_db(path)?;
    let stored = db::list_agents(&conn)?;
    let agents = db::load_agents(&conn)?;

    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ 🌊 SWARM SNAPSHOT                                           │");
    println!("└─────────────────────────────────────────────────────────────┘\n");
    println!("Database: {}", path.display());

    if agents.is_empty() {
        println!("\nNo agents stored.");
        return Ok(());
    }

    for (info, agent) in stored.iter().zip(&agents) {
        let saved = info
            .saved_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "\n{} (interval {}, forgetting {:.2}, {} pending, saved {})",
            agent.id(),
            agent.sync_interval(),
            agent.forgetting_factor(),
            info.pending_count,
            saved
        );
        if let Some(state) = agent.adaptive() {
            println!(
                "   adaptive: {}/{} drifting syncs, drift level {:.3}{}",
                state.drift_syncs(),
                state.total_syncs(),
                state.drift_level(),
                if state.is_high_drift_mode() { ", high drift" } else { "" }
            );
        }

        let mut keys: Vec<_> = agent.keys().cloned().collect();
        keys.sort();
        for key in keys {
            let (low, high) = agent
                .posterior(&key)
                .map(|p| p.credible_interval_95())
                .unwrap_or((0.0, 1.0));
            println!(
                "   {:32} {:>5.1}%  [{:>5.1}%, {:>5.1}%]  n={}",
                key.to_string(),
                agent.get_probability(&key) * 100.0,
                low * 100.0,
                high * 100.0,
                agent.get_observations(&key)
            );
        }
    }
    println!();
    Ok(())
}
