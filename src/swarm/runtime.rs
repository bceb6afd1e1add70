//! One tokio task per agent, synchronized only at the sync barrier.
//!
//! ```text
//!   router ──Tick──▶ agent task (own Agent + oracle)
//!     ▲                 │ record outcome, drain if ready
//!     └──── report ─────┘
//!   router: wait for all N reports, apply loss in agent order
//!   router ══ broadcast(pool) ══▶ every agent: merge, decay
//! ```
//!
//! An agent awaits the tick's pool before it reads its next command, so
//! every local update of a tick commits before any merge is visible and no
//! agent sees a partial pool. Agents never share memory; deltas travel as
//! an immutable `Arc<Vec<PosteriorDelta>>`.

use crate::config::SwarmConfig;
use crate::error::{Result, SwarmError};
use crate::swarm::agent::{Agent, AgentSnapshot};
use crate::swarm::coordinator::{agent_id, build_agents, record_one, LossyChannel, SyncStats};
use crate::types::{OutcomeOracle, PosteriorDelta, TickRecord};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Pool = Arc<Vec<PosteriorDelta>>;

enum Command {
    Tick,
    /// Drain everything pending, regardless of threshold
    Flush,
    /// Copy of current state; the agent keeps running
    Snapshot(oneshot::Sender<AgentSnapshot>),
    Shutdown(oneshot::Sender<Agent>),
}

struct Report {
    agent_index: usize,
    record: Option<TickRecord>,
    deltas: Vec<PosteriorDelta>,
}

/// Concurrent swarm with the same semantics as [`SyncCoordinator`]
///
/// End a run with [`SwarmRuntime::shutdown`]. Dropping the runtime instead
/// stops the agent tasks and discards their state, pending deltas included.
///
/// [`SyncCoordinator`]: crate::swarm::coordinator::SyncCoordinator
pub struct SwarmRuntime {
    config: SwarmConfig,
    commands: Vec<mpsc::Sender<Command>>,
    reports: mpsc::Receiver<Report>,
    pool_tx: broadcast::Sender<Pool>,
    channel: LossyChannel,
    handles: Vec<JoinHandle<()>>,
    ticks: u64,
    stats: SyncStats,
    shut_down: bool,
}

impl SwarmRuntime {
    /// Validate the configuration and spawn one task per agent.
    ///
    /// `make_oracle(i)` builds the oracle owned by agent `i`. Must be called
    /// inside a tokio runtime.
    pub fn spawn<O, F>(config: SwarmConfig, mut make_oracle: F) -> Result<Self>
    where
        O: OutcomeOracle + Send + 'static,
        F: FnMut(usize) -> O,
    {
        config.validate()?;
        let agents = build_agents(&config)?;

        let (report_tx, reports) = mpsc::channel(config.agent_count);
        let (pool_tx, _) = broadcast::channel(4);
        let mut commands = Vec::with_capacity(config.agent_count);
        let mut handles = Vec::with_capacity(config.agent_count);

        for (index, agent) in agents.into_iter().enumerate() {
            let (command_tx, command_rx) = mpsc::channel(4);
            let task = AgentTask {
                index,
                agent,
                oracle: make_oracle(index),
                sync_enabled: config.sync_enabled,
                commands: command_rx,
                reports: report_tx.clone(),
                pool: pool_tx.subscribe(),
            };
            handles.push(tokio::spawn(task.run()));
            commands.push(command_tx);
        }

        let channel = LossyChannel::new(config.sync_failure_rate, config.seed);
        debug!(agents = config.agent_count, "swarm runtime started");

        Ok(Self {
            config,
            commands,
            reports,
            pool_tx,
            channel,
            handles,
            ticks: 0,
            stats: SyncStats::default(),
            shut_down: false,
        })
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one tick across all agent tasks. Records are in agent order.
    pub async fn tick(&mut self) -> Result<Vec<TickRecord>> {
        let reports = self.round(|| Command::Tick).await?;

        let mut records = Vec::with_capacity(reports.len());
        let mut harvested = Vec::new();
        for report in reports {
            records.extend(report.record);
            harvested.push(report.deltas);
        }

        if self.config.sync_enabled {
            let drained: usize = harvested.iter().map(Vec::len).sum();
            let pool = self.transmit(harvested);
            if drained > 0 {
                self.stats.sync_rounds += 1;
                debug!(tick = self.ticks, harvested = drained, delivered = pool.len(), "sync round");
            }
            self.broadcast(pool)?;
        }

        self.ticks += 1;
        Ok(records)
    }

    /// Point-in-time copies of every agent, in order, without stopping them
    pub async fn snapshot(&self) -> Result<Vec<Agent>> {
        let mut agents = Vec::with_capacity(self.commands.len());
        for (index, command_tx) in self.commands.iter().enumerate() {
            let (reply_tx, reply_rx) = oneshot::channel();
            command_tx
                .send(Command::Snapshot(reply_tx))
                .await
                .map_err(|_| stopped(index))?;
            let snapshot = reply_rx.await.map_err(|_| stopped(index))?;
            agents.push(Agent::from_snapshot(snapshot)?);
        }
        Ok(agents)
    }

    /// Flush pending deltas (when syncing) and collect every agent, in order
    pub async fn shutdown(mut self) -> Result<(Vec<Agent>, SyncStats)> {
        // Failures below surface as the returned error, not the drop warning
        self.shut_down = true;
        if self.config.sync_enabled {
            let reports = self.round(|| Command::Flush).await?;
            let pool = self.transmit(reports.into_iter().map(|r| r.deltas).collect());
            debug!(delivered = pool.len(), "flushed pending deltas");
            self.broadcast(pool)?;
        }

        let mut agents = Vec::with_capacity(self.commands.len());
        for (index, command_tx) in self.commands.iter().enumerate() {
            let (reply_tx, reply_rx) = oneshot::channel();
            command_tx
                .send(Command::Shutdown(reply_tx))
                .await
                .map_err(|_| stopped(index))?;
            agents.push(reply_rx.await.map_err(|_| stopped(index))?);
        }

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "agent task ended abnormally");
            }
        }

        Ok((agents, std::mem::take(&mut self.stats)))
    }

    /// Send one command to every agent and wait for all reports (the barrier)
    async fn round(&mut self, command: impl Fn() -> Command) -> Result<Vec<Report>> {
        for (index, command_tx) in self.commands.iter().enumerate() {
            command_tx
                .send(command())
                .await
                .map_err(|_| stopped(index))?;
        }

        let mut reports = Vec::with_capacity(self.commands.len());
        for _ in 0..self.commands.len() {
            let report = self
                .reports
                .recv()
                .await
                .ok_or(SwarmError::ChannelClosed)?;
            reports.push(report);
        }
        reports.sort_by_key(|r| r.agent_index);
        Ok(reports)
    }

    /// Loss is applied per agent in index order, matching the sequential coordinator
    fn transmit(&mut self, harvested: Vec<Vec<PosteriorDelta>>) -> Vec<PosteriorDelta> {
        let mut pool = Vec::new();
        for deltas in harvested {
            if !deltas.is_empty() {
                pool.extend(self.channel.transmit(deltas, &mut self.stats));
            }
        }
        pool
    }

    fn broadcast(&mut self, pool: Vec<PosteriorDelta>) -> Result<()> {
        // Every delta comes from a swarm member and merges into the other N-1
        let peers = self.commands.len().saturating_sub(1) as u64;
        self.stats.merges_applied += pool.len() as u64 * peers;

        self.pool_tx
            .send(Arc::new(pool))
            .map(|_| ())
            .map_err(|_| SwarmError::ChannelClosed)
    }
}

impl Drop for SwarmRuntime {
    fn drop(&mut self) {
        if !self.shut_down && !self.commands.is_empty() {
            warn!(
                agents = self.commands.len(),
                ticks = self.ticks,
                "swarm runtime dropped without shutdown, agent state and pending deltas discarded"
            );
        }
    }
}

fn stopped(index: usize) -> SwarmError {
    SwarmError::AgentStopped {
        agent: agent_id(index),
    }
}

struct AgentTask<O> {
    index: usize,
    agent: Agent,
    oracle: O,
    sync_enabled: bool,
    commands: mpsc::Receiver<Command>,
    reports: mpsc::Sender<Report>,
    pool: broadcast::Receiver<Pool>,
}

impl<O: OutcomeOracle + Send + 'static> AgentTask<O> {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Tick => {
                    let record = record_one(self.index, &mut self.agent, &mut self.oracle);
                    let deltas = if self.sync_enabled && self.agent.needs_sync() {
                        self.agent.drain_deltas()
                    } else {
                        Vec::new()
                    };
                    if !self.report(Some(record), deltas).await {
                        return;
                    }
                    if self.sync_enabled {
                        let Some(pool) = self.await_pool().await else {
                            return;
                        };
                        self.agent.apply_peer_deltas(&pool);
                        self.agent.apply_decay();
                    }
                }
                Command::Flush => {
                    let deltas = self.agent.drain_deltas();
                    if !self.report(None, deltas).await {
                        return;
                    }
                    let Some(pool) = self.await_pool().await else {
                        return;
                    };
                    self.agent.apply_peer_deltas(&pool);
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.agent.snapshot());
                }
                Command::Shutdown(reply) => {
                    let _ = reply.send(self.agent);
                    return;
                }
            }
        }
    }

    async fn report(&mut self, record: Option<TickRecord>, deltas: Vec<PosteriorDelta>) -> bool {
        let report = Report {
            agent_index: self.index,
            record,
            deltas,
        };
        if self.reports.send(report).await.is_err() {
            warn!(agent = self.agent.id(), "router gone, stopping agent");
            return false;
        }
        true
    }

    async fn await_pool(&mut self) -> Option<Pool> {
        match self.pool.recv().await {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(agent = self.agent.id(), error = %e, "sync broadcast lost, stopping agent");
                None
            }
        }
    }
}
