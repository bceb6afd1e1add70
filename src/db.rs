//! Snapshot store for swarm agents
//!
//! SQLite, single file, works offline. Agents are saved whole (posteriors
//! plus unsynced deltas) so a swarm can stop and later resume learning
//! without losing evidence.

use crate::error::Result;
use crate::swarm::agent::{Agent, AgentSnapshot, PosteriorEntry};
use crate::swarm::posterior::Posterior;
use crate::types::{PosteriorDelta, PosteriorKey};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// Open (creating if needed) the snapshot database
pub fn init_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// In-memory store, for tests and dry runs
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Default location: `<local data dir>/100minds/swarm.db`
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("100minds")
        .join("swarm.db")
}

const SCHEMA: &str = r#"
-- One row per agent; position keeps swarm order stable
CREATE TABLE IF NOT EXISTS swarm_agents (
    agent_id TEXT PRIMARY KEY,
    position INTEGER NOT NULL,
    sync_interval INTEGER NOT NULL,
    forgetting_factor REAL NOT NULL,
    outcomes_since_sync INTEGER NOT NULL,
    saved_at TEXT NOT NULL,
    -- JSON drift state, NULL for agents without an adaptive policy
    adaptive TEXT
);

CREATE TABLE IF NOT EXISTS swarm_posteriors (
    agent_id TEXT NOT NULL REFERENCES swarm_agents(agent_id),
    principle_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    alpha REAL NOT NULL,
    beta REAL NOT NULL,
    observations INTEGER NOT NULL,
    PRIMARY KEY (agent_id, principle_id, domain)
);

-- Deltas recorded but not yet shared with peers
CREATE TABLE IF NOT EXISTS swarm_pending_deltas (
    agent_id TEXT NOT NULL REFERENCES swarm_agents(agent_id),
    seq INTEGER NOT NULL,
    source_agent TEXT NOT NULL,
    principle_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    alpha_delta REAL NOT NULL,
    beta_delta REAL NOT NULL,
    confidence REAL NOT NULL,
    PRIMARY KEY (agent_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_swarm_agents_position ON swarm_agents(position);
"#;

/// What a stored agent looks like without loading it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAgent {
    pub agent_id: String,
    pub posterior_count: usize,
    pub pending_count: usize,
    /// None if the stored timestamp is unreadable
    pub saved_at: Option<DateTime<Utc>>,
}

/// Replace the stored swarm with `agents`, atomically
pub fn save_agents(conn: &Connection, agents: &[Agent]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM swarm_pending_deltas", [])?;
    tx.execute("DELETE FROM swarm_posteriors", [])?;
    tx.execute("DELETE FROM swarm_agents", [])?;

    let saved_at = Utc::now().to_rfc3339();
    for (position, agent) in agents.iter().enumerate() {
        let snapshot = agent.snapshot();
        let adaptive = snapshot
            .adaptive
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tx.execute(
            "INSERT INTO swarm_agents
             (agent_id, position, sync_interval, forgetting_factor, outcomes_since_sync, saved_at, adaptive)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.agent_id,
                position as i64,
                snapshot.sync_interval,
                snapshot.forgetting_factor,
                snapshot.outcomes_since_sync,
                saved_at,
                adaptive
            ],
        )?;

        for entry in &snapshot.posteriors {
            tx.execute(
                "INSERT INTO swarm_posteriors
                 (agent_id, principle_id, domain, alpha, beta, observations)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.agent_id,
                    entry.key.principle_id,
                    entry.key.domain,
                    entry.posterior.alpha,
                    entry.posterior.beta,
                    entry.posterior.observations
                ],
            )?;
        }

        for (seq, delta) in snapshot.pending_deltas.iter().enumerate() {
            tx.execute(
                "INSERT INTO swarm_pending_deltas
                 (agent_id, seq, source_agent, principle_id, domain, alpha_delta, beta_delta, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    snapshot.agent_id,
                    seq as i64,
                    delta.agent_id,
                    delta.key.principle_id,
                    delta.key.domain,
                    delta.alpha_delta,
                    delta.beta_delta,
                    delta.confidence
                ],
            )?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Load the stored swarm in its saved order.
///
/// Every agent is re-validated; one corrupt row fails the whole load.
pub fn load_agents(conn: &Connection) -> Result<Vec<Agent>> {
    let mut stmt = conn.prepare(
        "SELECT agent_id, sync_interval, forgetting_factor, outcomes_since_sync, adaptive
         FROM swarm_agents ORDER BY position",
    )?;
    let headers = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut agents = Vec::with_capacity(headers.len());
    for (agent_id, sync_interval, forgetting_factor, outcomes_since_sync, adaptive) in headers {
        let posteriors = load_posteriors(conn, &agent_id)?;
        let pending_deltas = load_pending(conn, &agent_id)?;
        let adaptive = adaptive.as_deref().map(serde_json::from_str).transpose()?;
        agents.push(Agent::from_snapshot(AgentSnapshot {
            agent_id,
            sync_interval,
            forgetting_factor,
            outcomes_since_sync,
            posteriors,
            pending_deltas,
            adaptive,
        })?);
    }
    Ok(agents)
}

fn load_posteriors(conn: &Connection, agent_id: &str) -> Result<Vec<PosteriorEntry>> {
    let mut stmt = conn.prepare(
        "SELECT principle_id, domain, alpha, beta, observations
         FROM swarm_posteriors WHERE agent_id = ?1
         ORDER BY principle_id, domain",
    )?;
    let entries = stmt
        .query_map([agent_id], |row| {
            Ok(PosteriorEntry {
                key: PosteriorKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                posterior: Posterior {
                    alpha: row.get(2)?,
                    beta: row.get(3)?,
                    observations: row.get(4)?,
                },
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

fn load_pending(conn: &Connection, agent_id: &str) -> Result<Vec<PosteriorDelta>> {
    let mut stmt = conn.prepare(
        "SELECT source_agent, principle_id, domain, alpha_delta, beta_delta, confidence
         FROM swarm_pending_deltas WHERE agent_id = ?1 ORDER BY seq",
    )?;
    let deltas = stmt
        .query_map([agent_id], |row| {
            Ok(PosteriorDelta {
                agent_id: row.get(0)?,
                key: PosteriorKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                alpha_delta: row.get(3)?,
                beta_delta: row.get(4)?,
                confidence: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(deltas)
}

/// Summaries of stored agents in swarm order
pub fn list_agents(conn: &Connection) -> Result<Vec<StoredAgent>> {
    let mut stmt = conn.prepare(
        "SELECT a.agent_id,
                (SELECT COUNT(*) FROM swarm_posteriors p WHERE p.agent_id = a.agent_id),
                (SELECT COUNT(*) FROM swarm_pending_deltas d WHERE d.agent_id = a.agent_id),
                a.saved_at
         FROM swarm_agents a ORDER BY a.position",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let saved_at: String = row.get(3)?;
            Ok(StoredAgent {
                agent_id: row.get(0)?,
                posterior_count: row.get::<_, i64>(1)? as usize,
                pending_count: row.get::<_, i64>(2)? as usize,
                saved_at: saved_at.parse::<DateTime<Utc>>().ok(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
