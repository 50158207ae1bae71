use aether_shared::{
    AetherError, AetherId, AetherResult, CandidateId, DiscoveredBot, EntityStore, GateDecision,
    Metric, StrategyCandidate, TradeSignal,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::future::Future;
use std::str::FromStr;
use std::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::info;

// Database operation timeout to prevent indefinite hangs on locks
const DB_TIMEOUT_SECS: u64 = 10;
const MIGRATION_TIMEOUT_SECS: u64 = 30;
const STORE_NAME: &str = "entity_store";

// ══════════════════════════════════════════════════════════════
// Pool Setup
// ══════════════════════════════════════════════════════════════

/// Opens a pool for `database_url`, creating the file and its parent
/// directory when needed. In-memory databases get a single long-lived
/// connection, since every SQLite connection sees its own memory database.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:");
    if !in_memory {
        if let Some(path_str) = database_url.strip_prefix("sqlite:") {
            let path_str = path_str.trim_start_matches("//");
            let db_path = std::path::Path::new(path_str);
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() && parent != std::path::Path::new(".") {
                    std::fs::create_dir_all(parent)?;
                    info!("📁 Data directory: {}", parent.display());
                }
            }
        }
    }

    let opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?
    } else {
        SqlitePoolOptions::new().connect_with(opts).await?
    };
    Ok(pool)
}

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    info!("Running database migrations...");
    let migration_future = sqlx::migrate!("./migrations").run(pool);
    timeout(Duration::from_secs(MIGRATION_TIMEOUT_SECS), migration_future)
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Database migrations timed out after {}s",
                MIGRATION_TIMEOUT_SECS
            )
        })?
        .map_err(|e| anyhow::anyhow!("Database migration failed: {}", e))?;
    Ok(())
}

/// Runs a query future under the store timeout, mapping both failure modes
/// onto collaborator errors so the supervisor can retry them.
async fn bounded<T, F>(op: &str, fut: F) -> AetherResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    timeout(Duration::from_secs(DB_TIMEOUT_SECS), fut)
        .await
        .map_err(|_| AetherError::timeout(STORE_NAME, Duration::from_secs(DB_TIMEOUT_SECS)))?
        .map_err(|e| AetherError::collaborator(STORE_NAME, format!("{} failed: {}", op, e)))
}

fn to_i64(v: u64) -> AetherResult<i64> {
    i64::try_from(v).map_err(|_| AetherError::Validation(format!("{} exceeds i64 range", v)))
}

// ══════════════════════════════════════════════════════════════
// SQLite Store
// ══════════════════════════════════════════════════════════════

pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn append_bots(&self, bots: &[DiscoveredBot]) -> AetherResult<()> {
        let rows = bots
            .iter()
            .map(|b| Ok((b, serde_json::to_string(b)?)))
            .collect::<AetherResult<Vec<_>>>()?;
        let pool = &self.pool;
        bounded("append_bots", async move {
            let mut tx = pool.begin().await?;
            for (bot, data) in rows {
                sqlx::query(
                    "INSERT OR IGNORE INTO discovered_bots \
                     (id, chain, address, score, strategy_type, discovered_at_ms, data) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(bot.id.to_string())
                .bind(&bot.chain)
                .bind(&bot.address)
                .bind(bot.score)
                .bind(&bot.strategy_type)
                .bind(bot.discovered_at.timestamp_millis())
                .bind(data)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        })
        .await
    }

    async fn append_candidates(&self, candidates: &[StrategyCandidate]) -> AetherResult<()> {
        let rows = candidates
            .iter()
            .map(|c| Ok((c, to_i64(c.id.generation)?, serde_json::to_string(c)?)))
            .collect::<AetherResult<Vec<_>>>()?;
        let now = Utc::now().timestamp_millis();
        let pool = &self.pool;
        bounded("append_candidates", async move {
            let mut tx = pool.begin().await?;
            for (c, generation, data) in rows {
                sqlx::query(
                    "INSERT OR IGNORE INTO strategy_candidates \
                     (generation, idx, name, fitness, data, recorded_at_ms) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(generation)
                .bind(i64::from(c.id.index))
                .bind(&c.name)
                .bind(c.fitness)
                .bind(data)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        })
        .await
    }

    async fn append_signal(&self, signal: &TradeSignal) -> AetherResult<()> {
        let data = serde_json::to_string(signal)?;
        let generation = to_i64(signal.candidate_id.generation)?;
        bounded(
            "append_signal",
            sqlx::query(
                "INSERT OR IGNORE INTO trade_signals \
                 (id, candidate_generation, candidate_idx, symbol, action, size, created_at_ms, data) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(signal.id.to_string())
            .bind(generation)
            .bind(i64::from(signal.candidate_id.index))
            .bind(&signal.symbol)
            .bind(signal.action.to_string())
            .bind(signal.size)
            .bind(signal.created_at.timestamp_millis())
            .bind(data)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn append_gate_decision(&self, cycle: u64, decision: &GateDecision) -> AetherResult<()> {
        let data = serde_json::to_string(decision)?;
        bounded(
            "append_gate_decision",
            sqlx::query(
                "INSERT OR IGNORE INTO gate_decisions \
                 (cycle, candidate_generation, candidate_idx, approved, reason, decided_at_ms, data) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(to_i64(cycle)?)
            .bind(to_i64(decision.candidate_id.generation)?)
            .bind(i64::from(decision.candidate_id.index))
            .bind(decision.approved)
            .bind(decision.reason_code())
            .bind(decision.decided_at.timestamp_millis())
            .bind(data)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn append_metrics(&self, metrics: &[Metric]) -> AetherResult<()> {
        let rows = metrics
            .iter()
            .map(|m| Ok((m, serde_json::to_string(m)?)))
            .collect::<AetherResult<Vec<_>>>()?;
        let pool = &self.pool;
        bounded("append_metrics", async move {
            let mut tx = pool.begin().await?;
            for (m, data) in rows {
                sqlx::query(
                    "INSERT OR IGNORE INTO metrics (subject, name, value, observed_at_ms, data) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&m.subject)
                .bind(&m.name)
                .bind(m.value)
                .bind(m.observed_at.timestamp_millis())
                .bind(data)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        })
        .await
    }

    async fn append_system_metric(
        &self,
        name: &str,
        value: f64,
        data: serde_json::Value,
    ) -> AetherResult<()> {
        let data = serde_json::to_string(&data)?;
        bounded(
            "append_system_metric",
            sqlx::query(
                "INSERT INTO system_metrics (name, value, data, recorded_at_ms) VALUES (?, ?, ?, ?)",
            )
            .bind(name)
            .bind(value)
            .bind(data)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn get_bot(&self, id: AetherId) -> AetherResult<Option<DiscoveredBot>> {
        let row: Option<(String,)> = bounded(
            "get_bot",
            sqlx::query_as("SELECT data FROM discovered_bots WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(|(data,)| serde_json::from_str(&data).map_err(AetherError::from))
            .transpose()
    }

    async fn get_candidate(&self, id: CandidateId) -> AetherResult<Option<StrategyCandidate>> {
        let row: Option<(String,)> = bounded(
            "get_candidate",
            sqlx::query_as("SELECT data FROM strategy_candidates WHERE generation = ? AND idx = ?")
                .bind(to_i64(id.generation)?)
                .bind(i64::from(id.index))
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(|(data,)| serde_json::from_str(&data).map_err(AetherError::from))
            .transpose()
    }

    async fn get_signal(&self, id: AetherId) -> AetherResult<Option<TradeSignal>> {
        let row: Option<(String,)> = bounded(
            "get_signal",
            sqlx::query_as("SELECT data FROM trade_signals WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(|(data,)| serde_json::from_str(&data).map_err(AetherError::from))
            .transpose()
    }

    async fn gate_decisions(&self, cycle: u64) -> AetherResult<Vec<GateDecision>> {
        let rows: Vec<(String,)> = bounded(
            "gate_decisions",
            sqlx::query_as(
                "SELECT data FROM gate_decisions WHERE cycle = ? \
                 ORDER BY candidate_generation, candidate_idx",
            )
            .bind(to_i64(cycle)?)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_str(&data).map_err(AetherError::from))
            .collect()
    }

    async fn recent_metrics(&self, subject: &str, limit: usize) -> AetherResult<Vec<Metric>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(String,)> = bounded(
            "recent_metrics",
            sqlx::query_as(
                "SELECT data FROM metrics WHERE subject = ? \
                 ORDER BY observed_at_ms DESC, name DESC LIMIT ?",
            )
            .bind(subject)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        let mut metrics = rows
            .into_iter()
            .map(|(data,)| serde_json::from_str(&data).map_err(AetherError::from))
            .collect::<AetherResult<Vec<Metric>>>()?;
        metrics.reverse();
        Ok(metrics)
    }

    async fn save_checkpoint(
        &self,
        pipeline: &str,
        generation: u64,
        state: serde_json::Value,
    ) -> AetherResult<()> {
        let state = serde_json::to_string(&state)?;
        bounded(
            "save_checkpoint",
            sqlx::query(
                "INSERT OR REPLACE INTO population_checkpoints (pipeline, generation, state, saved_at_ms) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(pipeline)
            .bind(to_i64(generation)?)
            .bind(state)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn load_checkpoint(&self, pipeline: &str) -> AetherResult<Option<serde_json::Value>> {
        let row: Option<(String,)> = bounded(
            "load_checkpoint",
            sqlx::query_as(
                "SELECT state FROM population_checkpoints WHERE pipeline = ? \
                 ORDER BY generation DESC LIMIT 1",
            )
            .bind(pipeline)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.map(|(state,)| serde_json::from_str(&state).map_err(AetherError::from))
            .transpose()
    }
}

// ══════════════════════════════════════════════════════════════
// In-Memory Store
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetricRow {
    pub name: String,
    pub value: f64,
    pub data: serde_json::Value,
}

/// `EntityStore` backed by concurrent maps, for tests and `--in-memory` runs.
#[derive(Default)]
pub struct MemoryEntityStore {
    bots: DashMap<AetherId, DiscoveredBot>,
    candidates: DashMap<CandidateId, StrategyCandidate>,
    signals: DashMap<AetherId, TradeSignal>,
    decisions: DashMap<(u64, CandidateId), GateDecision>,
    metrics: DashMap<String, Vec<Metric>>,
    checkpoints: DashMap<String, (u64, serde_json::Value)>,
    system_metrics: Mutex<Vec<SystemMetricRow>>,
}

impl MemoryEntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bot_count(&self) -> usize {
        self.bots.len()
    }

    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    #[must_use]
    pub fn system_metrics(&self) -> Vec<SystemMetricRow> {
        self.system_metrics
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn append_bots(&self, bots: &[DiscoveredBot]) -> AetherResult<()> {
        for bot in bots {
            self.bots.entry(bot.id).or_insert_with(|| bot.clone());
        }
        Ok(())
    }

    async fn append_candidates(&self, candidates: &[StrategyCandidate]) -> AetherResult<()> {
        for c in candidates {
            self.candidates.entry(c.id).or_insert_with(|| c.clone());
        }
        Ok(())
    }

    async fn append_signal(&self, signal: &TradeSignal) -> AetherResult<()> {
        self.signals
            .entry(signal.id)
            .or_insert_with(|| signal.clone());
        Ok(())
    }

    async fn append_gate_decision(&self, cycle: u64, decision: &GateDecision) -> AetherResult<()> {
        self.decisions
            .entry((cycle, decision.candidate_id))
            .or_insert_with(|| decision.clone());
        Ok(())
    }

    async fn append_metrics(&self, metrics: &[Metric]) -> AetherResult<()> {
        for m in metrics {
            let mut series = self.metrics.entry(m.subject.clone()).or_default();
            let duplicate = series
                .iter()
                .any(|x| x.name == m.name && x.observed_at == m.observed_at);
            if !duplicate {
                series.push(m.clone());
            }
        }
        Ok(())
    }

    async fn append_system_metric(
        &self,
        name: &str,
        value: f64,
        data: serde_json::Value,
    ) -> AetherResult<()> {
        let mut rows = self
            .system_metrics
            .lock()
            .map_err(|_| AetherError::collaborator(STORE_NAME, "system metrics lock poisoned"))?;
        rows.push(SystemMetricRow {
            name: name.to_string(),
            value,
            data,
        });
        Ok(())
    }

    async fn get_bot(&self, id: AetherId) -> AetherResult<Option<DiscoveredBot>> {
        Ok(self.bots.get(&id).map(|b| b.value().clone()))
    }

    async fn get_candidate(&self, id: CandidateId) -> AetherResult<Option<StrategyCandidate>> {
        Ok(self.candidates.get(&id).map(|c| c.value().clone()))
    }

    async fn get_signal(&self, id: AetherId) -> AetherResult<Option<TradeSignal>> {
        Ok(self.signals.get(&id).map(|s| s.value().clone()))
    }

    async fn gate_decisions(&self, cycle: u64) -> AetherResult<Vec<GateDecision>> {
        let mut decisions: Vec<GateDecision> = self
            .decisions
            .iter()
            .filter(|e| e.key().0 == cycle)
            .map(|e| e.value().clone())
            .collect();
        decisions.sort_by_key(|d| d.candidate_id);
        Ok(decisions)
    }

    async fn recent_metrics(&self, subject: &str, limit: usize) -> AetherResult<Vec<Metric>> {
        let Some(series) = self.metrics.get(subject) else {
            return Ok(Vec::new());
        };
        let mut sorted = series.clone();
        sorted.sort_by(|a, b| a.observed_at.cmp(&b.observed_at).then(a.name.cmp(&b.name)));
        let skip = sorted.len().saturating_sub(limit);
        Ok(sorted.into_iter().skip(skip).collect())
    }

    async fn save_checkpoint(
        &self,
        pipeline: &str,
        generation: u64,
        state: serde_json::Value,
    ) -> AetherResult<()> {
        let mut entry = self
            .checkpoints
            .entry(pipeline.to_string())
            .or_insert((generation, state.clone()));
        if generation >= entry.0 {
            *entry = (generation, state);
        }
        Ok(())
    }

    async fn load_checkpoint(&self, pipeline: &str) -> AetherResult<Option<serde_json::Value>> {
        Ok(self.checkpoints.get(pipeline).map(|e| e.1.clone()))
    }
}
