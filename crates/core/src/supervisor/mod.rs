mod health;
mod limiter;
mod retry;
mod stage;

pub use health::{HealthChange, HealthMonitor};
pub use limiter::CollaboratorLimiter;
pub use retry::BackoffPolicy;
pub use stage::{transition, StageEvent, StageMachine};

use aether_shared::{
    AetherError, AetherEventData, AetherId, AetherResult, BotDiscovery, DiscoveredBot,
    EntityStore, ExecutionAdapter, GateDecision, Metric, ScanWindow, SignalAction, Stage,
    StageStatus, StrategyAnalyzer, StrategyCandidate, TradeSignal,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::events::EventBus;
use crate::evolution::{EvolutionEngine, PopulationState, StopReason};
use crate::risk::{PortfolioState, RiskGate};
use crate::shutdown::CancellationFlag;

// ══════════════════════════════════════════════════════════════
// Configuration
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Namespace for checkpoints and deterministic signal ids.
    pub pipeline_id: String,
    pub chains: Vec<String>,
    pub scan_window: ScanWindow,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    /// Timeout applied to every external collaborator call.
    pub stage_timeout: Duration,
    pub stale_data_max_cycles: u32,
    pub health_window: usize,
    pub health_alert_threshold: f64,
    pub concurrency: usize,
    pub rate_per_sec: u32,
    /// How many top-ranked candidates go through the Risk Gate per cycle.
    pub signal_candidates: usize,
    pub signal_symbol: String,
    pub cycle_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            pipeline_id: crate::evolution::DEFAULT_PIPELINE_ID.to_string(),
            chains: vec!["ethereum".into(), "bsc".into(), "polygon".into()],
            scan_window: ScanWindow { blocks: 50 },
            max_retries: 3,
            backoff: BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(30)),
            stage_timeout: Duration::from_secs(30),
            stale_data_max_cycles: 3,
            health_window: 10,
            health_alert_threshold: 0.5,
            concurrency: 4,
            rate_per_sec: 10,
            signal_candidates: 3,
            signal_symbol: "ETH/USDT".into(),
            cycle_interval: Duration::from_secs(60),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> AetherResult<()> {
        if self.pipeline_id.trim().is_empty() {
            return Err(AetherError::Configuration("pipeline_id must not be empty".into()));
        }
        if self.backoff.base.is_zero() || self.backoff.cap < self.backoff.base {
            return Err(AetherError::Configuration(format!(
                "backoff must satisfy 0 < base <= cap (base {:?}, cap {:?})",
                self.backoff.base, self.backoff.cap
            )));
        }
        if self.stage_timeout.is_zero() {
            return Err(AetherError::Configuration("stage_timeout must be > 0".into()));
        }
        if self.health_window == 0 {
            return Err(AetherError::Configuration("health_window must be >= 1".into()));
        }
        if !self.health_alert_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.health_alert_threshold)
        {
            return Err(AetherError::Configuration(format!(
                "health_alert_threshold must be in [0.0, 1.0], got {}",
                self.health_alert_threshold
            )));
        }
        if self.concurrency == 0 {
            return Err(AetherError::Configuration("concurrency must be >= 1".into()));
        }
        if self.rate_per_sec == 0 {
            return Err(AetherError::Configuration("rate_per_sec must be >= 1".into()));
        }
        if self.signal_candidates == 0 {
            return Err(AetherError::Configuration("signal_candidates must be >= 1".into()));
        }
        Ok(())
    }
}

/// External services the supervisor drives.
#[derive(Clone)]
pub struct Collaborators {
    pub discovery: Arc<dyn BotDiscovery>,
    pub analyzer: Arc<dyn StrategyAnalyzer>,
    pub executor: Arc<dyn ExecutionAdapter>,
    pub store: Arc<dyn EntityStore>,
}

// ══════════════════════════════════════════════════════════════
// Stage Driver
// ══════════════════════════════════════════════════════════════

/// How a stage ended after retries.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Succeeded(T),
    /// Retries exhausted; the caller falls back to last-known-good output.
    Degraded(AetherError),
    Cancelled,
}

/// Runs one stage at a time through the FSM, with retries and health
/// bookkeeping. Collaborator timeouts are applied inside the stage ops.
struct StageDriver {
    machine: StageMachine,
    health: HealthMonitor,
    bus: EventBus,
    cancel: CancellationFlag,
    backoff: BackoffPolicy,
    max_retries: u32,
}

impl StageDriver {
    async fn apply(&mut self, cycle: u64, stage: Stage, event: StageEvent) -> AetherResult<()> {
        let (from, to) = self.machine.apply(stage, event)?;
        self.bus
            .publish(AetherEventData::StageTransition {
                cycle,
                stage,
                from,
                to,
            })
            .await;
        Ok(())
    }

    /// Idle → Running, for stages whose first part runs outside `run`.
    async fn begin(&mut self, cycle: u64, stage: Stage) -> AetherResult<()> {
        self.apply(cycle, stage, StageEvent::Start).await
    }

    /// Running → Failed on a fatal error; the stage stays Failed.
    async fn fail(&mut self, cycle: u64, stage: Stage) -> AetherResult<()> {
        self.apply(cycle, stage, StageEvent::Fail).await
    }

    async fn record_health(&mut self, stage: Stage, failed: bool) {
        match self.health.record(stage, failed) {
            Some(HealthChange::Alert { failure_rate }) => {
                self.bus
                    .publish(AetherEventData::HealthAlert {
                        stage,
                        failure_rate,
                        window: self.health.window(),
                    })
                    .await;
            }
            Some(HealthChange::Recovered { failure_rate }) => {
                self.bus
                    .publish(AetherEventData::HealthRecovered {
                        stage,
                        failure_rate,
                    })
                    .await;
            }
            None => {}
        }
    }

    /// Runs `op` with up to `max_retries` retries and exponential backoff.
    ///
    /// Fatal errors are returned as `Err` without retrying. A stage that
    /// exhausts its retries enters Degraded exactly once and is reset to Idle.
    async fn run<T, F, Fut>(
        &mut self,
        cycle: u64,
        stage: Stage,
        mut op: F,
    ) -> AetherResult<StageOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AetherResult<T>>,
    {
        if self.machine.status(stage) == StageStatus::Idle {
            self.apply(cycle, stage, StageEvent::Start).await?;
        }
        let mut attempt: u32 = 0;
        loop {
            let error = match op().await {
                Ok(value) => {
                    self.apply(cycle, stage, StageEvent::Complete).await?;
                    self.apply(cycle, stage, StageEvent::Reset).await?;
                    self.record_health(stage, attempt > 0).await;
                    return Ok(StageOutcome::Succeeded(value));
                }
                Err(e) => e,
            };
            self.apply(cycle, stage, StageEvent::Fail).await?;
            if error.is_fatal() {
                return Err(error);
            }
            if attempt >= self.max_retries {
                self.apply(cycle, stage, StageEvent::Exhaust).await?;
                self.bus
                    .publish(AetherEventData::StageDegraded {
                        cycle,
                        stage,
                        error: error.to_string(),
                    })
                    .await;
                self.apply(cycle, stage, StageEvent::Reset).await?;
                self.record_health(stage, true).await;
                return Ok(StageOutcome::Degraded(error));
            }

            let delay = self.backoff.delay(attempt);
            attempt += 1;
            self.bus
                .publish(AetherEventData::StageRetry {
                    cycle,
                    stage,
                    attempt,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error: error.to_string(),
                })
                .await;
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => return Ok(StageOutcome::Cancelled),
            }
            self.apply(cycle, stage, StageEvent::Retry).await?;
        }
    }

    async fn stop(&mut self, cycle: u64) -> AetherResult<()> {
        for stage in Stage::ALL {
            if self.machine.status(stage) != StageStatus::Stopped {
                self.apply(cycle, stage, StageEvent::Shutdown).await?;
                self.apply(cycle, stage, StageEvent::Halt).await?;
            }
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════
// Stage Operations
// ══════════════════════════════════════════════════════════════

async fn bounded<T>(
    name: &str,
    limit: Duration,
    fut: impl Future<Output = AetherResult<T>>,
) -> AetherResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AetherError::timeout(name, limit))?
}

/// Fans discovery out over every chain. Succeeds if at least one chain
/// answered; results keep chain order.
async fn discover_chains(
    collab: &Collaborators,
    config: &SupervisorConfig,
    limiter: &CollaboratorLimiter,
) -> AetherResult<Vec<DiscoveredBot>> {
    let discovery = collab.discovery.as_ref();
    let results: Vec<AetherResult<Vec<DiscoveredBot>>> = stream::iter(config.chains.iter())
        .map(|chain| async move {
            limiter.acquire(discovery.name()).await;
            bounded(
                discovery.name(),
                config.stage_timeout,
                discovery.discover(chain, config.scan_window),
            )
            .await
        })
        .buffered(config.concurrency)
        .collect()
        .await;

    let mut bots = Vec::new();
    let mut first_error = None;
    let mut succeeded = 0usize;
    for (chain, result) in config.chains.iter().zip(results) {
        match result {
            Ok(found) => {
                succeeded += 1;
                bots.extend(found);
            }
            Err(e) => {
                warn!(chain = %chain, error = %e, "Discovery failed for chain");
                first_error.get_or_insert(e);
            }
        }
    }
    if succeeded == 0 {
        if let Some(e) = first_error {
            return Err(e);
        }
    }
    collab.store.append_bots(&bots).await?;
    Ok(bots)
}

/// Analyzes every bot. Succeeds if at least one analysis came back, or if
/// there was nothing to analyze.
async fn analyze_bots(
    collab: &Collaborators,
    config: &SupervisorConfig,
    limiter: &CollaboratorLimiter,
    bots: &[DiscoveredBot],
) -> AetherResult<Vec<Metric>> {
    let analyzer = collab.analyzer.as_ref();
    let results: Vec<AetherResult<_>> = stream::iter(bots.iter())
        .map(|bot| async move {
            limiter.acquire(analyzer.name()).await;
            bounded(analyzer.name(), config.stage_timeout, analyzer.analyze(bot)).await
        })
        .buffered(config.concurrency)
        .collect()
        .await;

    let mut metrics = Vec::new();
    let mut first_error = None;
    for (bot, result) in bots.iter().zip(results) {
        match result {
            Ok(sample) => metrics.extend(sample.into_metrics()),
            Err(e) => {
                warn!(bot = %bot.id, error = %e, "Analysis failed for bot");
                first_error.get_or_insert(e);
            }
        }
    }
    if metrics.is_empty() {
        if let Some(e) = first_error {
            return Err(e);
        }
    }
    collab.store.append_metrics(&metrics).await?;
    Ok(metrics)
}

async fn persist_population(
    collab: &Collaborators,
    pipeline_id: &str,
    state: &PopulationState,
) -> AetherResult<()> {
    collab.store.append_candidates(&state.population).await?;
    collab
        .store
        .save_checkpoint(pipeline_id, state.generation, serde_json::to_value(state)?)
        .await
}

/// Records every decision, then turns approvals into signals and hands them
/// to the execution adapter. Every write is idempotent on its key, so a
/// retried Gate stage never duplicates rows or submissions.
async fn record_and_emit(
    collab: &Collaborators,
    config: &SupervisorConfig,
    cycle: u64,
    gated: &[(StrategyCandidate, GateDecision)],
) -> AetherResult<Vec<TradeSignal>> {
    let mut signals = Vec::new();
    for (candidate, decision) in gated {
        collab.store.append_gate_decision(cycle, decision).await?;
        if !decision.approved {
            continue;
        }
        let id = AetherId::from_name(&format!(
            "{}:{}:{}",
            config.pipeline_id, cycle, candidate.id
        ));
        let signal = TradeSignal::from_approved(
            id,
            candidate,
            decision.clone(),
            &config.signal_symbol,
            SignalAction::Buy,
            decision.decided_at,
        )?;
        // Stored only once acknowledged, so a stored signal was already
        // submitted by an earlier attempt.
        if collab.store.get_signal(id).await?.is_none() {
            let executor = collab.executor.as_ref();
            bounded(executor.name(), config.stage_timeout, executor.submit(&signal)).await?;
            collab.store.append_signal(&signal).await?;
        } else {
            debug!(signal = %id, "Signal already submitted, skipping");
        }
        signals.push(signal);
    }
    Ok(signals)
}

// ══════════════════════════════════════════════════════════════
// Supervisor
// ══════════════════════════════════════════════════════════════

/// Result of one pass through the four stages.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub skipped: bool,
    pub stopped: bool,
    pub degraded: Vec<Stage>,
    pub bots: usize,
    pub observations: usize,
    pub decisions: Vec<GateDecision>,
    pub signals: Vec<TradeSignal>,
    pub generation: u64,
}

/// Cyclic Discover → Analyze → Evolve → Gate pipeline.
///
/// One supervisor owns one pipeline instance: its engine, stage machine,
/// health counters and last-known-good stage outputs. Nothing is shared
/// between instances.
pub struct Supervisor {
    config: SupervisorConfig,
    engine: EvolutionEngine,
    gate: RiskGate,
    collab: Collaborators,
    limiter: CollaboratorLimiter,
    driver: StageDriver,
    bus: EventBus,
    cancel: CancellationFlag,
    portfolio: PortfolioState,
    cycle: u64,
    last_bots: Option<Vec<DiscoveredBot>>,
    last_metrics: Option<Vec<Metric>>,
    stale_cycles: u32,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        engine: EvolutionEngine,
        gate: RiskGate,
        collab: Collaborators,
        bus: EventBus,
        cancel: CancellationFlag,
    ) -> AetherResult<Self> {
        config.validate()?;
        let driver = StageDriver {
            machine: StageMachine::default(),
            health: HealthMonitor::new(config.health_window, config.health_alert_threshold),
            bus: bus.clone(),
            cancel: cancel.clone(),
            backoff: config.backoff,
            max_retries: config.max_retries,
        };
        let limiter = CollaboratorLimiter::new(
            config.rate_per_sec,
            config.rate_per_sec.max(config.concurrency as u32),
        );
        Ok(Self {
            portfolio: PortfolioState::flat(1.0, Utc::now().date_naive()),
            config,
            engine,
            gate,
            collab,
            limiter,
            driver,
            bus,
            cancel,
            cycle: 0,
            last_bots: None,
            last_metrics: None,
            stale_cycles: 0,
        })
    }

    /// Replaces the portfolio snapshot the Risk Gate checks against.
    pub fn set_portfolio(&mut self, portfolio: PortfolioState) {
        self.portfolio = portfolio;
    }

    #[must_use]
    pub fn engine(&self) -> &EvolutionEngine {
        &self.engine
    }

    #[must_use]
    pub fn status(&self, stage: Stage) -> StageStatus {
        self.driver.machine.status(stage)
    }

    #[must_use]
    pub fn health(&self) -> &HealthMonitor {
        &self.driver.health
    }

    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    #[must_use]
    pub fn stale_cycles(&self) -> u32 {
        self.stale_cycles
    }

    /// Runs one full cycle. Recoverable failures are absorbed here; only
    /// Configuration and EngineInvariant errors come back as `Err`.
    pub async fn run_cycle(&mut self) -> AetherResult<CycleReport> {
        self.cycle += 1;
        let cycle = self.cycle;
        let mut report = CycleReport {
            cycle,
            generation: self.engine.state().generation,
            ..Default::default()
        };
        if self.cancel.is_cancelled() {
            report.stopped = true;
            return Ok(report);
        }
        info!(cycle, "🔄 Cycle started");

        // ── Discover ──
        let (collab, config, limiter) = (&self.collab, &self.config, &self.limiter);
        let bots = match self
            .driver
            .run(cycle, Stage::Discover, move || discover_chains(collab, config, limiter))
            .await?
        {
            StageOutcome::Succeeded(bots) => {
                self.last_bots = Some(bots.clone());
                bots
            }
            StageOutcome::Degraded(_) => {
                report.degraded.push(Stage::Discover);
                self.last_bots.clone().unwrap_or_default()
            }
            StageOutcome::Cancelled => {
                report.stopped = true;
                return Ok(report);
            }
        };
        report.bots = bots.len();
        if self.cancel.is_cancelled() {
            report.stopped = true;
            return Ok(report);
        }

        // ── Analyze ──
        let bots_ref = bots.as_slice();
        let fresh = match self
            .driver
            .run(cycle, Stage::Analyze, move || {
                analyze_bots(collab, config, limiter, bots_ref)
            })
            .await?
        {
            StageOutcome::Succeeded(metrics) if !metrics.is_empty() => Ok(metrics),
            StageOutcome::Succeeded(_) => {
                warn!(cycle, bots = bots.len(), "Analysis produced no observations");
                Err(AetherError::StaleData("no observations this cycle".into()))
            }
            StageOutcome::Degraded(e) => {
                report.degraded.push(Stage::Analyze);
                Err(e)
            }
            StageOutcome::Cancelled => {
                report.stopped = true;
                return Ok(report);
            }
        };
        let metrics = match fresh {
            Ok(metrics) => {
                self.stale_cycles = 0;
                self.last_metrics = Some(metrics.clone());
                metrics
            }
            Err(e) => {
                self.stale_cycles += 1;
                match &self.last_metrics {
                    Some(m) if self.stale_cycles <= self.config.stale_data_max_cycles => {
                        warn!(
                            cycle,
                            stale_cycles = self.stale_cycles,
                            "Evolving on last-known-good analysis"
                        );
                        m.clone()
                    }
                    _ => {
                        let stale = AetherError::StaleData(format!(
                            "analysis unavailable for {} consecutive cycles (limit {}): {}",
                            self.stale_cycles, self.config.stale_data_max_cycles, e
                        ));
                        self.bus
                            .publish(AetherEventData::CycleSkipped {
                                cycle,
                                reason: stale.to_string(),
                            })
                            .await;
                        report.skipped = true;
                        self.finish_cycle(&report).await;
                        return Ok(report);
                    }
                }
            }
        };
        report.observations = metrics.len();
        if self.cancel.is_cancelled() {
            report.stopped = true;
            return Ok(report);
        }

        // ── Evolve ──
        self.driver.begin(cycle, Stage::Evolve).await?;
        // Generations are CPU-bound; run them off the async workers and put
        // the engine back whatever the result.
        let mut engine = self.engine.clone();
        let cancel = self.cancel.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = engine.run(&metrics, &cancel, |_| {});
            (engine, result)
        })
        .await;
        let result = match joined {
            Ok((engine, result)) => {
                self.engine = engine;
                result
            }
            Err(e) => Err(AetherError::EngineInvariant(format!(
                "evolution task aborted: {e}"
            ))),
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(cycle, error = %e, "❌ Evolution engine failed");
                self.driver.fail(cycle, Stage::Evolve).await?;
                return Err(e);
            }
        };
        for s in &outcome.summaries {
            self.bus
                .publish(AetherEventData::GenerationSummary {
                    generation: s.generation,
                    best_fitness: s.best_fitness,
                    best_ever_fitness: s.best_ever_fitness,
                    mean_fitness: s.mean_fitness,
                    stagnant_generations: s.stagnant_generations,
                })
                .await;
        }
        self.bus
            .publish(AetherEventData::EvolutionStopped {
                generation: outcome.final_generation,
                reason: outcome.reason.to_string(),
                best_candidate: outcome.best_ever.as_ref().map(|c| c.id),
                best_fitness: outcome.best_ever.as_ref().map_or(0.0, |c| c.fitness),
            })
            .await;
        report.generation = outcome.final_generation;

        let state = self.engine.state();
        let pipeline_id = self.config.pipeline_id.as_str();
        match self
            .driver
            .run(cycle, Stage::Evolve, move || {
                persist_population(collab, pipeline_id, state)
            })
            .await?
        {
            StageOutcome::Succeeded(()) => {}
            StageOutcome::Degraded(_) => report.degraded.push(Stage::Evolve),
            StageOutcome::Cancelled => {
                report.stopped = true;
                return Ok(report);
            }
        }
        if outcome.reason == StopReason::Cancelled || self.cancel.is_cancelled() {
            report.stopped = true;
            return Ok(report);
        }

        // ── Gate ──
        self.portfolio.roll_to(Utc::now().date_naive());
        let gated: Vec<(StrategyCandidate, GateDecision)> = self
            .engine
            .state()
            .population
            .iter()
            .take(self.config.signal_candidates)
            .map(|c| (c.clone(), self.gate.gate(c, &self.portfolio)))
            .collect();
        let gated_ref = gated.as_slice();
        let signals = match self
            .driver
            .run(cycle, Stage::Gate, move || {
                record_and_emit(collab, config, cycle, gated_ref)
            })
            .await?
        {
            StageOutcome::Succeeded(signals) => signals,
            StageOutcome::Degraded(_) => {
                report.degraded.push(Stage::Gate);
                Vec::new()
            }
            StageOutcome::Cancelled => {
                report.stopped = true;
                Vec::new()
            }
        };
        for (_, decision) in &gated {
            self.bus
                .publish(AetherEventData::GateDecided {
                    cycle,
                    decision: decision.clone(),
                })
                .await;
        }
        for signal in &signals {
            self.bus
                .publish(AetherEventData::SignalEmitted {
                    cycle,
                    signal_id: signal.id,
                    candidate_id: signal.candidate_id,
                    action: signal.action,
                })
                .await;
        }
        report.decisions = gated.into_iter().map(|(_, d)| d).collect();
        report.signals = signals;
        if report.stopped {
            return Ok(report);
        }

        self.finish_cycle(&report).await;
        Ok(report)
    }

    /// Appends the per-cycle health row and announces the cycle result.
    async fn finish_cycle(&self, report: &CycleReport) {
        let health = self.driver.health.snapshot();
        let worst = Stage::ALL
            .iter()
            .map(|s| self.driver.health.failure_rate(*s))
            .fold(0.0, f64::max);
        let data = json!({
            "cycle": report.cycle,
            "skipped": report.skipped,
            "degraded_stages": report.degraded,
            "bots": report.bots,
            "observations": report.observations,
            "signals": report.signals.len(),
            "decisions": report.decisions.len(),
            "generation": report.generation,
            "stale_cycles": self.stale_cycles,
            "stages": health,
        });
        if let Err(e) = self
            .collab
            .store
            .append_system_metric("system_health", worst, data)
            .await
        {
            warn!(cycle = report.cycle, error = %e, "Failed to record system health");
        }
        if !report.skipped {
            self.bus
                .publish(AetherEventData::CycleCompleted {
                    cycle: report.cycle,
                    signals: report.signals.len(),
                    degraded_stages: report.degraded.clone(),
                })
                .await;
        }
    }

    /// Moves every stage through Stopping to Stopped and announces it.
    pub async fn stop(&mut self) -> AetherResult<()> {
        self.driver.stop(self.cycle).await?;
        self.bus
            .publish(AetherEventData::PipelineStopped { cycle: self.cycle })
            .await;
        Ok(())
    }

    /// Runs cycles until cancelled, `max_cycles` is reached or a fatal error
    /// occurs. Stages always end Stopped.
    pub async fn run(&mut self, max_cycles: Option<u64>) -> AetherResult<()> {
        info!(pipeline = %self.config.pipeline_id, "🚀 Supervisor started");
        let result = self.run_loop(max_cycles).await;
        if let Err(e) = &result {
            error!(kind = e.kind(), error = %e, "🛑 Supervisor stopping on fatal error");
        }
        self.stop().await?;
        result
    }

    async fn run_loop(&mut self, max_cycles: Option<u64>) -> AetherResult<()> {
        let mut completed = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let report = self.run_cycle().await?;
            completed += 1;
            if report.stopped || max_cycles.is_some_and(|max| completed >= max) {
                return Ok(());
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.cycle_interval) => {}
                () = self.cancel.cancelled() => return Ok(()),
            }
        }
    }
}
