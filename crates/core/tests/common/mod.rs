#![allow(dead_code)]

use aether_core::db::MemoryEntityStore;
use aether_core::events::EventBus;
use aether_core::evolution::{
    EvolutionEngine, EvolutionParams, FitnessConfig, FitnessEvaluator, ParameterSpace,
};
use aether_core::risk::{RiskGate, RiskLimits};
use aether_core::shutdown::CancellationFlag;
use aether_core::supervisor::{BackoffPolicy, Collaborators, Supervisor, SupervisorConfig};
use aether_shared::{
    AetherError, AetherResult, BotDiscovery, DiscoveredBot, ExecutionAck, ExecutionAdapter,
    ExecutionStatus, Metric, PerformanceSample, ScanWindow, StrategyAnalyzer, TradeSignal,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
}

/// Two subjects with strong, recent performance.
pub fn strong_metrics() -> Vec<Metric> {
    let at = at();
    let mut metrics = Vec::new();
    for subject in ["bot-a", "bot-b"] {
        metrics.push(Metric::new(subject, "total_return", 5.0, at));
        metrics.push(Metric::new(subject, "win_rate", 0.7, at));
        metrics.push(Metric::new(subject, "max_drawdown", 0.05, at));
        metrics.push(Metric::new(subject, "volatility", 0.01, at));
    }
    metrics
}

pub fn params(population_size: usize, seed: u64) -> EvolutionParams {
    EvolutionParams {
        population_size,
        elitism_count: 2,
        max_generations: 10,
        seed,
        ..Default::default()
    }
}

pub fn engine(params: EvolutionParams) -> EvolutionEngine {
    EvolutionEngine::new(
        params,
        ParameterSpace::default(),
        FitnessEvaluator::new(FitnessConfig::default()),
    )
    .unwrap()
}

/// Limits loose enough that every candidate in the default space passes.
pub fn permissive_limits() -> RiskLimits {
    RiskLimits {
        max_position_fraction: 1.0,
        max_stop_loss: 0.5,
        daily_loss_limit: 1.0,
        max_total_exposure: 1.0,
    }
}

pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        chains: vec!["ethereum".into(), "bsc".into()],
        scan_window: ScanWindow { blocks: 10 },
        max_retries: 2,
        backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1)),
        stage_timeout: Duration::from_secs(5),
        stale_data_max_cycles: 1,
        health_window: 4,
        health_alert_threshold: 0.5,
        concurrency: 4,
        rate_per_sec: 10_000,
        signal_candidates: 3,
        cycle_interval: Duration::from_secs(1),
        ..Default::default()
    }
}

// ══════════════════════════════════════════════════════════════
// Scripted collaborators
// ══════════════════════════════════════════════════════════════

/// Returns two bots per chain, or none once `set_empty(true)`. Fails the
/// first `failures` calls.
pub struct ScriptedDiscovery {
    failures: AtomicU32,
    empty: AtomicBool,
    pub calls: AtomicU32,
}

impl ScriptedDiscovery {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            empty: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_empty(&self, empty: bool) {
        self.empty.store(empty, Ordering::SeqCst);
    }
}

#[async_trait]
impl BotDiscovery for ScriptedDiscovery {
    fn name(&self) -> &str {
        "scripted_discovery"
    }

    async fn discover(&self, chain: &str, _window: ScanWindow) -> AetherResult<Vec<DiscoveredBot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AetherError::unavailable(self.name()));
        }
        if self.empty.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok((0..2)
            .map(|i| {
                DiscoveredBot::new(chain, &format!("0x{:040x}", i + 1), 0.8, "arbitrage", at())
            })
            .collect())
    }
}

/// Analyzer whose availability can be toggled between cycles.
pub struct ToggleAnalyzer {
    failing: AtomicBool,
    pub calls: AtomicU32,
}

impl ToggleAnalyzer {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl StrategyAnalyzer for ToggleAnalyzer {
    fn name(&self) -> &str {
        "toggle_analyzer"
    }

    async fn analyze(&self, bot: &DiscoveredBot) -> AetherResult<PerformanceSample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AetherError::unavailable(self.name()));
        }
        let mut values = BTreeMap::new();
        values.insert("total_return".to_string(), 5.0);
        values.insert("win_rate".to_string(), 0.7);
        values.insert("max_drawdown".to_string(), 0.05);
        values.insert("volatility".to_string(), 0.01);
        Ok(PerformanceSample {
            bot_id: bot.id,
            observed_at: at(),
            values,
        })
    }
}

/// Analyzer that never answers within any sane timeout.
pub struct HangingAnalyzer;

#[async_trait]
impl StrategyAnalyzer for HangingAnalyzer {
    fn name(&self) -> &str {
        "hanging_analyzer"
    }

    async fn analyze(&self, _bot: &DiscoveredBot) -> AetherResult<PerformanceSample> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(AetherError::unavailable(self.name()))
    }
}

/// Records acknowledged signals. With `failing_at(n)` the n-th call fails
/// once.
#[derive(Default)]
pub struct RecordingExecutor {
    pub submitted: std::sync::Mutex<Vec<TradeSignal>>,
    pub calls: AtomicU32,
    fail_at: u32,
}

impl RecordingExecutor {
    pub fn failing_at(call: u32) -> Self {
        Self {
            fail_at: call,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExecutionAdapter for RecordingExecutor {
    fn name(&self) -> &str {
        "recording_executor"
    }

    async fn submit(&self, signal: &TradeSignal) -> AetherResult<ExecutionAck> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_at {
            return Err(AetherError::unavailable(self.name()));
        }
        self.submitted.lock().unwrap().push(signal.clone());
        Ok(ExecutionAck {
            signal_id: signal.id,
            status: ExecutionStatus::Simulated,
            acknowledged_at: at(),
        })
    }
}

// ══════════════════════════════════════════════════════════════
// Harness
// ══════════════════════════════════════════════════════════════

pub struct Harness {
    pub supervisor: Supervisor,
    pub bus: EventBus,
    pub cancel: CancellationFlag,
    pub store: Arc<MemoryEntityStore>,
    pub executor: Arc<RecordingExecutor>,
}

pub fn harness(
    config: SupervisorConfig,
    limits: RiskLimits,
    discovery: Arc<dyn BotDiscovery>,
    analyzer: Arc<dyn StrategyAnalyzer>,
) -> Harness {
    harness_with(
        config,
        limits,
        discovery,
        analyzer,
        engine(params(8, 7)),
        Arc::new(RecordingExecutor::default()),
    )
}

pub fn harness_with(
    config: SupervisorConfig,
    limits: RiskLimits,
    discovery: Arc<dyn BotDiscovery>,
    analyzer: Arc<dyn StrategyAnalyzer>,
    engine: EvolutionEngine,
    executor: Arc<RecordingExecutor>,
) -> Harness {
    let store = Arc::new(MemoryEntityStore::new());
    let bus = EventBus::new(10_000);
    let cancel = CancellationFlag::new();
    let collaborators = Collaborators {
        discovery,
        analyzer,
        executor: executor.clone(),
        store: store.clone(),
    };
    let supervisor = Supervisor::new(
        config,
        engine,
        RiskGate::new(limits).unwrap(),
        collaborators,
        bus.clone(),
        cancel.clone(),
    )
    .unwrap();
    Harness {
        supervisor,
        bus,
        cancel,
        store,
        executor,
    }
}
