//! Offline collaborators: seeded bot discovery, heuristic analysis and paper
//! execution. They stand in for the chain scanner, the analysis service and
//! the order router when no external service is configured.

use aether_shared::{
    AetherResult, BotDiscovery, DiscoveredBot, ExecutionAck, ExecutionAdapter, ExecutionStatus,
    PerformanceSample, ScanWindow, StrategyAnalyzer, TradeSignal,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const STRATEGY_PATTERNS: [&str; 4] = ["arbitrage", "market_making", "sandwich", "liquidation"];

/// Profit ratio a bot must beat to be reported.
const PROFIT_RATIO_THRESHOLD: f64 = 1.1;

/// Chance that a scanned block contains a bot-like transaction.
const BOT_TX_PROBABILITY: f64 = 0.08;

fn stable_hash(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

// ══════════════════════════════════════════════════════════════
// Discovery
// ══════════════════════════════════════════════════════════════

/// Seeded stand-in for the on-chain scanner.
///
/// The n-th scan of a chain with a given window always yields the same
/// bots, so runs replay exactly for a fixed seed.
pub struct MockBotHunter {
    seed: u64,
    scans: AtomicU64,
}

impl MockBotHunter {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            scans: AtomicU64::new(0),
        }
    }

    fn scan(&self, chain: &str, window: ScanWindow, scan: u64) -> Vec<DiscoveredBot> {
        let mut rng = StdRng::seed_from_u64(
            self.seed ^ stable_hash(chain) ^ scan.wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        let now = Utc::now();
        let mut bots = Vec::new();
        for _ in 0..window.blocks {
            if !rng.gen_bool(BOT_TX_PROBABILITY) {
                continue;
            }
            let address = format!("0x{:08x}{:032x}", rng.gen::<u32>(), rng.gen::<u128>());
            let profit_ratio: f64 = rng.gen_range(0.9..1.6);
            let tx_count: u32 = rng.gen_range(50..5000);
            let pattern = STRATEGY_PATTERNS[rng.gen_range(0..STRATEGY_PATTERNS.len())];
            if profit_ratio <= PROFIT_RATIO_THRESHOLD {
                continue;
            }
            let score = (profit_ratio - 1.0) / 0.6;
            bots.push(
                DiscoveredBot::new(chain, &address, score, pattern, now)
                    .with_metric("transaction_count", f64::from(tx_count))
                    .with_metric("profit_ratio", profit_ratio),
            );
        }
        bots
    }
}

#[async_trait]
impl BotDiscovery for MockBotHunter {
    fn name(&self) -> &str {
        "mock_bot_hunter"
    }

    async fn discover(&self, chain: &str, window: ScanWindow) -> AetherResult<Vec<DiscoveredBot>> {
        let scan = self.scans.fetch_add(1, Ordering::Relaxed);
        let bots = self.scan(chain, window, scan);
        debug!(chain, blocks = window.blocks, found = bots.len(), "🔍 Mock scan complete");
        Ok(bots)
    }
}

// ══════════════════════════════════════════════════════════════
// Analysis
// ══════════════════════════════════════════════════════════════

/// Heuristic analyzer: derives a performance sample from discovery metrics.
#[derive(Debug, Default)]
pub struct MockAnalyzer;

impl MockAnalyzer {
    #[must_use]
    pub fn sample_for(bot: &DiscoveredBot) -> PerformanceSample {
        let profit_ratio = bot
            .performance_metrics
            .get("profit_ratio")
            .copied()
            .unwrap_or(1.0);
        let trades = bot
            .performance_metrics
            .get("transaction_count")
            .copied()
            .unwrap_or(0.0);
        let s = bot.score;

        let mut values = BTreeMap::new();
        values.insert("total_return".to_string(), profit_ratio - 1.0);
        values.insert("win_rate".to_string(), 0.45 + 0.4 * s);
        values.insert("max_drawdown".to_string(), 0.05 + 0.3 * (1.0 - s));
        values.insert("volatility".to_string(), 0.01 + 0.04 * (1.0 - s));
        values.insert("trade_count".to_string(), trades);
        values.insert("confidence".to_string(), 0.75);
        PerformanceSample {
            bot_id: bot.id,
            observed_at: Utc::now(),
            values,
        }
    }
}

#[async_trait]
impl StrategyAnalyzer for MockAnalyzer {
    fn name(&self) -> &str {
        "mock_analyzer"
    }

    async fn analyze(&self, bot: &DiscoveredBot) -> AetherResult<PerformanceSample> {
        Ok(Self::sample_for(bot))
    }
}

// ══════════════════════════════════════════════════════════════
// Execution
// ══════════════════════════════════════════════════════════════

/// Execution adapter that never places an order.
#[derive(Debug, Default)]
pub struct PaperExecutor {
    submitted: AtomicU64,
}

impl PaperExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExecutionAdapter for PaperExecutor {
    fn name(&self) -> &str {
        "paper_executor"
    }

    async fn submit(&self, signal: &TradeSignal) -> AetherResult<ExecutionAck> {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        info!(
            signal_id = %signal.id,
            candidate = %signal.candidate_id,
            symbol = %signal.symbol,
            action = %signal.action,
            size = signal.size,
            "📝 Paper trade (would execute)"
        );
        Ok(ExecutionAck {
            signal_id: signal.id,
            status: ExecutionStatus::Simulated,
            acknowledged_at: Utc::now(),
        })
    }
}
