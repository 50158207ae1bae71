use aether_shared::{Metric, StrategyCandidate};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ══════════════════════════════════════════════════════════════
// Configuration
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessWeights {
    pub realized_return: f64,
    pub drawdown: f64,
    pub win_rate: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            realized_return: 0.5,
            drawdown: 0.3,
            win_rate: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessConfig {
    pub weights: FitnessWeights,
    /// Age at which a subject's observations count half as much.
    pub half_life_hours: f64,
    /// Score returned when no subject has enough data to contribute.
    pub neutral_score: f64,
    pub default_drawdown: f64,
    pub default_volatility: f64,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            weights: FitnessWeights::default(),
            half_life_hours: 24.0,
            neutral_score: 0.0,
            default_drawdown: 0.5,
            default_volatility: 0.05,
        }
    }
}

// ══════════════════════════════════════════════════════════════
// Evaluator
// ══════════════════════════════════════════════════════════════

const FITNESS_MIN: f64 = -1.0;
const FITNESS_MAX: f64 = 1.0;

/// Latest observation of each metric name for one subject.
#[derive(Debug, Default)]
struct SubjectMetrics {
    values: BTreeMap<String, (f64, DateTime<Utc>)>,
    newest: Option<DateTime<Utc>>,
}

impl SubjectMetrics {
    fn record(&mut self, metric: &Metric) {
        let replace = self
            .values
            .get(&metric.name)
            .map_or(true, |(_, at)| metric.observed_at >= *at);
        if replace {
            self.values
                .insert(metric.name.clone(), (metric.value, metric.observed_at));
        }
        self.newest = Some(self.newest.map_or(metric.observed_at, |n| n.max(metric.observed_at)));
    }

    /// Non-finite observations are treated as missing.
    fn get(&self, name: &str) -> Option<f64> {
        self.values
            .get(name)
            .map(|(v, _)| *v)
            .filter(|v| v.is_finite())
    }
}

/// Candidate genes read once per evaluation, sanitized to safe ranges.
struct Genes {
    position: f64,
    stop_loss: f64,
    take_profit: f64,
    entry_threshold: f64,
    exit_threshold: f64,
    min_profit: f64,
    slippage: f64,
    gas: f64,
    style: String,
}

impl Genes {
    fn read(candidate: &StrategyCandidate) -> Self {
        let get = |name: &str, lo: f64, hi: f64| {
            candidate
                .numeric(name)
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
                .clamp(lo, hi)
        };
        Self {
            position: get("position_size", 0.0, 1.0),
            stop_loss: get("stop_loss", 0.0, 1.0),
            take_profit: get("take_profit", 0.0, 10.0),
            entry_threshold: get("entry_threshold", 0.0, 1.0),
            exit_threshold: get("exit_threshold", 0.0, 1.0),
            min_profit: get("min_profit_threshold", 0.0, 1.0),
            slippage: get("slippage_tolerance", 0.0, 1.0),
            gas: get("max_gas_price", 0.0, 10_000.0),
            style: candidate
                .categorical("execution_style")
                .unwrap_or("market")
                .to_string(),
        }
    }

    /// (fill rate, cost per unit position) of the execution style.
    fn execution(&self) -> (f64, f64) {
        let (fill, cost) = match self.style.as_str() {
            "limit" => (0.85, 0.0),
            "twap" => (0.95, 0.001),
            _ => (1.0, 0.002),
        };
        // Wider slippage and higher gas ceilings fill more often but cost more.
        let slip_factor = (self.slippage / 0.02).min(1.0);
        let gas_factor = (self.gas / 500.0).min(1.0);
        let fill = fill * (0.8 + 0.2 * slip_factor) * (0.9 + 0.1 * gas_factor);
        let cost = cost + self.slippage * 0.5 + gas_factor * 0.001;
        (fill, cost)
    }

    fn participation(&self) -> f64 {
        1.0 / (1.0 + 10.0 * self.min_profit)
    }

    fn capture(&self) -> f64 {
        let total = self.take_profit + self.stop_loss;
        let ratio = if total > 0.0 { self.take_profit / total } else { 0.0 };
        ratio * (0.5 + 0.5 * self.exit_threshold)
    }

    fn stop_fit(&self, volatility: f64) -> f64 {
        if self.stop_loss <= 0.0 || volatility <= 0.0 {
            1.0
        } else {
            (self.stop_loss / volatility).min(1.0)
        }
    }
}

/// Scores a candidate against recorded metrics. Pure and deterministic:
/// recency is measured against the newest observation in the input, never
/// against the wall clock.
#[derive(Debug, Clone, Default)]
pub struct FitnessEvaluator {
    config: FitnessConfig,
}

impl FitnessEvaluator {
    #[must_use]
    pub fn new(config: FitnessConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &FitnessConfig {
        &self.config
    }

    #[must_use]
    pub fn evaluate(&self, candidate: &StrategyCandidate, metrics: &[Metric]) -> f64 {
        let Some(as_of) = metrics.iter().map(|m| m.observed_at).max() else {
            return self.neutral();
        };

        let mut subjects: BTreeMap<&str, SubjectMetrics> = BTreeMap::new();
        for metric in metrics {
            subjects
                .entry(metric.subject.as_str())
                .or_default()
                .record(metric);
        }

        let genes = Genes::read(candidate);
        let weights = self.config.weights;
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for subject in subjects.values() {
            let (Some(ret), Some(win)) = (subject.get("total_return"), subject.get("win_rate"))
            else {
                continue;
            };
            let ret = ret.clamp(-1.0, 10.0);
            let win = win.clamp(0.0, 1.0);
            if win < genes.entry_threshold {
                continue;
            }
            let drawdown = subject
                .get("max_drawdown")
                .unwrap_or(self.config.default_drawdown)
                .clamp(0.0, 1.0);
            let volatility = subject
                .get("volatility")
                .unwrap_or(self.config.default_volatility)
                .clamp(0.0, 1.0);

            let stop_fit = genes.stop_fit(volatility);
            let effective_dd = if genes.stop_loss > 0.0 {
                drawdown.min(3.0 * genes.stop_loss)
            } else {
                drawdown
            };
            let (fill, cost) = genes.execution();
            let pos = genes.position;

            let return_term =
                pos * ret * 2.0 * genes.capture() * stop_fit * fill * genes.participation()
                    - pos * cost;
            let drawdown_term = pos * effective_dd * (1.0 + pos);
            let win_term = win * stop_fit;
            let score = weights.realized_return * return_term - weights.drawdown * drawdown_term
                + weights.win_rate * win_term;

            let age_hours = subject
                .newest
                .map_or(0.0, |t| (as_of - t).num_seconds().max(0) as f64 / 3600.0);
            let recency = if self.config.half_life_hours > 0.0 {
                0.5_f64.powf(age_hours / self.config.half_life_hours)
            } else {
                1.0
            };
            if score.is_finite() && recency > 0.0 {
                weighted += score * recency;
                total_weight += recency;
            }
        }

        if total_weight <= 0.0 {
            return self.neutral();
        }
        let fitness = weighted / total_weight;
        if fitness.is_finite() {
            fitness.clamp(FITNESS_MIN, FITNESS_MAX)
        } else {
            self.neutral()
        }
    }

    /// Re-scores every candidate in parallel. Output order matches input order.
    #[must_use]
    pub fn evaluate_population(
        &self,
        population: Vec<StrategyCandidate>,
        metrics: &[Metric],
    ) -> Vec<StrategyCandidate> {
        population
            .into_par_iter()
            .map(|c| {
                let fitness = self.evaluate(&c, metrics);
                c.with_fitness(fitness)
            })
            .collect()
    }

    fn neutral(&self) -> f64 {
        if self.config.neutral_score.is_finite() {
            self.config.neutral_score.clamp(FITNESS_MIN, FITNESS_MAX)
        } else {
            0.0
        }
    }
}
