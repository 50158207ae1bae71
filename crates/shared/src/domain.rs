use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{AetherError, AetherId, AetherResult};

// ══════════════════════════════════════════════════════════════
// Discovery
// ══════════════════════════════════════════════════════════════

/// A trading bot found on-chain by the Bot Hunter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredBot {
    pub id: AetherId,
    pub chain: String,
    pub address: String,
    pub discovered_at: DateTime<Utc>,
    /// Discovery score in [0.0, 1.0].
    pub score: f64,
    pub strategy_type: String,
    pub performance_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DiscoveredBot {
    /// The id is derived from (chain, address) so rediscovery maps to the same bot.
    pub fn new(
        chain: &str,
        address: &str,
        score: f64,
        strategy_type: &str,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::id_for(chain, address),
            chain: chain.to_string(),
            address: address.to_string(),
            discovered_at,
            score: if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 },
            strategy_type: strategy_type.to_string(),
            performance_metrics: BTreeMap::new(),
            metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn id_for(chain: &str, address: &str) -> AetherId {
        AetherId::from_name(&format!("{}:{}", chain, address.to_lowercase()))
    }

    #[must_use]
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.performance_metrics.insert(name.to_string(), value);
        self
    }
}

// ══════════════════════════════════════════════════════════════
// Metrics
// ══════════════════════════════════════════════════════════════

/// Timestamped observation keyed by subject (bot or strategy id) and name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub subject: String,
    pub name: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl Metric {
    pub fn new(subject: &str, name: &str, value: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            subject: subject.to_string(),
            name: name.to_string(),
            value,
            observed_at,
        }
    }
}

/// Output of the Analysis collaborator for one bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub bot_id: AetherId,
    pub observed_at: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl PerformanceSample {
    #[must_use]
    pub fn into_metrics(self) -> Vec<Metric> {
        let subject = self.bot_id.to_string();
        self.values
            .into_iter()
            .map(|(name, value)| Metric {
                subject: subject.clone(),
                name,
                value,
                observed_at: self.observed_at,
            })
            .collect()
    }
}

// ══════════════════════════════════════════════════════════════
// Strategy Candidates
// ══════════════════════════════════════════════════════════════

/// (generation, index) identity of a candidate. Ordering is lexicographic,
/// which is what deterministic tie-breaking relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId {
    pub generation: u64,
    pub index: u32,
}

impl CandidateId {
    #[must_use]
    pub fn new(generation: u64, index: u32) -> Self {
        Self { generation, index }
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}-c{}", self.generation, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Numeric(f64),
    Categorical(String),
}

impl ParamValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::Categorical(_) => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Numeric(_) => None,
            Self::Categorical(s) => Some(s),
        }
    }
}

/// A named, versioned parameter vector under evaluation.
///
/// Candidates are never mutated in place: the engine builds new values for
/// every generation, and fitness is attached through `with_fitness`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyCandidate {
    pub id: CandidateId,
    pub name: String,
    pub version: u64,
    pub params: BTreeMap<String, ParamValue>,
    pub fitness: f64,
    pub generation: u64,
    #[serde(default)]
    pub parents: Vec<CandidateId>,
}

impl StrategyCandidate {
    pub fn new(
        id: CandidateId,
        params: BTreeMap<String, ParamValue>,
        parents: Vec<CandidateId>,
    ) -> Self {
        Self {
            id,
            name: format!("evolved_g{}_c{}", id.generation, id.index),
            version: id.generation,
            params,
            fitness: 0.0,
            generation: id.generation,
            parents,
        }
    }

    #[must_use]
    pub fn with_fitness(mut self, fitness: f64) -> Self {
        self.fitness = fitness;
        self
    }

    #[must_use]
    pub fn numeric(&self, name: &str) -> Option<f64> {
        self.params.get(name).and_then(ParamValue::as_f64)
    }

    #[must_use]
    pub fn categorical(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(ParamValue::as_str)
    }
}

// ══════════════════════════════════════════════════════════════
// Gate Decisions & Signals
// ══════════════════════════════════════════════════════════════

/// Reason codes reported by the Risk Gate. Codes are stable strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    MissingStopLoss,
    StopLossAboveCeiling,
    PositionSizeExceeded,
    ExposureLimitExceeded,
    DailyLossLimitReached,
    InvalidParameters,
}

impl RejectReason {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingStopLoss => "MISSING_STOP_LOSS",
            Self::StopLossAboveCeiling => "STOP_LOSS_ABOVE_CEILING",
            Self::PositionSizeExceeded => "POSITION_SIZE_EXCEEDED",
            Self::ExposureLimitExceeded => "EXPOSURE_LIMIT_EXCEEDED",
            Self::DailyLossLimitReached => "DAILY_LOSS_LIMIT_REACHED",
            Self::InvalidParameters => "INVALID_PARAMETERS",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub candidate_id: CandidateId,
    pub approved: bool,
    pub reason: Option<RejectReason>,
    pub detail: String,
    pub decided_at: DateTime<Utc>,
}

impl GateDecision {
    pub fn approve(candidate_id: CandidateId, decided_at: DateTime<Utc>) -> Self {
        Self {
            candidate_id,
            approved: true,
            reason: None,
            detail: "all risk limits satisfied".to_string(),
            decided_at,
        }
    }

    pub fn reject(
        candidate_id: CandidateId,
        reason: RejectReason,
        detail: impl Into<String>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            candidate_id,
            approved: false,
            reason: Some(reason),
            detail: detail.into(),
            decided_at,
        }
    }

    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        self.reason.map_or("APPROVED", |r| r.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Append-only record of an approved candidate turned into a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: AetherId,
    pub candidate_id: CandidateId,
    pub strategy_name: String,
    pub symbol: String,
    pub action: SignalAction,
    /// Fraction of the portfolio.
    pub size: f64,
    pub created_at: DateTime<Utc>,
    pub decision: GateDecision,
}

impl TradeSignal {
    /// Builds a signal from a candidate and its gate decision.
    /// Fails with a ValidationError unless the decision approved that candidate.
    pub fn from_approved(
        id: AetherId,
        candidate: &StrategyCandidate,
        decision: GateDecision,
        symbol: &str,
        action: SignalAction,
        created_at: DateTime<Utc>,
    ) -> AetherResult<Self> {
        if !decision.approved {
            return Err(AetherError::Validation(format!(
                "candidate {} was rejected ({}), no signal may reference it",
                candidate.id,
                decision.reason_code()
            )));
        }
        if decision.candidate_id != candidate.id {
            return Err(AetherError::Validation(format!(
                "gate decision for {} does not match candidate {}",
                decision.candidate_id, candidate.id
            )));
        }
        Ok(Self {
            id,
            candidate_id: candidate.id,
            strategy_name: candidate.name.clone(),
            symbol: symbol.to_string(),
            action,
            size: candidate.numeric("position_size").unwrap_or(0.0),
            created_at,
            decision,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAck {
    pub signal_id: AetherId,
    pub status: ExecutionStatus,
    pub acknowledged_at: DateTime<Utc>,
}
