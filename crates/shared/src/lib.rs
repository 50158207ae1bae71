use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod domain;
mod events;

pub use domain::*;
pub use events::*;

/// Unique identifier for persisted entities (bots, signals, events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AetherId(Uuid);

impl std::fmt::Display for AetherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Default generates a random UUID v4.
/// For ids that must survive retries and replays, use `AetherId::from_name()`.
impl Default for AetherId {
    fn default() -> Self {
        Self::new()
    }
}

impl AetherId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn new_trace_id() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id derived from a stable name (UUID v5).
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

// ══════════════════════════════════════════════════════════════
// Error Taxonomy
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum AetherError {
    /// Fatal: the owning component must not start.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Recoverable: external service failure, timeout or unavailability.
    #[error("Collaborator error: {collaborator} - {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },
    /// Cycle-local: the data a stage depends on is too old to act on.
    #[error("Stale data: {0}")]
    StaleData(String),
    #[error("Validation error: {0}")]
    Validation(String),
    /// Fatal: a programming defect, the engine halts on its last good state.
    #[error("Engine invariant violated: {0}")]
    EngineInvariant(String),
}

impl AetherError {
    pub fn collaborator(collaborator: &str, message: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            collaborator: collaborator.to_string(),
            message: message.to_string(),
        }
    }

    pub fn timeout(collaborator: &str, after: std::time::Duration) -> Self {
        Self::collaborator(
            collaborator,
            format!("timed out after {}ms", after.as_millis()),
        )
    }

    pub fn unavailable(collaborator: &str) -> Self {
        Self::collaborator(collaborator, "service unavailable")
    }

    /// Fatal errors are surfaced to the process boundary and stop the component.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::EngineInvariant(_))
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Collaborator { .. } => "CollaboratorError",
            Self::StaleData(_) => "StaleDataError",
            Self::Validation(_) => "ValidationError",
            Self::EngineInvariant(_) => "EngineInvariantError",
        }
    }
}

impl From<serde_json::Error> for AetherError {
    fn from(err: serde_json::Error) -> Self {
        AetherError::Validation(format!("serialization failed: {}", err))
    }
}

pub type AetherResult<T> = std::result::Result<T, AetherError>;

// ══════════════════════════════════════════════════════════════
// Collaborator Boundaries
// ══════════════════════════════════════════════════════════════

/// Block range scanned on one chain per discovery call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub blocks: u64,
}

/// On-chain bot discovery (the Bot Hunter).
#[async_trait]
pub trait BotDiscovery: Send + Sync {
    fn name(&self) -> &str;
    /// May return a partial or empty list; callers enforce the timeout.
    async fn discover(&self, chain: &str, window: ScanWindow) -> AetherResult<Vec<DiscoveredBot>>;
}

/// Strategy analysis service that turns a bot into a performance sample.
#[async_trait]
pub trait StrategyAnalyzer: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(&self, bot: &DiscoveredBot) -> AetherResult<PerformanceSample>;
}

/// Order execution boundary. Implementations in this system never trade.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn submit(&self, signal: &TradeSignal) -> AetherResult<ExecutionAck>;
}

/// Append-only persistence of the pipeline's entity kinds.
///
/// No operation spans more than one entity kind, so implementations never
/// need cross-table transactions. Appends are idempotent on entity ids.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn append_bots(&self, bots: &[DiscoveredBot]) -> AetherResult<()>;
    async fn append_candidates(&self, candidates: &[StrategyCandidate]) -> AetherResult<()>;
    async fn append_signal(&self, signal: &TradeSignal) -> AetherResult<()>;
    async fn append_gate_decision(&self, cycle: u64, decision: &GateDecision) -> AetherResult<()>;
    async fn append_metrics(&self, metrics: &[Metric]) -> AetherResult<()>;
    async fn append_system_metric(
        &self,
        name: &str,
        value: f64,
        data: serde_json::Value,
    ) -> AetherResult<()>;

    async fn get_bot(&self, id: AetherId) -> AetherResult<Option<DiscoveredBot>>;
    async fn get_candidate(&self, id: CandidateId) -> AetherResult<Option<StrategyCandidate>>;
    async fn get_signal(&self, id: AetherId) -> AetherResult<Option<TradeSignal>>;
    /// Gate decisions recorded for one cycle, in candidate id order.
    async fn gate_decisions(&self, cycle: u64) -> AetherResult<Vec<GateDecision>>;
    /// Most recent observations for a subject, oldest first.
    async fn recent_metrics(&self, subject: &str, limit: usize) -> AetherResult<Vec<Metric>>;

    /// Stores a serialized population checkpoint for the named pipeline.
    async fn save_checkpoint(
        &self,
        pipeline: &str,
        generation: u64,
        state: serde_json::Value,
    ) -> AetherResult<()>;
    /// Returns the most recent checkpoint for the named pipeline.
    async fn load_checkpoint(&self, pipeline: &str) -> AetherResult<Option<serde_json::Value>>;
}
