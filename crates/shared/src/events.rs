use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AetherId, CandidateId, GateDecision, SignalAction};

/// Pipeline phases managed by the Supervisor, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Discover,
    Analyze,
    Evolve,
    Gate,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Discover, Stage::Analyze, Stage::Evolve, Stage::Gate];

    #[must_use]
    pub fn next(&self) -> Stage {
        match self {
            Self::Discover => Self::Analyze,
            Self::Analyze => Self::Evolve,
            Self::Evolve => Self::Gate,
            Self::Gate => Self::Discover,
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "Discover"),
            Self::Analyze => write!(f, "Analyze"),
            Self::Evolve => write!(f, "Evolve"),
            Self::Gate => write!(f, "Gate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    /// Retries exhausted; the cycle continues on last-known-good output.
    Degraded,
    Stopping,
    Stopped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AetherEvent {
    pub trace_id: AetherId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: AetherEventData,
}

impl AetherEvent {
    pub fn new(data: AetherEventData) -> Self {
        Self {
            trace_id: AetherId::new_trace_id(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Structured events emitted across the observability boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AetherEventData {
    StageTransition {
        cycle: u64,
        stage: Stage,
        from: StageStatus,
        to: StageStatus,
    },
    StageRetry {
        cycle: u64,
        stage: Stage,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    StageDegraded {
        cycle: u64,
        stage: Stage,
        error: String,
    },
    /// Rolling failure rate of a stage crossed the alert threshold.
    HealthAlert {
        stage: Stage,
        failure_rate: f64,
        window: usize,
    },
    HealthRecovered {
        stage: Stage,
        failure_rate: f64,
    },
    GenerationSummary {
        generation: u64,
        best_fitness: f64,
        best_ever_fitness: f64,
        mean_fitness: f64,
        stagnant_generations: u32,
    },
    EvolutionStopped {
        generation: u64,
        reason: String,
        best_candidate: Option<CandidateId>,
        best_fitness: f64,
    },
    GateDecided {
        cycle: u64,
        decision: GateDecision,
    },
    SignalEmitted {
        cycle: u64,
        signal_id: AetherId,
        candidate_id: CandidateId,
        action: SignalAction,
    },
    CycleSkipped {
        cycle: u64,
        reason: String,
    },
    CycleCompleted {
        cycle: u64,
        signals: usize,
        degraded_stages: Vec<Stage>,
    },
    PipelineStopped {
        cycle: u64,
    },
}
