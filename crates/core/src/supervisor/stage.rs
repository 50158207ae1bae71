use aether_shared::{AetherError, AetherResult, Stage, StageStatus};

/// Inputs that move a stage between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// Cycle start or a caller-driven begin.
    Start,
    Complete,
    /// Error, timeout or collaborator unavailability.
    Fail,
    Retry,
    /// Retries used up.
    Exhaust,
    /// Back to Idle, advancing to the next stage.
    Reset,
    Shutdown,
    Halt,
}

/// Transition table of a single stage. `None` means the event is not
/// allowed in that status.
#[must_use]
pub fn transition(from: StageStatus, event: StageEvent) -> Option<StageStatus> {
    use StageEvent as E;
    use StageStatus as S;
    match (from, event) {
        (S::Idle, E::Start) => Some(S::Running),
        (S::Running, E::Complete) => Some(S::Succeeded),
        (S::Running, E::Fail) => Some(S::Failed),
        (S::Failed, E::Retry) => Some(S::Running),
        (S::Failed, E::Exhaust) => Some(S::Degraded),
        (S::Succeeded | S::Degraded | S::Failed, E::Reset) => Some(S::Idle),
        (S::Idle | S::Running | S::Succeeded | S::Failed | S::Degraded, E::Shutdown) => {
            Some(S::Stopping)
        }
        (S::Stopping, E::Halt) => Some(S::Stopped),
        _ => None,
    }
}

/// Current status of all four stages of one pipeline.
#[derive(Debug, Clone)]
pub struct StageMachine {
    statuses: [StageStatus; 4],
}

impl Default for StageMachine {
    fn default() -> Self {
        Self {
            statuses: [StageStatus::Idle; 4],
        }
    }
}

impl StageMachine {
    #[must_use]
    pub fn status(&self, stage: Stage) -> StageStatus {
        self.statuses[stage.index()]
    }

    /// Applies `event` and returns the (from, to) pair.
    /// An event the table does not allow is a programming defect.
    pub fn apply(
        &mut self,
        stage: Stage,
        event: StageEvent,
    ) -> AetherResult<(StageStatus, StageStatus)> {
        let from = self.status(stage);
        let to = transition(from, event).ok_or_else(|| {
            AetherError::EngineInvariant(format!(
                "illegal transition {:?} from {} on stage {}",
                event, from, stage
            ))
        })?;
        self.statuses[stage.index()] = to;
        Ok((from, to))
    }

    #[must_use]
    pub fn all_stopped(&self) -> bool {
        self.statuses.iter().all(|s| *s == StageStatus::Stopped)
    }
}
