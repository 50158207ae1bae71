use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

pub type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-collaborator request quota (token bucket via governor).
///
/// Each collaborator name gets its own bucket, so a chatty analyzer cannot
/// starve discovery calls.
pub struct CollaboratorLimiter {
    limiters: DashMap<String, Arc<DirectLimiter>>,
    quota: Quota,
    clock: DefaultClock,
}

impl CollaboratorLimiter {
    /// - `per_second`: token replenish rate per second
    /// - `burst`: maximum burst capacity
    #[must_use]
    pub fn new(per_second: u32, burst: u32) -> Self {
        // Zero values fall back to 1 instead of panicking
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        Self {
            limiters: DashMap::new(),
            quota: Quota::per_second(per_second).allow_burst(burst),
            clock: DefaultClock::default(),
        }
    }

    fn limiter(&self, collaborator: &str) -> Arc<DirectLimiter> {
        self.limiters
            .entry(collaborator.to_string())
            .or_insert_with(|| Arc::new(GovernorRateLimiter::direct(self.quota)))
            .clone()
    }

    /// Non-blocking check. Returns `true` if a call may proceed now.
    #[must_use]
    pub fn check(&self, collaborator: &str) -> bool {
        self.limiter(collaborator).check().is_ok()
    }

    /// Waits until the collaborator's bucket has a token.
    pub async fn acquire(&self, collaborator: &str) {
        let limiter = self.limiter(collaborator);
        loop {
            match limiter.check() {
                Ok(()) => return,
                Err(not_until) => {
                    let wait = not_until.wait_time_from(self.clock.now());
                    tracing::debug!(collaborator, wait_ms = wait.as_millis() as u64, "Rate limited");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Number of tracked collaborators.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.limiters.len()
    }
}
