use aether_shared::Stage;
use serde_json::json;
use std::collections::VecDeque;

/// Change in a stage's alert state after recording a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthChange {
    Alert { failure_rate: f64 },
    Recovered { failure_rate: f64 },
}

/// Rolling per-stage failure rate over the last `window` cycles.
///
/// A cycle counts as a failure for a stage when the stage failed at least
/// once in it, whether or not a retry later succeeded.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    window: usize,
    threshold: f64,
    history: [VecDeque<bool>; 4],
    alerting: [bool; 4],
}

impl HealthMonitor {
    #[must_use]
    pub fn new(window: usize, threshold: f64) -> Self {
        let window = window.max(1);
        Self {
            window,
            threshold,
            history: std::array::from_fn(|_| VecDeque::with_capacity(window)),
            alerting: [false; 4],
        }
    }

    pub fn record(&mut self, stage: Stage, failed: bool) -> Option<HealthChange> {
        let i = stage.index();
        let history = &mut self.history[i];
        history.push_back(failed);
        while history.len() > self.window {
            history.pop_front();
        }
        let failure_rate = self.failure_rate(stage);
        if failure_rate > self.threshold && !self.alerting[i] {
            self.alerting[i] = true;
            Some(HealthChange::Alert { failure_rate })
        } else if failure_rate <= self.threshold && self.alerting[i] {
            self.alerting[i] = false;
            Some(HealthChange::Recovered { failure_rate })
        } else {
            None
        }
    }

    #[must_use]
    pub fn failure_rate(&self, stage: Stage) -> f64 {
        let history = &self.history[stage.index()];
        if history.is_empty() {
            return 0.0;
        }
        history.iter().filter(|f| **f).count() as f64 / history.len() as f64
    }

    #[must_use]
    pub fn is_alerting(&self, stage: Stage) -> bool {
        self.alerting[stage.index()]
    }

    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }

    /// Per-stage snapshot persisted with the cycle's system metric row.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        let stages: serde_json::Map<String, serde_json::Value> = Stage::ALL
            .iter()
            .map(|s| {
                (
                    s.to_string(),
                    json!({
                        "failure_rate": self.failure_rate(*s),
                        "alerting": self.is_alerting(*s),
                        "samples": self.history[s.index()].len(),
                    }),
                )
            })
            .collect();
        serde_json::Value::Object(stages)
    }
}
