use aether_shared::{AetherEvent, AetherEventData};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Observability boundary of the pipeline.
///
/// Every event is logged, kept in a bounded history and fanned out to
/// subscribers. Publishing never blocks on slow or absent subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<AetherEvent>>,
    history: Arc<RwLock<VecDeque<Arc<AetherEvent>>>>,
    max_history_size: usize,
}

impl EventBus {
    #[must_use]
    pub fn new(max_history_size: usize) -> Self {
        let (tx, _) = broadcast::channel(max_history_size.clamp(16, 4096));
        Self {
            tx,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(
                max_history_size.min(1024),
            ))),
            max_history_size: max_history_size.max(1),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AetherEvent>> {
        self.tx.subscribe()
    }

    pub async fn publish(&self, data: AetherEventData) -> Arc<AetherEvent> {
        let event = Arc::new(AetherEvent::new(data));
        log_event(&event);

        {
            let mut history = self.history.write().await;
            history.push_back(event.clone());
            while history.len() > self.max_history_size {
                history.pop_front();
            }
        }
        // No receivers is fine: history still holds the event.
        let _ = self.tx.send(event.clone());
        event
    }

    pub async fn history(&self) -> Vec<Arc<AetherEvent>> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Events in history matching `pred`, oldest first.
    pub async fn filter<F>(&self, pred: F) -> Vec<Arc<AetherEvent>>
    where
        F: Fn(&AetherEventData) -> bool,
    {
        self.history
            .read()
            .await
            .iter()
            .filter(|e| pred(&e.data))
            .cloned()
            .collect()
    }
}

fn log_event(event: &AetherEvent) {
    let trace_id = event.trace_id;
    match &event.data {
        AetherEventData::StageTransition {
            cycle,
            stage,
            from,
            to,
        } => debug!(trace_id = %trace_id, cycle, stage = %stage, from = %from, to = %to, "Stage transition"),
        AetherEventData::StageRetry {
            cycle,
            stage,
            attempt,
            delay_ms,
            error,
        } => warn!(trace_id = %trace_id, cycle, stage = %stage, attempt, delay_ms, error = %error, "🔁 Retrying stage"),
        AetherEventData::StageDegraded { cycle, stage, error } => {
            warn!(trace_id = %trace_id, cycle, stage = %stage, error = %error, "⚠️ Stage degraded, using last-known-good output")
        }
        AetherEventData::HealthAlert {
            stage,
            failure_rate,
            window,
        } => warn!(trace_id = %trace_id, stage = %stage, failure_rate, window, "🚨 Stage health degraded"),
        AetherEventData::HealthRecovered {
            stage,
            failure_rate,
        } => info!(trace_id = %trace_id, stage = %stage, failure_rate, "💚 Stage health recovered"),
        AetherEventData::GenerationSummary {
            generation,
            best_fitness,
            best_ever_fitness,
            mean_fitness,
            stagnant_generations,
        } => info!(
            trace_id = %trace_id,
            generation,
            best_fitness,
            best_ever_fitness,
            mean_fitness,
            stagnant_generations,
            "📈 Generation summary"
        ),
        AetherEventData::EvolutionStopped {
            generation,
            reason,
            best_fitness,
            ..
        } => info!(trace_id = %trace_id, generation, reason = %reason, best_fitness, "🏁 Evolution run finished"),
        AetherEventData::GateDecided { cycle, decision } => debug!(
            trace_id = %trace_id,
            cycle,
            candidate = %decision.candidate_id,
            reason = decision.reason_code(),
            "🛡️ Gate decision"
        ),
        AetherEventData::SignalEmitted {
            cycle,
            signal_id,
            candidate_id,
            action,
        } => info!(trace_id = %trace_id, cycle, signal_id = %signal_id, candidate = %candidate_id, action = %action, "📡 Signal emitted"),
        AetherEventData::CycleSkipped { cycle, reason } => {
            error!(trace_id = %trace_id, cycle, reason = %reason, "⏭️ Cycle skipped")
        }
        AetherEventData::CycleCompleted {
            cycle,
            signals,
            degraded_stages,
        } => info!(trace_id = %trace_id, cycle, signals, degraded = ?degraded_stages, "✅ Cycle completed"),
        AetherEventData::PipelineStopped { cycle } => {
            info!(trace_id = %trace_id, cycle, "🛑 Pipeline stopped")
        }
    }
}
