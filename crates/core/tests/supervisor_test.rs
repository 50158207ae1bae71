//! Supervisor integration tests. Time is paused, so backoff sleeps and
//! collaborator timeouts elapse instantly.

mod common;

use aether_core::risk::RiskLimits;
use aether_core::supervisor::SupervisorConfig;
use aether_shared::{AetherEventData, AetherId, EntityStore, Stage, StageStatus};
use common::{
    engine, fast_config, harness, harness_with, params, permissive_limits, HangingAnalyzer,
    RecordingExecutor, ScriptedDiscovery, ToggleAnalyzer,
};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

fn all_idle(h: &common::Harness) -> bool {
    Stage::ALL
        .iter()
        .all(|s| h.supervisor.status(*s) == StageStatus::Idle)
}

#[tokio::test(start_paused = true)]
async fn test_cycle_emits_signals_for_approved_candidates() {
    let mut h = harness(
        fast_config(),
        permissive_limits(),
        Arc::new(ScriptedDiscovery::new(0)),
        Arc::new(ToggleAnalyzer::new()),
    );

    let report = h.supervisor.run_cycle().await.unwrap();

    assert!(!report.skipped);
    assert!(report.degraded.is_empty());
    assert_eq!(report.decisions.len(), 3);
    assert_eq!(report.signals.len(), 3);
    assert_eq!(h.executor.submitted.lock().unwrap().len(), 3);
    assert_eq!(h.store.signal_count(), 3);
    assert_eq!(h.store.bot_count(), 4);
    assert!(all_idle(&h));

    let stored = h.store.gate_decisions(report.cycle).await.unwrap();
    assert_eq!(stored.len(), 3);
    let expected = AetherId::from_name(&format!(
        "{}:{}:{}",
        SupervisorConfig::default().pipeline_id,
        report.cycle,
        report.signals[0].candidate_id
    ));
    assert_eq!(report.signals[0].id, expected);

    let completed = h
        .bus
        .filter(|d| matches!(d, AetherEventData::CycleCompleted { signals: 3, .. }))
        .await;
    assert_eq!(completed.len(), 1);

    let health = h.store.system_metrics();
    assert_eq!(health.len(), 1);
    assert_eq!(health[0].name, "system_health");
    assert_eq!(health[0].data["signals"], 3);

    let checkpoint = h
        .store
        .load_checkpoint(&SupervisorConfig::default().pipeline_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint["generation"], report.generation);
}

#[tokio::test(start_paused = true)]
async fn test_every_gated_candidate_gets_exactly_one_decision() {
    // Default limits reject part of the default space.
    let mut config = fast_config();
    config.signal_candidates = 8;
    let mut h = harness(
        config,
        RiskLimits::default(),
        Arc::new(ScriptedDiscovery::new(0)),
        Arc::new(ToggleAnalyzer::new()),
    );

    let report = h.supervisor.run_cycle().await.unwrap();

    assert_eq!(report.decisions.len(), 8);
    let population = &h.supervisor.engine().state().population;
    for (decision, candidate) in report.decisions.iter().zip(population) {
        assert_eq!(decision.candidate_id, candidate.id);
        assert_eq!(decision.approved, decision.reason.is_none());
    }
    let approved = report.decisions.iter().filter(|d| d.approved).count();
    assert_eq!(report.signals.len(), approved);
    for signal in &report.signals {
        let decision = report
            .decisions
            .iter()
            .find(|d| d.candidate_id == signal.candidate_id)
            .unwrap();
        assert!(decision.approved);
    }
    let gate_events = h
        .bus
        .filter(|d| matches!(d, AetherEventData::GateDecided { .. }))
        .await;
    assert_eq!(gate_events.len(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried() {
    // Both chains fail on the first attempt, then recover.
    let discovery = Arc::new(ScriptedDiscovery::new(2));
    let mut h = harness(
        fast_config(),
        permissive_limits(),
        discovery.clone(),
        Arc::new(ToggleAnalyzer::new()),
    );

    let report = h.supervisor.run_cycle().await.unwrap();

    assert!(report.degraded.is_empty());
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 4);
    let retries = h
        .bus
        .filter(|d| {
            matches!(
                d,
                AetherEventData::StageRetry {
                    stage: Stage::Discover,
                    ..
                }
            )
        })
        .await;
    assert_eq!(retries.len(), 1);
    assert_eq!(h.supervisor.health().failure_rate(Stage::Discover), 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded_and_stage_degrades_once() {
    let discovery = Arc::new(ScriptedDiscovery::new(u32::MAX));
    let mut h = harness(
        fast_config(),
        permissive_limits(),
        discovery.clone(),
        Arc::new(ToggleAnalyzer::new()),
    );

    let report = h.supervisor.run_cycle().await.unwrap();

    // max_retries = 2: one attempt plus two retries, over two chains.
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 6);
    assert_eq!(report.degraded, vec![Stage::Discover]);
    let degraded = h
        .bus
        .filter(|d| matches!(d, AetherEventData::StageDegraded { .. }))
        .await;
    assert_eq!(degraded.len(), 1);
    let retries = h
        .bus
        .filter(|d| matches!(d, AetherEventData::StageRetry { .. }))
        .await;
    assert_eq!(retries.len(), 2);
    assert!(all_idle(&h));
}

#[tokio::test(start_paused = true)]
async fn test_stale_analysis_is_reused_then_cycle_skipped() {
    let analyzer = Arc::new(ToggleAnalyzer::new());
    let mut config = fast_config();
    config.max_retries = 0;
    let mut h = harness(
        config,
        permissive_limits(),
        Arc::new(ScriptedDiscovery::new(0)),
        analyzer.clone(),
    );

    let first = h.supervisor.run_cycle().await.unwrap();
    assert!(!first.skipped);

    analyzer.set_failing(true);
    let second = h.supervisor.run_cycle().await.unwrap();
    assert!(!second.skipped);
    assert_eq!(second.degraded, vec![Stage::Analyze]);
    assert!(second.generation > first.generation);

    let third = h.supervisor.run_cycle().await.unwrap();
    assert!(third.skipped);
    assert_eq!(third.generation, second.generation);
    assert!(third.decisions.is_empty());
    assert!(h.store.gate_decisions(third.cycle).await.unwrap().is_empty());
    let skipped = h
        .bus
        .filter(|d| matches!(d, AetherEventData::CycleSkipped { cycle: 3, .. }))
        .await;
    assert_eq!(skipped.len(), 1);

    analyzer.set_failing(false);
    let fourth = h.supervisor.run_cycle().await.unwrap();
    assert!(!fourth.skipped);
    assert_eq!(h.supervisor.stale_cycles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_discovery_keeps_last_known_good_analysis() {
    let discovery = Arc::new(ScriptedDiscovery::new(0));
    let mut h = harness(
        fast_config(),
        permissive_limits(),
        discovery.clone(),
        Arc::new(ToggleAnalyzer::new()),
    );

    let first = h.supervisor.run_cycle().await.unwrap();
    let learned = h.supervisor.engine().state().best_ever.clone().unwrap();
    assert!(learned.fitness > 0.0);

    // No bots means no observations: evolve on the previous analysis.
    discovery.set_empty(true);
    let second = h.supervisor.run_cycle().await.unwrap();
    assert!(!second.skipped);
    assert_eq!(second.bots, 0);
    assert_eq!(second.observations, first.observations);
    assert_eq!(h.supervisor.stale_cycles(), 1);
    let best = h.supervisor.engine().state().best_ever.clone().unwrap();
    assert!(best.fitness >= learned.fitness);
    assert!(h
        .supervisor
        .engine()
        .state()
        .population
        .iter()
        .any(|c| c.fitness > 0.0));

    // Past stale_data_max_cycles the cycle is skipped, population untouched.
    let third = h.supervisor.run_cycle().await.unwrap();
    assert!(third.skipped);
    assert_eq!(third.generation, second.generation);
    assert!(third.signals.is_empty());

    discovery.set_empty(false);
    let fourth = h.supervisor.run_cycle().await.unwrap();
    assert!(!fourth.skipped);
    assert_eq!(h.supervisor.stale_cycles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_gate_retry_does_not_resubmit_signals() {
    let executor = Arc::new(RecordingExecutor::failing_at(2));
    let mut h = harness_with(
        fast_config(),
        permissive_limits(),
        Arc::new(ScriptedDiscovery::new(0)),
        Arc::new(ToggleAnalyzer::new()),
        engine(params(8, 7)),
        executor.clone(),
    );

    let report = h.supervisor.run_cycle().await.unwrap();

    assert!(report.degraded.is_empty());
    assert_eq!(report.signals.len(), 3);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 4);
    {
        let submitted = executor.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 3);
        let ids: HashSet<_> = submitted.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 3);
    }
    assert_eq!(h.store.signal_count(), 3);
    let retries = h
        .bus
        .filter(|d| {
            matches!(
                d,
                AetherEventData::StageRetry {
                    stage: Stage::Gate,
                    ..
                }
            )
        })
        .await;
    assert_eq!(retries.len(), 1);
}

#[tokio::test]
async fn test_cancel_reaches_running_evolution() {
    let mut p = params(8, 7);
    p.max_generations = u64::MAX;
    p.convergence_patience = u32::MAX;
    let mut h = harness_with(
        fast_config(),
        permissive_limits(),
        Arc::new(ScriptedDiscovery::new(0)),
        Arc::new(ToggleAnalyzer::new()),
        engine(p),
        Arc::new(RecordingExecutor::default()),
    );

    // Only runs while generations are computed off the runtime thread.
    let mut rx = h.bus.subscribe();
    let cancel = h.cancel.clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event)
                    if matches!(
                        event.data,
                        AetherEventData::StageTransition {
                            stage: Stage::Evolve,
                            to: StageStatus::Running,
                            ..
                        }
                    ) =>
                {
                    cancel.cancel();
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let report = tokio::time::timeout(Duration::from_secs(30), h.supervisor.run_cycle())
        .await
        .expect("evolution should observe cancellation")
        .unwrap();

    assert!(report.stopped);
    assert!(report.signals.is_empty());
    assert!(h.store.gate_decisions(report.cycle).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_health_alert_and_recovery() {
    let analyzer = Arc::new(ToggleAnalyzer::new());
    let mut config = fast_config();
    config.max_retries = 0;
    config.stale_data_max_cycles = 10;
    let mut h = harness(
        config,
        permissive_limits(),
        Arc::new(ScriptedDiscovery::new(0)),
        analyzer.clone(),
    );

    // window 4, threshold 0.5: [ok, fail, fail] is 2/3 and alerts.
    h.supervisor.run_cycle().await.unwrap();
    analyzer.set_failing(true);
    h.supervisor.run_cycle().await.unwrap();
    h.supervisor.run_cycle().await.unwrap();
    assert!(h.supervisor.health().is_alerting(Stage::Analyze));
    let alerts = h
        .bus
        .filter(|d| {
            matches!(
                d,
                AetherEventData::HealthAlert {
                    stage: Stage::Analyze,
                    ..
                }
            )
        })
        .await;
    assert_eq!(alerts.len(), 1);

    // [ok, fail, fail, ok] is 2/4, back at the threshold.
    analyzer.set_failing(false);
    h.supervisor.run_cycle().await.unwrap();
    assert!(!h.supervisor.health().is_alerting(Stage::Analyze));
    let recovered = h
        .bus
        .filter(|d| matches!(d, AetherEventData::HealthRecovered { .. }))
        .await;
    assert_eq!(recovered.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_collaborator_times_out() {
    let mut config = fast_config();
    config.max_retries = 0;
    let mut h = harness(
        config,
        permissive_limits(),
        Arc::new(ScriptedDiscovery::new(0)),
        Arc::new(HangingAnalyzer),
    );

    let report = h.supervisor.run_cycle().await.unwrap();

    // No earlier analysis to fall back on.
    assert!(report.skipped);
    let degraded = h
        .bus
        .filter(|d| {
            matches!(d, AetherEventData::StageDegraded { stage: Stage::Analyze, error, .. }
                if error.contains("timed out"))
        })
        .await;
    assert_eq!(degraded.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_after_cycle_limit() {
    let mut h = harness(
        fast_config(),
        permissive_limits(),
        Arc::new(ScriptedDiscovery::new(0)),
        Arc::new(ToggleAnalyzer::new()),
    );

    h.supervisor.run(Some(2)).await.unwrap();

    assert_eq!(h.supervisor.cycle(), 2);
    for stage in Stage::ALL {
        assert_eq!(h.supervisor.status(stage), StageStatus::Stopped);
    }
    let completed = h
        .bus
        .filter(|d| matches!(d, AetherEventData::CycleCompleted { .. }))
        .await;
    assert_eq!(completed.len(), 2);
    let stopped = h
        .bus
        .filter(|d| matches!(d, AetherEventData::PipelineStopped { cycle: 2 }))
        .await;
    assert_eq!(stopped.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_backoff() {
    let mut config = fast_config();
    config.max_retries = 5;
    let mut h = harness(
        config,
        permissive_limits(),
        Arc::new(ScriptedDiscovery::new(u32::MAX)),
        Arc::new(ToggleAnalyzer::new()),
    );

    let cancel = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
    });
    h.supervisor.run(None).await.unwrap();

    assert_eq!(h.supervisor.cycle(), 1);
    for stage in Stage::ALL {
        assert_eq!(h.supervisor.status(stage), StageStatus::Stopped);
    }
    assert!(h.store.gate_decisions(1).await.unwrap().is_empty());
    assert!(h.supervisor.engine().state().population.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_runs_no_cycle() {
    let mut h = harness(
        fast_config(),
        permissive_limits(),
        Arc::new(ScriptedDiscovery::new(0)),
        Arc::new(ToggleAnalyzer::new()),
    );
    h.cancel.cancel();

    h.supervisor.run(None).await.unwrap();

    assert_eq!(h.supervisor.cycle(), 0);
    assert_eq!(h.store.bot_count(), 0);
    for stage in Stage::ALL {
        assert_eq!(h.supervisor.status(stage), StageStatus::Stopped);
    }
}

#[test]
fn test_invalid_supervisor_config_is_rejected() {
    let mut config = fast_config();
    config.concurrency = 0;
    assert_eq!(config.validate().unwrap_err().kind(), "ConfigurationError");

    let mut config = fast_config();
    config.health_alert_threshold = 1.5;
    assert!(config.validate().is_err());
}
