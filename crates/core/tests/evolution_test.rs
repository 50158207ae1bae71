//! Integration tests for the evolution engine: determinism, population
//! invariants, elitism, convergence and checkpoint resume.

mod common;

use aether_core::db::{connect, init_db, SqliteEntityStore};
use aether_core::evolution::{
    EvolutionEngine, FitnessConfig, FitnessEvaluator, ParameterSpace, PopulationState, StopReason,
};
use aether_core::shutdown::CancellationFlag;
use aether_shared::EntityStore;
use common::{engine, params, strong_metrics};
use std::collections::HashSet;

#[test]
fn test_same_seed_same_run() {
    let metrics = strong_metrics();
    let cancel = CancellationFlag::new();
    let mut a = engine(params(12, 99));
    let mut b = engine(params(12, 99));
    let out_a = a.run(&metrics, &cancel, |_| {}).unwrap();
    let out_b = b.run(&metrics, &cancel, |_| {}).unwrap();

    assert_eq!(out_a, out_b);
    assert_eq!(a.state(), b.state());
}

#[test]
fn test_different_seeds_diverge() {
    let metrics = strong_metrics();
    let mut a = engine(params(12, 1));
    let mut b = engine(params(12, 2));
    a.initialize(&metrics).unwrap();
    b.initialize(&metrics).unwrap();
    assert_ne!(a.state().population, b.state().population);
}

#[test]
fn test_population_size_and_ids_hold_every_generation() {
    let metrics = strong_metrics();
    let mut e = engine(params(10, 5));
    for _ in 0..8 {
        let summary = e.step(&metrics).unwrap();
        let population = &e.state().population;
        assert_eq!(population.len(), 10);
        let ids: HashSet<_> = population.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 10);
        // Elites keep their original ids; everything else is newborn.
        let newborn = population
            .iter()
            .filter(|c| c.generation == summary.generation)
            .count();
        assert!(newborn >= 8);
        assert!(population.iter().all(|c| (-1.0..=1.0).contains(&c.fitness)));
    }
}

#[test]
fn test_elitism_keeps_best_fitness_monotonic() {
    let metrics = strong_metrics();
    let mut e = engine(params(10, 11));
    let mut previous = f64::NEG_INFINITY;
    for _ in 0..10 {
        let summary = e.step(&metrics).unwrap();
        assert!(
            summary.best_fitness >= previous,
            "best fitness dropped from {} to {}",
            previous,
            summary.best_fitness
        );
        assert!(summary.best_ever_fitness >= summary.best_fitness);
        previous = summary.best_fitness;
    }
}

#[test]
fn test_converges_before_generation_limit() {
    let metrics = strong_metrics();
    let mut p = params(20, 42);
    p.max_generations = 100;
    p.convergence_patience = 5;
    p.convergence_epsilon = 0.001;
    let mut e = engine(p);
    let outcome = e.run(&metrics, &CancellationFlag::new(), |_| {}).unwrap();

    assert_eq!(outcome.reason, StopReason::Converged);
    assert!(outcome.generations_run < 100);
    assert_eq!(outcome.summaries.len() as u64, outcome.generations_run);
    let last = outcome.summaries.last().unwrap();
    assert_eq!(last.stagnant_generations, 5);
    let best = outcome.best_ever.unwrap();
    assert_eq!(best.fitness, last.best_ever_fitness);
    let max_seen = outcome
        .summaries
        .iter()
        .map(|s| s.best_fitness)
        .fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(best.fitness, max_seen);
}

#[test]
fn test_cancel_between_generations() {
    let metrics = strong_metrics();
    let mut p = params(10, 3);
    p.max_generations = 50;
    p.convergence_patience = 50;
    let mut e = engine(p);
    let cancel = CancellationFlag::new();
    let outcome = e
        .run(&metrics, &cancel, |s| {
            if s.generation == 3 {
                cancel.cancel();
            }
        })
        .unwrap();

    assert_eq!(outcome.reason, StopReason::Cancelled);
    assert_eq!(outcome.generations_run, 3);
    assert_eq!(e.state().generation, 3);
    assert_eq!(e.state().population.len(), 10);
}

#[test]
fn test_empty_metrics_score_neutral() {
    let mut e = engine(params(6, 8));
    let summary = e.step(&[]).unwrap();
    assert_eq!(summary.best_fitness, 0.0);
    assert_eq!(summary.mean_fitness, 0.0);
}

#[tokio::test]
async fn test_checkpoint_resume_matches_uninterrupted_run() {
    let metrics = strong_metrics();

    let mut straight = engine(params(10, 21));
    for _ in 0..6 {
        straight.step(&metrics).unwrap();
    }

    let pool = connect("sqlite::memory:").await.unwrap();
    init_db(&pool).await.unwrap();
    let store = SqliteEntityStore::new(pool);

    let mut first = engine(params(10, 21));
    for _ in 0..3 {
        first.step(&metrics).unwrap();
    }
    let state = first.state();
    store
        .save_checkpoint("test.pipeline", state.generation, serde_json::to_value(state).unwrap())
        .await
        .unwrap();

    let loaded = store.load_checkpoint("test.pipeline").await.unwrap().unwrap();
    let restored: PopulationState = serde_json::from_value(loaded).unwrap();
    let mut resumed = EvolutionEngine::resume(
        params(10, 21),
        ParameterSpace::default(),
        FitnessEvaluator::new(FitnessConfig::default()),
        restored,
    )
    .unwrap();
    for _ in 0..3 {
        resumed.step(&metrics).unwrap();
    }

    assert_eq!(resumed.state(), straight.state());
}

#[tokio::test]
async fn test_restore_engine_without_checkpoint_starts_fresh() {
    let store = aether_core::db::MemoryEntityStore::new();
    let e = aether_core::restore_engine(params(6, 1), &store, "missing.pipeline")
        .await
        .unwrap();
    assert_eq!(e.state().generation, 0);
    assert!(e.state().population.is_empty());
}

#[tokio::test]
async fn test_restore_engine_rejects_resized_population() {
    let store = aether_core::db::MemoryEntityStore::new();
    let mut e = engine(params(6, 1));
    e.step(&strong_metrics()).unwrap();
    store
        .save_checkpoint("p", e.state().generation, serde_json::to_value(e.state()).unwrap())
        .await
        .unwrap();

    let err = aether_core::restore_engine(params(8, 1), &store, "p")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("population_size"));
}
