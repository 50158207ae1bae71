use aether_shared::{AetherError, AetherResult, CandidateId, Metric, StrategyCandidate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use super::fitness::FitnessEvaluator;
use super::operators;
use super::types::{
    EvolutionOutcome, EvolutionParams, GenerationSummary, ParameterSpace, PopulationState,
    StopReason,
};
use crate::shutdown::CancellationFlag;

/// Mixes the generation number into the seed so each generation draws from
/// its own stream. A resumed checkpoint therefore continues exactly where an
/// uninterrupted run would have.
const GENERATION_STREAM_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Generational genetic algorithm over strategy parameter vectors.
///
/// The engine exclusively owns its `PopulationState`. A generation is built
/// on the side and committed in one assignment, so a failed invariant check
/// leaves the previous generation intact.
#[derive(Debug, Clone)]
pub struct EvolutionEngine {
    params: EvolutionParams,
    space: ParameterSpace,
    evaluator: FitnessEvaluator,
    state: PopulationState,
    halted: Option<String>,
}

impl EvolutionEngine {
    pub fn new(
        params: EvolutionParams,
        space: ParameterSpace,
        evaluator: FitnessEvaluator,
    ) -> AetherResult<Self> {
        params.validate()?;
        space.validate()?;
        let state = PopulationState::empty(params.seed);
        Ok(Self {
            params,
            space,
            evaluator,
            state,
            halted: None,
        })
    }

    /// Restores a checkpointed population instead of starting from scratch.
    pub fn resume(
        params: EvolutionParams,
        space: ParameterSpace,
        evaluator: FitnessEvaluator,
        state: PopulationState,
    ) -> AetherResult<Self> {
        let mut engine = Self::new(params, space, evaluator)?;
        if !state.population.is_empty() && state.population.len() != engine.params.population_size
        {
            return Err(AetherError::Configuration(format!(
                "checkpoint holds {} candidates but population_size is {}",
                state.population.len(),
                engine.params.population_size
            )));
        }
        if state.seed != engine.params.seed {
            warn!(
                checkpoint_seed = state.seed,
                configured_seed = engine.params.seed,
                "Checkpoint seed differs from configuration, continuing with checkpoint seed"
            );
        }
        info!(
            generation = state.generation,
            population = state.population.len(),
            "♻️ Resuming evolution from checkpoint"
        );
        engine.state = state;
        Ok(engine)
    }

    #[must_use]
    pub fn state(&self) -> &PopulationState {
        &self.state
    }

    #[must_use]
    pub fn params(&self) -> &EvolutionParams {
        &self.params
    }

    #[must_use]
    pub fn best_ever(&self) -> Option<&StrategyCandidate> {
        self.state.best_ever.as_ref()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    fn rng_for(&self, generation: u64) -> StdRng {
        StdRng::seed_from_u64(self.state.seed ^ generation.wrapping_mul(GENERATION_STREAM_MIX))
    }

    fn ensure_running(&self) -> AetherResult<()> {
        match &self.halted {
            Some(reason) => Err(AetherError::EngineInvariant(format!(
                "engine halted: {}",
                reason
            ))),
            None => Ok(()),
        }
    }

    // ── Generation Zero ──

    /// Seeds generation 0 around the base strategy. No-op when a population exists.
    pub fn initialize(&mut self, metrics: &[Metric]) -> AetherResult<()> {
        self.ensure_running()?;
        if !self.state.population.is_empty() {
            return Ok(());
        }
        let mut rng = self.rng_for(0);
        let population: Vec<StrategyCandidate> = (0..self.params.population_size)
            .map(|i| operators::seed_candidate(&mut rng, &self.space, CandidateId::new(0, i as u32)))
            .collect();
        let population = self.score_and_rank(population, metrics);
        self.check_population(&population)?;

        self.state.generation = 0;
        self.state.best_ever = population.first().cloned();
        self.state.stagnant_generations = 0;
        self.state.population = population;
        info!(
            population = self.params.population_size,
            seed = self.state.seed,
            best_fitness = self.state.best_ever.as_ref().map_or(0.0, |c| c.fitness),
            "🧬 Initialized evolution population"
        );
        Ok(())
    }

    fn score_and_rank(
        &self,
        population: Vec<StrategyCandidate>,
        metrics: &[Metric],
    ) -> Vec<StrategyCandidate> {
        let mut scored = self.evaluator.evaluate_population(population, metrics);
        operators::rank(&self.space, &mut scored);
        scored
    }

    /// Re-scores the resting population and best-ever candidate against the
    /// given metrics, so no ranking is ever based on stale fitness values.
    fn refresh(&mut self, metrics: &[Metric]) {
        let population = std::mem::take(&mut self.state.population);
        self.state.population = self.score_and_rank(population, metrics);

        let rescored = self
            .state
            .best_ever
            .take()
            .map(|c| {
                let fitness = self.evaluator.evaluate(&c, metrics);
                c.with_fitness(fitness)
            });
        self.state.best_ever = match (rescored, self.state.population.first()) {
            (Some(best), Some(leader)) if leader.fitness > best.fitness => Some(leader.clone()),
            (Some(best), _) => Some(best),
            (None, leader) => leader.cloned(),
        };
    }

    fn check_population(&self, population: &[StrategyCandidate]) -> AetherResult<()> {
        if population.len() != self.params.population_size {
            return Err(AetherError::EngineInvariant(format!(
                "population size changed to {} (expected {})",
                population.len(),
                self.params.population_size
            )));
        }
        let mut ids = HashSet::with_capacity(population.len());
        if let Some(dup) = population.iter().find(|c| !ids.insert(c.id)) {
            return Err(AetherError::EngineInvariant(format!(
                "duplicate candidate id {}",
                dup.id
            )));
        }
        Ok(())
    }

    // ── Generation Step ──

    /// Re-evaluates the current population against `metrics` and advances
    /// one generation.
    pub fn step(&mut self, metrics: &[Metric]) -> AetherResult<GenerationSummary> {
        self.ensure_running()?;
        if self.state.population.is_empty() {
            self.initialize(metrics)?;
        } else {
            self.refresh(metrics);
        }
        self.advance(metrics)
    }

    /// Select, crossover, mutate and replace over the ranked population.
    fn advance(&mut self, metrics: &[Metric]) -> AetherResult<GenerationSummary> {
        let next_generation = self.state.generation + 1;
        let mut rng = self.rng_for(next_generation);
        let ranked = &self.state.population;
        let size = self.params.population_size;
        let elites = self.params.elitism_count.min(ranked.len());

        let mut next: Vec<StrategyCandidate> = ranked.iter().take(elites).cloned().collect();
        for slot in elites..size {
            let a = &ranked[operators::tournament(&mut rng, ranked.len(), self.params.tournament_size)];
            let b = &ranked[operators::tournament(&mut rng, ranked.len(), self.params.tournament_size)];
            let mut params = operators::crossover(&mut rng, &self.space, a, b);
            operators::mutate(
                &mut rng,
                &self.space,
                &mut params,
                self.params.mutation_rate,
                self.params.mutation_scale,
            );
            next.push(StrategyCandidate::new(
                CandidateId::new(next_generation, slot as u32),
                params,
                vec![a.id, b.id],
            ));
        }

        let next = self.score_and_rank(next, metrics);
        if let Err(e) = self.check_population(&next) {
            error!(
                generation = next_generation,
                error = %e,
                "❌ Evolution halted, keeping last good population"
            );
            self.halted = Some(e.to_string());
            return Err(e);
        }

        let best = next[0].clone();
        let previous_best = self
            .state
            .best_ever
            .as_ref()
            .map_or(f64::NEG_INFINITY, |c| c.fitness);
        if best.fitness > previous_best + self.params.convergence_epsilon {
            self.state.stagnant_generations = 0;
        } else {
            self.state.stagnant_generations += 1;
        }
        if best.fitness > previous_best {
            self.state.best_ever = Some(best.clone());
        }

        let mean_fitness = next.iter().map(|c| c.fitness).sum::<f64>() / next.len() as f64;
        self.state.population = next;
        self.state.generation = next_generation;

        let summary = GenerationSummary {
            generation: next_generation,
            best_candidate: best.id,
            best_fitness: best.fitness,
            best_ever_fitness: self
                .state
                .best_ever
                .as_ref()
                .map_or(best.fitness, |c| c.fitness),
            mean_fitness,
            stagnant_generations: self.state.stagnant_generations,
        };
        debug!(
            generation = summary.generation,
            best = %summary.best_candidate,
            best_fitness = summary.best_fitness,
            mean_fitness = summary.mean_fitness,
            stagnant = summary.stagnant_generations,
            "Generation complete"
        );
        Ok(summary)
    }

    // ── Run Loop ──

    /// Runs generations until max generations, convergence or cancellation.
    ///
    /// Cancellation is observed only between generations. The stagnation
    /// counter starts from zero on every call, since new metrics may reopen
    /// the search.
    pub fn run<F>(
        &mut self,
        metrics: &[Metric],
        cancel: &CancellationFlag,
        mut on_generation: F,
    ) -> AetherResult<EvolutionOutcome>
    where
        F: FnMut(&GenerationSummary),
    {
        self.ensure_running()?;
        if self.state.population.is_empty() {
            self.initialize(metrics)?;
        } else {
            self.refresh(metrics);
        }
        self.state.stagnant_generations = 0;

        let mut summaries = Vec::new();
        let mut generations_run = 0u64;
        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self.state.stagnant_generations >= self.params.convergence_patience {
                break StopReason::Converged;
            }
            if generations_run >= self.params.max_generations {
                break StopReason::MaxGenerations;
            }
            let summary = self.advance(metrics)?;
            generations_run += 1;
            on_generation(&summary);
            summaries.push(summary);
        };

        let best_ever = self.state.best_ever.clone();
        info!(
            generation = self.state.generation,
            generations_run = generations_run,
            reason = %reason,
            best = ?best_ever.as_ref().map(|c| c.id.to_string()),
            best_fitness = best_ever.as_ref().map_or(0.0, |c| c.fitness),
            "🏁 Evolution stopped"
        );
        Ok(EvolutionOutcome {
            reason,
            generations_run,
            final_generation: self.state.generation,
            best_ever,
            summaries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::FitnessConfig;
    use chrono::{TimeZone, Utc};

    fn metrics() -> Vec<Metric> {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        vec![
            Metric::new("bot-a", "total_return", 0.6, at),
            Metric::new("bot-a", "win_rate", 0.65, at),
            Metric::new("bot-a", "max_drawdown", 0.15, at),
            Metric::new("bot-a", "volatility", 0.03, at),
        ]
    }

    fn engine(size: usize, seed: u64) -> EvolutionEngine {
        let params = EvolutionParams {
            population_size: size,
            elitism_count: 2usize.min(size - 1),
            seed,
            ..Default::default()
        };
        EvolutionEngine::new(
            params,
            ParameterSpace::default(),
            FitnessEvaluator::new(FitnessConfig::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_population_below_two() {
        let params = EvolutionParams {
            population_size: 1,
            elitism_count: 0,
            ..Default::default()
        };
        let err = EvolutionEngine::new(params, ParameterSpace::default(), FitnessEvaluator::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn test_minimum_population_steps() {
        let mut engine = engine(2, 9);
        for _ in 0..5 {
            engine.step(&metrics()).unwrap();
            assert_eq!(engine.state().population.len(), 2);
        }
    }

    #[test]
    fn test_step_assigns_unique_generation_ids() {
        let mut engine = engine(12, 3);
        let summary = engine.step(&metrics()).unwrap();
        assert_eq!(summary.generation, 1);
        let state = engine.state();
        let ids: HashSet<_> = state.population.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 12);
        let children = state
            .population
            .iter()
            .filter(|c| c.id.generation == 1)
            .count();
        assert!(children >= 10, "all non-elite slots are generation-1 children");
        assert!(state
            .population
            .iter()
            .filter(|c| c.id.generation == 1)
            .all(|c| c.parents.len() == 2));
    }

    #[test]
    fn test_population_is_ranked_at_rest() {
        let mut engine = engine(10, 5);
        engine.step(&metrics()).unwrap();
        let fitness: Vec<f64> = engine.state().population.iter().map(|c| c.fitness).collect();
        assert!(fitness.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_cancelled_before_first_generation() {
        let mut engine = engine(6, 1);
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let outcome = engine.run(&metrics(), &cancel, |_| {}).unwrap();
        assert_eq!(outcome.reason, StopReason::Cancelled);
        assert_eq!(outcome.generations_run, 0);
        // Cancellation still leaves an evaluated generation zero behind.
        assert_eq!(engine.state().population.len(), 6);
        assert!(outcome.best_ever.is_some());
    }

    #[test]
    fn test_resume_continues_identically() {
        let m = metrics();
        let mut straight = engine(8, 77);
        for _ in 0..6 {
            straight.step(&m).unwrap();
        }

        let mut first = engine(8, 77);
        for _ in 0..3 {
            first.step(&m).unwrap();
        }
        let checkpoint = first.state().clone();
        let mut resumed = EvolutionEngine::resume(
            first.params().clone(),
            ParameterSpace::default(),
            FitnessEvaluator::default(),
            checkpoint,
        )
        .unwrap();
        for _ in 0..3 {
            resumed.step(&m).unwrap();
        }
        assert_eq!(straight.state(), resumed.state());
    }

    #[test]
    fn test_resume_rejects_mismatched_population() {
        let mut small = engine(4, 1);
        small.step(&metrics()).unwrap();
        let params = EvolutionParams {
            population_size: 6,
            ..Default::default()
        };
        let err = EvolutionEngine::resume(
            params,
            ParameterSpace::default(),
            FitnessEvaluator::default(),
            small.state().clone(),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), "ConfigurationError");
    }
}
