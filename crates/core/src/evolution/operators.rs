//! Stochastic and ordering operators of the genetic algorithm.
//!
//! Every function that draws randomness takes the generator explicitly, and
//! walks parameters in `ParameterSpace` order, so the same seed always yields
//! the same draws.

use aether_shared::{CandidateId, ParamValue, StrategyCandidate};
use rand::seq::index::sample;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::types::{ParamKind, ParamSpec, ParameterSpace};

/// Truncation bound of the mutation offset, in standard deviations.
const MUTATION_SIGMA_BOUND: f64 = 3.0;
/// Spread of the initial population around the base strategy.
const INITIAL_VARIATION: f64 = 0.2;

/// Ranking order: fitness descending, then lower normalized parameter
/// variance, then candidate id ascending.
pub fn compare_ranked(
    space: &ParameterSpace,
    a: &StrategyCandidate,
    b: &StrategyCandidate,
) -> Ordering {
    b.fitness
        .total_cmp(&a.fitness)
        .then_with(|| {
            space
                .normalized_variance(a)
                .total_cmp(&space.normalized_variance(b))
        })
        .then_with(|| a.id.cmp(&b.id))
}

pub fn rank(space: &ParameterSpace, population: &mut [StrategyCandidate]) {
    population.sort_by(|a, b| compare_ranked(space, a, b));
}

/// Samples `tournament_size` distinct members of a ranked population and
/// returns the index of the best one (the lowest rank).
pub fn tournament<R: Rng + ?Sized>(rng: &mut R, ranked_len: usize, tournament_size: usize) -> usize {
    if ranked_len == 0 {
        return 0;
    }
    let k = tournament_size.clamp(1, ranked_len);
    sample(rng, ranked_len, k)
        .into_iter()
        .min()
        .unwrap_or(0)
}

/// Generation-zero member drawn around the base strategy.
pub fn seed_candidate<R: Rng + ?Sized>(
    rng: &mut R,
    space: &ParameterSpace,
    id: CandidateId,
) -> StrategyCandidate {
    let params = space
        .specs
        .iter()
        .map(|spec| {
            let value = match &spec.kind {
                ParamKind::Numeric { base, .. } => {
                    let factor = rng.gen_range(1.0 - INITIAL_VARIATION..=1.0 + INITIAL_VARIATION);
                    ParamValue::Numeric(spec.clamp(base * factor))
                }
                ParamKind::Categorical { choices, .. } => {
                    ParamValue::Categorical(choices[rng.gen_range(0..choices.len())].clone())
                }
            };
            (spec.name.clone(), value)
        })
        .collect();
    StrategyCandidate::new(id, params, Vec::new())
}

/// Blend crossover for numeric genes, uniform pick for categorical ones.
pub fn crossover<R: Rng + ?Sized>(
    rng: &mut R,
    space: &ParameterSpace,
    a: &StrategyCandidate,
    b: &StrategyCandidate,
) -> BTreeMap<String, ParamValue> {
    space
        .specs
        .iter()
        .map(|spec| {
            let value = match &spec.kind {
                ParamKind::Numeric { base, .. } => {
                    let va = a.numeric(&spec.name).unwrap_or(*base);
                    let vb = b.numeric(&spec.name).unwrap_or(*base);
                    let alpha: f64 = rng.gen();
                    ParamValue::Numeric(spec.clamp(alpha * va + (1.0 - alpha) * vb))
                }
                ParamKind::Categorical { base, .. } => {
                    let from = if rng.gen_bool(0.5) { a } else { b };
                    ParamValue::Categorical(
                        from.categorical(&spec.name).unwrap_or(base).to_string(),
                    )
                }
            };
            (spec.name.clone(), value)
        })
        .collect()
}

/// Perturbs each gene with probability `rate`. Numeric offsets are Gaussian
/// with sigma `scale * range width`, truncated at three sigma, and the result
/// is clamped to the declared range.
pub fn mutate<R: Rng + ?Sized>(
    rng: &mut R,
    space: &ParameterSpace,
    params: &mut BTreeMap<String, ParamValue>,
    rate: f64,
    scale: f64,
) {
    for spec in &space.specs {
        if !rng.gen_bool(rate) {
            continue;
        }
        let mutated = mutate_gene(rng, spec, params.get(&spec.name), scale);
        params.insert(spec.name.clone(), mutated);
    }
}

fn mutate_gene<R: Rng + ?Sized>(
    rng: &mut R,
    spec: &ParamSpec,
    current: Option<&ParamValue>,
    scale: f64,
) -> ParamValue {
    match &spec.kind {
        ParamKind::Numeric { min, max, base } => {
            let value = current.and_then(ParamValue::as_f64).unwrap_or(*base);
            let sigma = scale * (max - min);
            let offset = match Normal::new(0.0, sigma) {
                Ok(normal) if sigma > 0.0 => {
                    let bound = MUTATION_SIGMA_BOUND * sigma;
                    normal.sample(rng).clamp(-bound, bound)
                }
                _ => 0.0,
            };
            ParamValue::Numeric(spec.clamp(value + offset))
        }
        ParamKind::Categorical { choices, .. } => {
            ParamValue::Categorical(choices[rng.gen_range(0..choices.len())].clone())
        }
    }
}
