use aether_shared::{AetherError, AetherResult, CandidateId, ParamValue, StrategyCandidate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Checkpoint namespace used when a pipeline does not name itself.
pub const DEFAULT_PIPELINE_ID: &str = "core.evolution";

// ══════════════════════════════════════════════════════════════
// Parameter Space
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamKind {
    Numeric { min: f64, max: f64, base: f64 },
    Categorical { choices: Vec<String>, base: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn numeric(name: &str, min: f64, max: f64, base: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Numeric { min, max, base },
        }
    }

    pub fn categorical(name: &str, choices: &[&str], base: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Categorical {
                choices: choices.iter().map(|c| (*c).to_string()).collect(),
                base: base.to_string(),
            },
        }
    }

    /// Clamp a numeric value into the declared range. Non-finite input maps to the base value.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        match &self.kind {
            ParamKind::Numeric { min, max, base } => {
                if value.is_finite() {
                    value.clamp(*min, *max)
                } else {
                    *base
                }
            }
            ParamKind::Categorical { .. } => value,
        }
    }

    /// Position of a numeric value inside its range, in [0.0, 1.0].
    #[must_use]
    pub fn normalize(&self, value: f64) -> Option<f64> {
        match &self.kind {
            ParamKind::Numeric { min, max, .. } => {
                let width = max - min;
                if width <= 0.0 {
                    Some(0.0)
                } else {
                    Some(((self.clamp(value) - min) / width).clamp(0.0, 1.0))
                }
            }
            ParamKind::Categorical { .. } => None,
        }
    }

    #[must_use]
    pub fn base_value(&self) -> ParamValue {
        match &self.kind {
            ParamKind::Numeric { base, .. } => ParamValue::Numeric(*base),
            ParamKind::Categorical { base, .. } => ParamValue::Categorical(base.clone()),
        }
    }
}

/// The declared genes of a strategy, in a fixed order.
///
/// Every stochastic operator walks the specs in this order, so the order is
/// part of what makes a seeded run reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub specs: Vec<ParamSpec>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            specs: vec![
                ParamSpec::numeric("min_profit_threshold", 0.001, 0.1, 0.02),
                ParamSpec::numeric("max_gas_price", 10.0, 500.0, 100.0),
                ParamSpec::numeric("position_size", 0.01, 0.5, 0.1),
                ParamSpec::numeric("slippage_tolerance", 0.001, 0.02, 0.005),
                ParamSpec::numeric("stop_loss", 0.005, 0.2, 0.05),
                ParamSpec::numeric("take_profit", 0.02, 0.5, 0.1),
                ParamSpec::numeric("entry_threshold", 0.0, 1.0, 0.5),
                ParamSpec::numeric("exit_threshold", 0.0, 1.0, 0.5),
                ParamSpec::categorical("execution_style", &["market", "limit", "twap"], "market"),
            ],
        }
    }
}

impl ParameterSpace {
    pub fn validate(&self) -> AetherResult<()> {
        if self.specs.is_empty() {
            return Err(AetherError::Configuration(
                "parameter space must declare at least one parameter".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &self.specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(AetherError::Configuration(format!(
                    "parameter '{}' declared twice",
                    spec.name
                )));
            }
            match &spec.kind {
                ParamKind::Numeric { min, max, base } => {
                    if !min.is_finite() || !max.is_finite() || min > max {
                        return Err(AetherError::Configuration(format!(
                            "parameter '{}' has invalid range [{}, {}]",
                            spec.name, min, max
                        )));
                    }
                    if !(*min..=*max).contains(base) {
                        return Err(AetherError::Configuration(format!(
                            "parameter '{}' base {} lies outside [{}, {}]",
                            spec.name, base, min, max
                        )));
                    }
                }
                ParamKind::Categorical { choices, base } => {
                    if choices.is_empty() || !choices.contains(base) {
                        return Err(AetherError::Configuration(format!(
                            "parameter '{}' needs choices containing its base '{}'",
                            spec.name, base
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn base_params(&self) -> BTreeMap<String, ParamValue> {
        self.specs
            .iter()
            .map(|s| (s.name.clone(), s.base_value()))
            .collect()
    }

    /// Variance of the candidate's numeric parameters after normalizing each
    /// to its declared range. Lower means a more balanced parameter vector.
    #[must_use]
    pub fn normalized_variance(&self, candidate: &StrategyCandidate) -> f64 {
        let values: Vec<f64> = self
            .specs
            .iter()
            .filter_map(|spec| {
                candidate
                    .numeric(&spec.name)
                    .and_then(|v| spec.normalize(v))
            })
            .collect();
        if values.is_empty() {
            return 0.0;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    }
}

// ══════════════════════════════════════════════════════════════
// Engine Parameters
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionParams {
    pub population_size: usize,
    pub elitism_count: usize,
    pub tournament_size: usize,
    pub mutation_rate: f64,
    /// Gaussian sigma as a fraction of each parameter's range.
    pub mutation_scale: f64,
    /// Generations per `run()` call.
    pub max_generations: u64,
    pub convergence_patience: u32,
    pub convergence_epsilon: f64,
    pub seed: u64,
}

impl EvolutionParams {
    pub fn validate(&self) -> AetherResult<()> {
        if self.population_size < 2 {
            return Err(AetherError::Configuration(format!(
                "population_size must be >= 2, got {}",
                self.population_size
            )));
        }
        if self.elitism_count == 0 || self.elitism_count >= self.population_size {
            return Err(AetherError::Configuration(format!(
                "elitism_count must be in [1, population_size - 1], got {} for population {}",
                self.elitism_count, self.population_size
            )));
        }
        if self.tournament_size == 0 {
            return Err(AetherError::Configuration(
                "tournament_size must be >= 1".into(),
            ));
        }
        if !self.mutation_rate.is_finite() || !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(AetherError::Configuration(format!(
                "mutation_rate must be in [0.0, 1.0], got {}",
                self.mutation_rate
            )));
        }
        if !self.mutation_scale.is_finite()
            || self.mutation_scale <= 0.0
            || self.mutation_scale > 1.0
        {
            return Err(AetherError::Configuration(format!(
                "mutation_scale must be in (0.0, 1.0], got {}",
                self.mutation_scale
            )));
        }
        if self.max_generations == 0 {
            return Err(AetherError::Configuration(
                "max_generations must be >= 1".into(),
            ));
        }
        if self.convergence_patience == 0 {
            return Err(AetherError::Configuration(
                "convergence_patience must be >= 1".into(),
            ));
        }
        if !self.convergence_epsilon.is_finite() || self.convergence_epsilon < 0.0 {
            return Err(AetherError::Configuration(format!(
                "convergence_epsilon must be finite and >= 0, got {}",
                self.convergence_epsilon
            )));
        }
        Ok(())
    }
}

impl Default for EvolutionParams {
    fn default() -> Self {
        Self {
            population_size: 30,
            elitism_count: 3,
            tournament_size: 5,
            mutation_rate: 0.1,
            mutation_scale: 0.1,
            max_generations: 50,
            convergence_patience: 5,
            convergence_epsilon: 0.001,
            seed: 42,
        }
    }
}

// ══════════════════════════════════════════════════════════════
// Population State
// ══════════════════════════════════════════════════════════════

/// The engine's working set, checkpointed after every Evolve stage.
///
/// At rest, `population` is evaluated and ordered by rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationState {
    pub seed: u64,
    pub generation: u64,
    pub population: Vec<StrategyCandidate>,
    pub best_ever: Option<StrategyCandidate>,
    /// Generations without an improvement above epsilon.
    pub stagnant_generations: u32,
}

impl PopulationState {
    #[must_use]
    pub fn empty(seed: u64) -> Self {
        Self {
            seed,
            generation: 0,
            population: Vec::new(),
            best_ever: None,
            stagnant_generations: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub generation: u64,
    pub best_candidate: CandidateId,
    pub best_fitness: f64,
    pub best_ever_fitness: f64,
    pub mean_fitness: f64,
    pub stagnant_generations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    MaxGenerations,
    Converged,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxGenerations => write!(f, "max_generations"),
            Self::Converged => write!(f, "converged"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one `run()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionOutcome {
    pub reason: StopReason,
    pub generations_run: u64,
    pub final_generation: u64,
    pub best_ever: Option<StrategyCandidate>,
    pub summaries: Vec<GenerationSummary>,
}
