pub mod cli;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod events;
pub mod evolution;
pub mod risk;
pub mod shutdown;
pub mod supervisor;

use aether_shared::EntityStore;
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::collaborators::{MockAnalyzer, MockBotHunter, PaperExecutor};
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::evolution::{
    EvolutionEngine, EvolutionParams, FitnessConfig, FitnessEvaluator, ParameterSpace,
    PopulationState,
};
use crate::risk::RiskGate;
use crate::shutdown::CancellationFlag;
use crate::supervisor::{Collaborators, Supervisor};

/// Options of the `run` command that are not part of the environment config.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many cycles instead of running until cancelled.
    pub cycles: Option<u64>,
    /// Use the in-memory store instead of `DATABASE_URL`.
    pub in_memory: bool,
}

/// Builds the evolution engine, continuing from the pipeline's latest
/// checkpoint when one exists.
pub async fn restore_engine(
    params: EvolutionParams,
    store: &dyn EntityStore,
    pipeline_id: &str,
) -> anyhow::Result<EvolutionEngine> {
    let space = ParameterSpace::default();
    let evaluator = FitnessEvaluator::new(FitnessConfig::default());
    let checkpoint = store
        .load_checkpoint(pipeline_id)
        .await
        .context("Failed to load population checkpoint")?;
    let Some(value) = checkpoint else {
        return Ok(EvolutionEngine::new(params, space, evaluator)?);
    };
    match serde_json::from_value::<PopulationState>(value) {
        Ok(state) => Ok(EvolutionEngine::resume(params, space, evaluator, state)?),
        Err(e) => {
            warn!(pipeline = pipeline_id, error = %e, "Unreadable checkpoint, starting a fresh population");
            Ok(EvolutionEngine::new(params, space, evaluator)?)
        }
    }
}

/// Runs the supervised pipeline with the offline collaborators until
/// `cancel` fires, the cycle limit is reached or a fatal error occurs.
pub async fn run_pipeline(
    config: AppConfig,
    options: RunOptions,
    cancel: CancellationFlag,
) -> anyhow::Result<()> {
    info!("+---------------------------------------+");
    info!("|           AETHER Trading Pipeline      |");
    info!(
        "|             Version {:<10}      |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+---------------------------------------+");

    let store: Arc<dyn EntityStore> = if options.in_memory {
        info!("📍 Using in-memory entity store");
        Arc::new(db::MemoryEntityStore::new())
    } else {
        info!("📍 Loaded Config: DB_URL={}", config.database_url);
        let pool = db::connect(&config.database_url).await?;
        db::init_db(&pool).await?;
        Arc::new(db::SqliteEntityStore::new(pool))
    };

    let engine = restore_engine(
        config.evolution.clone(),
        store.as_ref(),
        &config.supervisor.pipeline_id,
    )
    .await?;
    let gate = RiskGate::new(config.risk.clone())?;
    let collaborators = Collaborators {
        discovery: Arc::new(MockBotHunter::new(config.evolution.seed)),
        analyzer: Arc::new(MockAnalyzer),
        executor: Arc::new(PaperExecutor::new()),
        store,
    };
    let bus = EventBus::new(config.event_history_size);

    let mut supervisor = Supervisor::new(
        config.supervisor.clone(),
        engine,
        gate,
        collaborators,
        bus,
        cancel,
    )?;
    supervisor.run(options.cycles).await?;
    info!(cycles = supervisor.cycle(), "👋 Pipeline shut down");
    Ok(())
}
